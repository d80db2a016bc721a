use std::time::Duration;
use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Catalog service type of the image service (Glance).
pub const IMAGE_SERVICE: &str = "image";
/// Catalog service type of the container infrastructure service (Magnum).
pub const COE_SERVICE: &str = "container-infra";

#[derive(Error, Debug)]
pub enum Error {
    #[error("OpenStack credentials not found in environment; source an openrc file first (missing {0})")]
    MissingCredentials(&'static str),

    #[error("reqwest: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("keystone returned {0}: {1}")]
    Status(u16, String),

    #[error("keystone response did not contain an X-Subject-Token header")]
    MissingToken,

    #[error("code: {0}, body: {1}")]
    Deserialize(u16, String),

    #[error("no {interface} endpoint for service '{service}' in the service catalog")]
    EndpointNotFound {
        service: &'static str,
        interface: String,
    },
}

impl Error {
    /// Connection failures and server-side errors, which may go away while Keystone starts.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Reqwest(_) => true,
            Error::Status(code, _) => *code >= 500,
            _ => false,
        }
    }
}

/// A Keystone domain, given either by id or by name.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainRef {
    Id(String),
    Name(String),
}

impl DomainRef {
    /// `OS_*_DOMAIN_NAME` wins over `OS_*_DOMAIN_ID`; with neither set the `Default` domain is used.
    fn from_vars(name: Option<String>, id: Option<String>) -> Self {
        match (name, id) {
            (Some(name), _) => DomainRef::Name(name),
            (None, Some(id)) => DomainRef::Id(id),
            (None, None) => DomainRef::Name("Default".into()),
        }
    }
}

/// Keystone v3 password credentials, named after the `OS_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Credentials {
    pub auth_url: String,
    pub username: String,
    pub password: String,
    pub project_name: String,
    pub user_domain: DomainRef,
    pub project_domain: DomainRef,
    pub region_name: Option<String>,
    pub interface: String,
}

impl Credentials {
    pub fn try_new_from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| lookup(key).ok_or(Error::MissingCredentials(key));
        Ok(Credentials {
            auth_url: required("OS_AUTH_URL")?,
            username: required("OS_USERNAME")?,
            password: required("OS_PASSWORD")?,
            project_name: required("OS_PROJECT_NAME")?,
            user_domain: DomainRef::from_vars(lookup("OS_USER_DOMAIN_NAME"), lookup("OS_USER_DOMAIN_ID")),
            project_domain: DomainRef::from_vars(lookup("OS_PROJECT_DOMAIN_NAME"), lookup("OS_PROJECT_DOMAIN_ID")),
            region_name: lookup("OS_REGION_NAME"),
            interface: lookup("OS_INTERFACE").unwrap_or_else(|| "public".into()),
        })
    }

    /// Token endpoint, accepting auth URLs with or without the `/v3` suffix.
    fn tokens_url(&self) -> String {
        let base = self.auth_url.trim_end_matches('/');
        let base = base.strip_suffix("/v3").unwrap_or(base);
        format!("{base}/v3/auth/tokens")
    }
}

/// An authenticated session: the token plus the endpoints it is valid for.
/// Every platform call is made through one of these.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub token: String,
    pub image_endpoint: String,
    pub coe_endpoint: String,
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    auth: AuthRequest<'a>,
}

#[derive(Serialize)]
struct AuthRequest<'a> {
    identity: Identity<'a>,
    scope: Scope<'a>,
}

#[derive(Serialize)]
struct Identity<'a> {
    methods: [&'a str; 1],
    password: Password<'a>,
}

#[derive(Serialize)]
struct Password<'a> {
    user: User<'a>,
}

#[derive(Serialize)]
struct User<'a> {
    name: &'a str,
    domain: Domain<'a>,
    password: &'a str,
}

#[derive(Serialize)]
struct Domain<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

impl<'a> From<&'a DomainRef> for Domain<'a> {
    fn from(domain: &'a DomainRef) -> Self {
        match domain {
            DomainRef::Id(id) => Domain {
                id: Some(id.as_str()),
                name: None,
            },
            DomainRef::Name(name) => Domain {
                id: None,
                name: Some(name.as_str()),
            },
        }
    }
}

#[derive(Serialize)]
struct Scope<'a> {
    project: Project<'a>,
}

#[derive(Serialize)]
struct Project<'a> {
    name: &'a str,
    domain: Domain<'a>,
}

#[derive(Deserialize, Debug)]
pub struct TokenResponse {
    pub token: Token,
}

#[derive(Deserialize, Debug)]
pub struct Token {
    #[serde(default)]
    pub catalog: Vec<CatalogEntry>,
}

#[derive(Deserialize, Debug)]
pub struct CatalogEntry {
    #[serde(rename = "type")]
    pub service_type: String,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
}

#[derive(Deserialize, Debug)]
pub struct Endpoint {
    pub interface: String,
    #[serde(default)]
    pub region_id: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    pub url: String,
}

impl Token {
    /// Find the URL of `service` for the given interface, and region if one is set.
    pub fn endpoint(&self, service: &'static str, interface: &str, region: Option<&str>) -> Result<String, Error> {
        self.catalog
            .iter()
            .filter(|entry| entry.service_type == service)
            .flat_map(|entry| entry.endpoints.iter())
            .filter(|endpoint| endpoint.interface == interface)
            .find(|endpoint| match region {
                None => true,
                Some(region) => {
                    endpoint.region_id.as_deref() == Some(region) || endpoint.region.as_deref() == Some(region)
                }
            })
            .map(|endpoint| endpoint.url.trim_end_matches('/').to_string())
            .ok_or_else(|| Error::EndpointNotFound {
                service,
                interface: interface.to_string(),
            })
    }
}

fn token_request(credentials: &Credentials) -> TokenRequest<'_> {
    TokenRequest {
        auth: AuthRequest {
            identity: Identity {
                methods: ["password"],
                password: Password {
                    user: User {
                        name: &credentials.username,
                        domain: Domain::from(&credentials.user_domain),
                        password: &credentials.password,
                    },
                },
            },
            scope: Scope {
                project: Project {
                    name: &credentials.project_name,
                    domain: Domain::from(&credentials.project_domain),
                },
            },
        },
    }
}

/// Authenticate against Keystone with a project-scoped password token.
pub async fn authenticate(credentials: &Credentials, timeout: Duration) -> Result<Session, Error> {
    let url = credentials.tokens_url();
    debug!("Requesting project-scoped token for {} from {url}", credentials.username);

    let client = reqwest::Client::builder().timeout(timeout).build()?;
    let resp = client.post(&url).json(&token_request(credentials)).send().await?;

    let status = resp.status().as_u16();
    if !resp.status().is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(Error::Status(status, body));
    }

    let token = resp
        .headers()
        .get("X-Subject-Token")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .ok_or(Error::MissingToken)?;
    let bytes = resp.bytes().await?;

    let body: TokenResponse = match serde_json::from_slice(&bytes) {
        Ok(body) => body,
        Err(_) => {
            let body = String::from_utf8_lossy(&bytes);
            return Err(Error::Deserialize(status, body.to_string()));
        }
    };

    let region = credentials.region_name.as_deref();
    let session = Session {
        image_endpoint: body.token.endpoint(IMAGE_SERVICE, &credentials.interface, region)?,
        coe_endpoint: body.token.endpoint(COE_SERVICE, &credentials.interface, region)?,
        token,
    };
    debug!("Image service at {}", session.image_endpoint);
    debug!("Container infrastructure service at {}", session.coe_endpoint);
    Ok(session)
}
