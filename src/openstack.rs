use crate::auth::Session;
use crate::image::ImageRecord;
use crate::platform::{Error, Platform};
use crate::template::{ClusterTemplateRecord, ClusterTemplateSpec};
use async_trait::async_trait;
use log::debug;
use serde::de::DeserializeOwned;
use std::time::Duration;

const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";
const API_VERSION_HEADER: &str = "OpenStack-API-Version";
const MAGNUM_API_VERSION: &str = "container-infra latest";

/// HTTP client for the Glance and Magnum APIs, bound to one authenticated session.
pub struct Client {
    http: reqwest::Client,
    session: Session,
}

impl Client {
    pub fn new(session: Session, timeout: Duration) -> Result<Self, Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, session })
    }

    fn coe_url(&self, path: &str) -> String {
        let base = self.session.coe_endpoint.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{base}{path}")
        } else {
            format!("{base}/v1{path}")
        }
    }

    fn magnum(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header(AUTH_TOKEN_HEADER, &self.session.token)
            .header(API_VERSION_HEADER, MAGNUM_API_VERSION)
    }

    async fn get<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder, url: &str) -> Result<T, Error> {
        let resp = request.send().await?;
        decode("GET", url, resp).await
    }
}

/// Turn a response into `T`, or into an error carrying the status code and body.
async fn decode<T: DeserializeOwned>(method: &'static str, url: &str, resp: reqwest::Response) -> Result<T, Error> {
    let status = resp.status();
    let bytes = resp.bytes().await?;

    if !status.is_success() {
        return Err(Error::Status {
            method,
            url: url.to_string(),
            code: status.as_u16(),
            body: String::from_utf8_lossy(&bytes).to_string(),
        });
    }

    match serde_json::from_slice(&bytes) {
        Ok(value) => Ok(value),
        Err(_) => {
            let body = String::from_utf8_lossy(&bytes);
            Err(Error::Deserialize(status.as_u16(), body.to_string()))
        }
    }
}

/// Resolve a pagination link against the service endpoint.
/// Glance returns links relative to the endpoint root, Magnum returns absolute ones.
fn next_url(endpoint: &str, next: &str) -> String {
    if next.starts_with("http://") || next.starts_with("https://") {
        next.to_string()
    } else {
        format!("{}/{}", endpoint.trim_end_matches('/'), next.trim_start_matches('/'))
    }
}

#[async_trait]
impl Platform for Client {
    async fn list_images(&self) -> Result<Vec<ImageRecord>, Error> {
        let endpoint = &self.session.image_endpoint;
        let mut url = next_url(endpoint, "/v2/images");
        let mut images = Vec::new();

        loop {
            debug!("GET {url}");
            let request = self.http.get(&url).header(AUTH_TOKEN_HEADER, &self.session.token);
            let page: wire::ImageList = self.get(request, &url).await?;
            images.extend(page.images.into_iter().map(ImageRecord::from));
            match page.next {
                Some(next) => url = next_url(endpoint, &next),
                None => break,
            }
        }

        Ok(images)
    }

    async fn create_template(&self, spec: &ClusterTemplateSpec) -> Result<ClusterTemplateRecord, Error> {
        let url = self.coe_url("/clustertemplates");
        debug!("POST {url}");
        let resp = self.magnum(self.http.post(&url)).json(spec).send().await?;
        decode("POST", &url, resp).await
    }

    async fn list_templates(&self) -> Result<Vec<ClusterTemplateRecord>, Error> {
        let endpoint = &self.session.coe_endpoint;
        let mut url = self.coe_url("/clustertemplates");
        let mut templates = Vec::new();

        loop {
            debug!("GET {url}");
            let page: wire::ClusterTemplateList = self.get(self.magnum(self.http.get(&url)), &url).await?;
            templates.extend(page.clustertemplates);
            match page.next {
                Some(next) => url = next_url(endpoint, &next),
                None => break,
            }
        }

        Ok(templates)
    }
}

mod wire {
    use crate::image::ImageRecord;
    use crate::template::ClusterTemplateRecord;
    use serde::Deserialize;

    #[derive(Deserialize)]
    pub struct Image {
        pub id: String,
        #[serde(default)]
        pub name: Option<String>,
    }

    #[derive(Deserialize)]
    pub struct ImageList {
        pub images: Vec<Image>,
        #[serde(default)]
        pub next: Option<String>,
    }

    #[derive(Deserialize)]
    pub struct ClusterTemplateList {
        pub clustertemplates: Vec<ClusterTemplateRecord>,
        #[serde(default)]
        pub next: Option<String>,
    }

    impl From<Image> for ImageRecord {
        fn from(image: Image) -> Self {
            ImageRecord {
                name: image.name.unwrap_or_default(),
                id: image.id,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_stub::{Reply, Stub};

    fn client(coe_endpoint: &str) -> Client {
        Client::new(
            Session {
                token: "gAAAA".into(),
                image_endpoint: "http://10.0.0.1/image".into(),
                coe_endpoint: coe_endpoint.into(),
            },
            Duration::from_secs(1),
        )
        .unwrap()
    }

    #[test]
    fn magnum_urls() {
        assert_eq!(
            client("http://10.0.0.1/container-infra/v1").coe_url("/clustertemplates"),
            "http://10.0.0.1/container-infra/v1/clustertemplates"
        );
        assert_eq!(
            client("http://10.0.0.1:9511/").coe_url("/clustertemplates"),
            "http://10.0.0.1:9511/v1/clustertemplates"
        );
    }

    #[test]
    fn pagination_links() {
        assert_eq!(
            next_url("http://10.0.0.1/image", "/v2/images?marker=abc"),
            "http://10.0.0.1/image/v2/images?marker=abc"
        );
        assert_eq!(
            next_url("http://10.0.0.1/container-infra/v1", "http://10.0.0.1/container-infra/v1/clustertemplates?marker=x"),
            "http://10.0.0.1/container-infra/v1/clustertemplates?marker=x"
        );
    }

    #[test]
    fn glance_image_list() {
        let page: wire::ImageList = serde_json::from_str(
            r#"{
                "images": [
                    {"id": "a1", "name": "cirros-0.6.2-x86_64-disk", "status": "active"},
                    {"id": "b2", "name": null, "status": "queued"},
                    {"id": "c3", "name": "fedora-coreos-38.20230806.3.0-openstack.x86_64", "status": "active"}
                ],
                "first": "/v2/images",
                "schema": "/v2/schemas/images",
                "next": "/v2/images?marker=c3"
            }"#,
        )
        .unwrap();

        let images: Vec<ImageRecord> = page.images.into_iter().map(ImageRecord::from).collect();
        assert_eq!(images.len(), 3);
        assert_eq!(images[1].name, "");
        assert_eq!(images[2].id, "c3");
        assert_eq!(page.next.as_deref(), Some("/v2/images?marker=c3"));
    }

    #[test]
    fn magnum_template_list() {
        let page: wire::ClusterTemplateList = serde_json::from_str(
            r#"{
                "clustertemplates": [
                    {
                        "uuid": "0562d357-8641-4759-8fed-8173f02c9633",
                        "name": "k8s-cluster-template",
                        "image_id": "fedora-coreos-38",
                        "coe": "kubernetes",
                        "links": []
                    }
                ]
            }"#,
        )
        .unwrap();

        assert!(page.next.is_none());
        assert_eq!(page.clustertemplates[0].name, "k8s-cluster-template");
        assert_eq!(page.clustertemplates[0].coe.as_deref(), Some("kubernetes"));
    }

    fn stub_client(base: &str) -> Client {
        Client::new(
            Session {
                token: "gAAAA".into(),
                image_endpoint: format!("{base}/image"),
                coe_endpoint: format!("{base}/container-infra/v1"),
            },
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn spec() -> ClusterTemplateSpec {
        let selection = crate::image::ImageSelection(ImageRecord {
            name: "fedora-coreos-38".into(),
            id: "c3".into(),
        });
        ClusterTemplateSpec::new(&crate::config::File::default().template, &selection)
    }

    #[tokio::test]
    async fn list_images_follows_relative_next_links() {
        let stub = Stub::bind().await;
        let stub = stub
            .route(
                "/image/v2/images",
                Reply::json(
                    200,
                    r#"{"images": [{"id": "a1", "name": "cirros"}], "next": "/v2/images?marker=a1"}"#,
                ),
            )
            .route(
                "/image/v2/images?marker=a1",
                Reply::json(200, r#"{"images": [{"id": "c3", "name": "fedora-coreos-38"}]}"#),
            );
        let client = stub_client(&stub.url());
        let requests = stub.start();

        let images = client.list_images().await.unwrap();
        assert_eq!(
            images.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(),
            vec!["a1", "c3"]
        );

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].path, "/image/v2/images?marker=a1");
        assert_eq!(requests[0].header("x-auth-token"), Some("gAAAA"));
    }

    #[tokio::test]
    async fn list_templates_follows_absolute_next_links() {
        let stub = Stub::bind().await;
        let base = stub.url();
        let stub = stub
            .route(
                "/container-infra/v1/clustertemplates",
                Reply::json(
                    200,
                    format!(
                        r#"{{"clustertemplates": [{{"uuid": "u1", "name": "swarm-template", "coe": "swarm"}}],
                            "next": "{base}/container-infra/v1/clustertemplates?limit=1&marker=u1"}}"#
                    ),
                ),
            )
            .route(
                "/container-infra/v1/clustertemplates?limit=1&marker=u1",
                Reply::json(
                    200,
                    r#"{"clustertemplates": [{"uuid": "u2", "name": "k8s-cluster-template", "coe": "kubernetes"}]}"#,
                ),
            );
        let client = stub_client(&base);
        let requests = stub.start();

        let templates = client.list_templates().await.unwrap();
        assert_eq!(templates.len(), 2);
        assert_eq!(templates[1].name, "k8s-cluster-template");

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        for request in requests.iter() {
            assert_eq!(request.method, "GET");
            assert_eq!(request.header("openstack-api-version"), Some(MAGNUM_API_VERSION));
        }
    }

    #[tokio::test]
    async fn create_template_posts_magnum_request() {
        let stub = Stub::bind().await.route(
            "/container-infra/v1/clustertemplates",
            Reply::json(
                201,
                r#"{"uuid": "0562d357", "name": "k8s-cluster-template", "image_id": "fedora-coreos-38", "coe": "kubernetes"}"#,
            ),
        );
        let client = stub_client(&stub.url());
        let requests = stub.start();

        let record = client.create_template(&spec()).await.unwrap();
        assert_eq!(record.uuid, "0562d357");

        let requests = requests.lock().unwrap();
        assert_eq!(requests[0].method, "POST");
        assert_eq!(requests[0].header("x-auth-token"), Some("gAAAA"));
        let body: serde_json::Value = serde_json::from_str(&requests[0].body).unwrap();
        assert_eq!(body["image_id"], "fedora-coreos-38");
        assert_eq!(body["keypair_id"], "mykey");
    }

    #[tokio::test]
    async fn conflict_on_create_keeps_status_and_body() {
        let stub = Stub::bind().await.route(
            "/container-infra/v1/clustertemplates",
            Reply::json(409, r#"{"errors": [{"title": "ClusterTemplate already exists"}]}"#),
        );
        let client = stub_client(&stub.url());
        stub.start();

        let err = client.create_template(&spec()).await.unwrap_err();
        match err {
            Error::Status { method, code, body, .. } => {
                assert_eq!(method, "POST");
                assert_eq!(code, 409);
                assert!(body.contains("already exists"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn unreadable_listing_is_a_deserialize_error() {
        let stub = Stub::bind()
            .await
            .route("/image/v2/images", Reply::json(200, "<html>maintenance</html>"));
        let client = stub_client(&stub.url());
        stub.start();

        let err = client.list_images().await.unwrap_err();
        assert!(matches!(err, Error::Deserialize(200, ref body) if body.contains("maintenance")));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let stub = Stub::bind()
            .await
            .route("/image/v2/images", Reply::json(503, "Service Unavailable"));
        let client = stub_client(&stub.url());
        stub.start();

        let err = client.list_images().await.unwrap_err();
        assert_eq!(err.status(), Some(503));
        assert!(err.is_transient());
    }
}
