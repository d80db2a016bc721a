use serde::{Deserialize, Serialize};
use serde_inline_default::serde_inline_default;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG: &str = include_str!("../default.toml");

/// Container orchestration engines known to Magnum.
const SUPPORTED_COE: [&str; 3] = ["kubernetes", "swarm", "mesos"];

const MAX_READINESS_TIMEOUT_SECS: u64 = 24 * 60 * 60;
const MAX_BACKOFF_DELAY_SECS: u64 = 60 * 60;
const MAX_HTTP_TIMEOUT_SECS: u64 = 60 * 60;

#[derive(Error, Debug)]
pub enum Error {
    #[error("read {path}: {err}")]
    ReadFile {
        err: std::io::Error,
        path: String,
    },

    #[error("parse: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for `{field}`: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

/// A coe-setup.toml file.
#[derive(Deserialize, Debug, Clone)]
pub struct File {
    pub description: Option<String>,
    pub log_file: Option<String>,
    pub image: Image,
    pub template: Template,
    pub readiness: Readiness,
    #[serde(default)]
    pub http: Http,
}

impl Default for File {
    fn default() -> Self {
        // The default config is compiled into the program, so
        // make sure to test default() to catch panics compile-time.
        toml::from_str(DEFAULT_CONFIG).unwrap()
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct Image {
    pub pattern: String,
}

/// Infrastructure parameters of the cluster template.
/// Everything except the image, which is resolved at runtime.
#[serde_inline_default]
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Template {
    pub name: String,
    pub keypair: String,
    pub external_network: String,
    pub dns_nameserver: String,
    pub master_flavor: String,
    pub flavor: String,
    pub docker_volume_size: u32,
    pub network_driver: String,
    pub coe: String,
    #[serde(default = "BTreeMap::new")]
    pub labels: BTreeMap<String, String>,
    /// Skip creation when a template with the same name already exists.
    #[serde_inline_default(false)]
    pub reuse_existing: bool,
}

#[serde_inline_default]
#[derive(Deserialize, Debug, Clone)]
pub struct Readiness {
    #[serde_inline_default(5)]
    pub initial_delay_secs: u64,
    #[serde_inline_default(60)]
    pub max_delay_secs: u64,
    #[serde_inline_default(900)]
    pub timeout_secs: u64,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Http {
    pub timeout_secs: u64,
}

impl Default for Http {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

impl File {
    /// Load the built-in defaults and overlay the user's file on top of them.
    /// Tables are merged key by key, so a user file only needs the keys it changes.
    pub fn default_with_user_config_file(path: &str) -> Result<Self, Error> {
        let user = std::fs::read_to_string(path).map_err(|err| Error::ReadFile {
            err,
            path: path.to_string(),
        })?;
        Self::default_with_user_config(&user)
    }

    pub fn default_with_user_config(user: &str) -> Result<Self, Error> {
        let mut merged: toml::Table = toml::from_str(DEFAULT_CONFIG)?;
        let user: toml::Table = toml::from_str(user)?;
        merge(&mut merged, user);
        let file: Self = toml::Value::Table(merged).try_into()?;
        file.validate()?;
        Ok(file)
    }

    pub fn validate(&self) -> Result<(), Error> {
        not_empty("image.pattern", &self.image.pattern)?;

        let t = &self.template;
        not_empty("template.name", &t.name)?;
        not_empty("template.keypair", &t.keypair)?;
        not_empty("template.external_network", &t.external_network)?;
        not_empty("template.dns_nameserver", &t.dns_nameserver)?;
        not_empty("template.master_flavor", &t.master_flavor)?;
        not_empty("template.flavor", &t.flavor)?;
        not_empty("template.network_driver", &t.network_driver)?;
        if t.docker_volume_size == 0 {
            return Err(invalid("template.docker_volume_size", "must be at least 1 GB"));
        }
        if !SUPPORTED_COE.contains(&t.coe.as_str()) {
            return Err(invalid(
                "template.coe",
                &format!("'{}' is not one of {}", t.coe, SUPPORTED_COE.join(", ")),
            ));
        }

        let r = &self.readiness;
        if r.initial_delay_secs == 0 {
            return Err(invalid("readiness.initial_delay_secs", "must be positive"));
        }
        if r.max_delay_secs < r.initial_delay_secs {
            return Err(invalid(
                "readiness.max_delay_secs",
                "must not be smaller than readiness.initial_delay_secs",
            ));
        }
        if r.max_delay_secs > MAX_BACKOFF_DELAY_SECS {
            return Err(invalid(
                "readiness.max_delay_secs",
                &format!("must not exceed {MAX_BACKOFF_DELAY_SECS}"),
            ));
        }
        if r.timeout_secs == 0 {
            return Err(invalid("readiness.timeout_secs", "must be positive"));
        }
        if r.timeout_secs > MAX_READINESS_TIMEOUT_SECS {
            return Err(invalid(
                "readiness.timeout_secs",
                &format!("must not exceed {MAX_READINESS_TIMEOUT_SECS}"),
            ));
        }
        if self.http.timeout_secs == 0 {
            return Err(invalid("http.timeout_secs", "must be positive"));
        }
        if self.http.timeout_secs > MAX_HTTP_TIMEOUT_SECS {
            return Err(invalid(
                "http.timeout_secs",
                &format!("must not exceed {MAX_HTTP_TIMEOUT_SECS}"),
            ));
        }
        Ok(())
    }
}

impl Readiness {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn merge(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(base_table)), toml::Value::Table(overlay_table)) => {
                merge(base_table, overlay_table)
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

fn not_empty(field: &'static str, value: &str) -> Result<(), Error> {
    if value.trim().is_empty() {
        Err(invalid(field, "must not be empty"))
    } else {
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> Error {
    Error::Invalid {
        field,
        reason: reason.to_string(),
    }
}
