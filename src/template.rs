use crate::config;
use crate::image::ImageSelection;
use crate::platform::{self, Platform};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("cluster template field `{0}` is empty")]
    InvalidSpec(&'static str),

    #[error("platform rejected cluster template '{name}': {source}")]
    TemplateCreationRejected {
        name: String,
        #[source]
        source: platform::Error,
    },

    #[error("list cluster templates: {0}")]
    ListTemplates(#[source] platform::Error),

    #[error("cluster template '{0}' was created but is missing from the template listing")]
    VerificationMismatch(String),
}

/// Cluster template creation request.
///
/// Field names on the wire follow the Magnum API.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ClusterTemplateSpec {
    pub name: String,
    #[serde(rename = "image_id")]
    pub image: String,
    #[serde(rename = "keypair_id")]
    pub keypair: String,
    #[serde(rename = "external_network_id")]
    pub external_network: String,
    pub dns_nameserver: String,
    #[serde(rename = "master_flavor_id")]
    pub master_flavor: String,
    #[serde(rename = "flavor_id")]
    pub flavor: String,
    pub docker_volume_size: u32,
    pub network_driver: String,
    pub coe: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl ClusterTemplateSpec {
    pub fn new(cfg: &config::Template, image: &ImageSelection) -> Self {
        Self {
            name: cfg.name.clone(),
            image: image.reference().to_string(),
            keypair: cfg.keypair.clone(),
            external_network: cfg.external_network.clone(),
            dns_nameserver: cfg.dns_nameserver.clone(),
            master_flavor: cfg.master_flavor.clone(),
            flavor: cfg.flavor.clone(),
            docker_volume_size: cfg.docker_volume_size,
            network_driver: cfg.network_driver.clone(),
            coe: cfg.coe.clone(),
            labels: cfg.labels.clone(),
        }
    }

    /// Reject specs that must never reach the platform.
    pub fn validate(&self) -> Result<(), Error> {
        let required = [
            ("name", &self.name),
            ("image", &self.image),
            ("keypair", &self.keypair),
            ("external_network", &self.external_network),
            ("dns_nameserver", &self.dns_nameserver),
            ("master_flavor", &self.master_flavor),
            ("flavor", &self.flavor),
            ("network_driver", &self.network_driver),
            ("coe", &self.coe),
        ];
        if let Some((field, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(Error::InvalidSpec(*field));
        }
        if self.docker_volume_size == 0 {
            return Err(Error::InvalidSpec("docker_volume_size"));
        }
        Ok(())
    }
}

/// A cluster template as stored by the platform.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ClusterTemplateRecord {
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub image_id: Option<String>,
    #[serde(default)]
    pub coe: Option<String>,
}

/// Creates cluster templates and confirms they are visible.
pub struct Registrar<'a, P: Platform + ?Sized> {
    platform: &'a P,
}

impl<'a, P: Platform + ?Sized> Registrar<'a, P> {
    pub fn new(platform: &'a P) -> Self {
        Self { platform }
    }

    /// Submit one creation request.
    ///
    /// There is no lookup of an existing template with the same name first:
    /// a duplicate is reported as [Error::TemplateCreationRejected].
    pub async fn register(&self, spec: &ClusterTemplateSpec) -> Result<ClusterTemplateRecord, Error> {
        spec.validate()?;

        info!(
            "Creating cluster template '{}' with image '{}' ({} master, {} worker, {} GB volume, {} networking)",
            spec.name, spec.image, spec.master_flavor, spec.flavor, spec.docker_volume_size, spec.network_driver
        );

        self.platform
            .create_template(spec)
            .await
            .map_err(|source| {
                if source.is_unauthorized() {
                    warn!("Creating cluster templates requires a user with the admin role in the current project");
                }
                Error::TemplateCreationRejected {
                    name: spec.name.clone(),
                    source,
                }
            })
    }

    /// Returns the template named `name`, if the platform lists one.
    pub async fn find(&self, name: &str) -> Result<Option<ClusterTemplateRecord>, Error> {
        let templates = self.platform.list_templates().await.map_err(Error::ListTemplates)?;
        debug!("{} cluster templates found", templates.len());
        Ok(templates.into_iter().find(|t| t.name == name))
    }

    /// Check that a template named `name` shows up in the template listing.
    pub async fn verify(&self, name: &str) -> Result<bool, Error> {
        Ok(self.find(name).await?.is_some())
    }
}
