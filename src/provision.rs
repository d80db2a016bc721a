use crate::config;
use crate::image::{self, ImageSelection};
use crate::platform::{self, Platform};
use crate::readiness;
use crate::template::{self, ClusterTemplateRecord, ClusterTemplateSpec, Registrar};
use log::{debug, info};
use std::fmt::{Display, Formatter};
use thiserror::Error;

/// The step that was running when a provisioning run failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Readiness,
    ResolveImage,
    RegisterTemplate,
    VerifyTemplate,
}

impl Display for Step {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Step::Readiness => "wait for platform",
            Step::ResolveImage => "resolve image",
            Step::RegisterTemplate => "register cluster template",
            Step::VerifyTemplate => "verify cluster template",
        })
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("wait for platform: {0}")]
    NotReady(#[from] readiness::Timeout),

    /// The catalog refused the listing with an error that retrying will not fix.
    #[error("list images: {0}")]
    ListImages(#[source] platform::Error),

    #[error("resolve image: {0}")]
    ResolveImage(#[from] image::Error),

    #[error("register cluster template: {0}")]
    Register(#[source] template::Error),

    #[error("verify cluster template: {0}")]
    Verify(#[source] template::Error),
}

impl Error {
    pub fn step(&self) -> Step {
        match self {
            Error::NotReady(_) => Step::Readiness,
            Error::ListImages(_) | Error::ResolveImage(_) => Step::ResolveImage,
            Error::Register(_) => Step::RegisterTemplate,
            Error::Verify(_) => Step::VerifyTemplate,
        }
    }

    /// Process exit code for a run that failed with this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::ListImages(_) => 1,
            Error::NotReady(_) => 2,
            Error::ResolveImage(_) => 3,
            Error::Register(_) => 4,
            Error::Verify(_) => 5,
        }
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub image: ImageSelection,
    pub template: ClusterTemplateRecord,
    /// The template already existed and was not created by this run.
    pub reused: bool,
}

/// Runs the provisioning steps against a platform, one after the other.
pub struct Provisioner<'a, P: Platform + ?Sized> {
    platform: &'a P,
    cfg: &'a config::File,
    readiness: readiness::Config,
}

impl<'a, P: Platform + ?Sized> Provisioner<'a, P> {
    pub fn new(platform: &'a P, cfg: &'a config::File) -> Self {
        Self {
            platform,
            cfg,
            readiness: readiness::Config::from(&cfg.readiness),
        }
    }

    #[cfg(test)]
    pub fn with_readiness(mut self, readiness: readiness::Config) -> Self {
        self.readiness = readiness;
        self
    }

    /// Poll the image catalog until it answers, and resolve the base image from the listing.
    pub async fn resolve_image(&self) -> Result<ImageSelection, Error> {
        info!("Waiting for the image catalog to become available");
        let catalog = readiness::wait_for(
            &self.readiness,
            "list images",
            platform::Error::is_transient,
            || self.platform.list_images(),
        )
        .await
        .map_err(|err| match err {
            readiness::Error::Timeout(timeout) => Error::NotReady(timeout),
            readiness::Error::Permanent(err) => Error::ListImages(err),
        })?;
        debug!("{} images in the catalog", catalog.len());

        let pattern = &self.cfg.image.pattern;
        let selection = image::resolve(&catalog, pattern)?;
        info!(
            "Using image '{}' ({}) matching '{pattern}'",
            selection.record().name,
            selection.record().id
        );
        Ok(selection)
    }

    /// Run every step: resolve the image, register the template and verify it.
    pub async fn run(self) -> Result<Report, Error> {
        let image = self.resolve_image().await?;
        let spec = ClusterTemplateSpec::new(&self.cfg.template, &image);
        let registrar = Registrar::new(self.platform);

        let existing = if self.cfg.template.reuse_existing {
            registrar.find(&spec.name).await.map_err(Error::Register)?
        } else {
            None
        };

        let (template, reused) = match existing {
            Some(template) => {
                info!(
                    "Cluster template '{}' already exists ({}), not creating it again",
                    template.name, template.uuid
                );
                (template, true)
            }
            None => {
                let template = registrar.register(&spec).await.map_err(Error::Register)?;
                info!("Cluster template '{}' created with uuid {}", template.name, template.uuid);
                (template, false)
            }
        };

        if !registrar.verify(&spec.name).await.map_err(Error::Verify)? {
            return Err(Error::Verify(template::Error::VerificationMismatch(spec.name)));
        }
        info!("Cluster template '{}' is listed by the platform", spec.name);

        Ok(Report {
            image,
            template,
            reused,
        })
    }
}
