use crate::image::ImageRecord;
use crate::template::{ClusterTemplateRecord, ClusterTemplateSpec};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("reqwest: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("{method} {url} returned {code}: {body}")]
    Status {
        method: &'static str,
        url: String,
        code: u16,
        body: String,
    },

    #[error("code: {0}, body: {1}")]
    Deserialize(u16, String),
}

impl Error {
    /// HTTP status code of the failed request, if the platform answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Reqwest(err) => err.status().map(|s| s.as_u16()),
            Error::Status { code, .. } => Some(*code),
            Error::Deserialize(code, _) => Some(*code),
        }
    }

    /// Connection failures and server-side errors, which may go away while the platform starts.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Reqwest(_) => true,
            Error::Status { code, .. } => *code >= 500,
            Error::Deserialize(..) => false,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self.status(), Some(401) | Some(403))
    }
}

/// The platform APIs used during provisioning.
///
/// Implemented by the OpenStack HTTP client, and by in-memory platforms in tests.
#[async_trait]
pub trait Platform: Send + Sync {
    /// List all images in the image catalog, in the order the catalog returns them.
    async fn list_images(&self) -> Result<Vec<ImageRecord>, Error>;

    /// Submit a single cluster template creation request.
    async fn create_template(&self, spec: &ClusterTemplateSpec) -> Result<ClusterTemplateRecord, Error>;

    /// List all cluster templates known to the platform.
    async fn list_templates(&self) -> Result<Vec<ClusterTemplateRecord>, Error>;
}
