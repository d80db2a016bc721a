use log::{debug, warn};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum Error {
    #[error("no image in the catalog matches '{pattern}'; upload the base image before configuring Magnum")]
    ImageNotFound { pattern: String },
}

/// An image registered in the platform's image catalog.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ImageRecord {
    pub name: String,
    pub id: String,
}

/// The image chosen as the base OS for the cluster template.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageSelection(pub ImageRecord);

impl ImageSelection {
    /// Name used as the template's image reference.
    /// The platform resolves it to an id on its own.
    pub fn reference(&self) -> &str {
        &self.0.name
    }

    pub fn record(&self) -> &ImageRecord {
        &self.0
    }
}

/// Returns true if the image name contains `pattern`, case-sensitive.
pub fn matches(record: &ImageRecord, pattern: &str) -> bool {
    record.name.contains(pattern)
}

/// Select the first image in catalog order whose name contains `pattern`.
///
/// Catalog order is taken as-is from the platform. No version comparison is done,
/// so when several images match, the first one listed wins.
pub fn resolve(catalog: &[ImageRecord], pattern: &str) -> Result<ImageSelection, Error> {
    debug!("{} images found in catalog", catalog.len());

    let candidates = catalog
        .iter()
        .filter(|record| matches(record, pattern))
        .inspect(|record| debug!("Possible image candidate: {} ({})", record.name, record.id))
        .collect::<Vec<_>>();

    let selected = candidates.first().ok_or_else(|| Error::ImageNotFound {
        pattern: pattern.to_string(),
    })?;

    if candidates.len() > 1 {
        let names = candidates.iter().map(|r| r.name.as_str()).collect::<Vec<_>>();
        warn!(
            "{} images match '{pattern}' ({}); using '{}' by listing order",
            candidates.len(),
            names.join(", "),
            selected.name
        );
    }

    Ok(ImageSelection((*selected).clone()))
}
