//! Gate on the outcome of an external download and checksum step.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// The downloaded artifact did not verify.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("integrity check failed for {}", path.display())]
pub struct IntegrityError {
    /// Artifact that failed.
    pub path: PathBuf,
}

/// A downloaded source or bottle plus its verification result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedArtifact {
    /// Local path of the download.
    pub path: PathBuf,
    /// Whether the checksum matched.
    pub verified: bool,
}

impl FetchedArtifact {
    /// Record a fetch result.
    pub fn new(path: impl Into<PathBuf>, verified: bool) -> Self {
        Self {
            path: path.into(),
            verified,
        }
    }

    /// The artifact path, only if it verified.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError`] when `verified` is false.
    pub fn require_verified(&self) -> Result<&Path, IntegrityError> {
        if self.verified {
            Ok(&self.path)
        } else {
            Err(IntegrityError {
                path: self.path.clone(),
            })
        }
    }
}
