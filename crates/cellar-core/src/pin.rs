//! Pins: persisted "do not upgrade" markers, one JSON record per formula.

use std::io;
use std::path::{Path, PathBuf};

use cellar_schema::VersionedIdentity;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::formula::Formula;
use crate::layout::Layout;
use crate::persist::{escape_name, write_json_atomic};

/// A pin record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pin {
    /// Formula name.
    pub name: String,
    /// Version and revision held back at.
    #[serde(flatten)]
    pub identity: VersionedIdentity,
    /// RFC 3339 time the pin was written.
    pub pinned_at: String,
}

/// Pin failures.
#[derive(Error, Debug)]
pub enum PinError {
    /// Nothing installed to pin.
    #[error("{name} is not installed, so it cannot be pinned")]
    NotPinnable { name: String },

    /// The pin directory or a record could not be used.
    #[error("pin record {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A record exists but is not valid JSON.
    #[error("corrupt pin record {}: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Pin records under one directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinRegistry {
    root: PathBuf,
}

impl PinRegistry {
    /// Registry stored under `root`. Nothing is created yet.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Pin directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.json", escape_name(name)))
    }

    /// Pin `name` at `identity`. Re-pinning replaces the recorded identity.
    ///
    /// # Errors
    ///
    /// [`PinError::Io`] if the record cannot be written.
    pub fn pin(&self, name: &str, identity: &VersionedIdentity) -> Result<Pin, PinError> {
        let pin = Pin {
            name: name.to_string(),
            identity: identity.clone(),
            pinned_at: Utc::now().to_rfc3339(),
        };
        let path = self.record_path(name);
        write_json_atomic(&path, &pin).map_err(|source| PinError::Io { path, source })?;

        info!(formula = name, identity = %identity, "pinned");
        Ok(pin)
    }

    /// Remove the pin for `name`. Unpinned names are left alone.
    ///
    /// # Errors
    ///
    /// [`PinError::Io`] if an existing record cannot be removed.
    pub fn unpin(&self, name: &str) -> Result<(), PinError> {
        let path = self.record_path(name);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!(formula = name, "unpinned");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(formula = name, "unpin: not pinned");
                Ok(())
            }
            Err(source) => Err(PinError::Io { path, source }),
        }
    }

    /// Whether a pin record exists for `name`.
    pub fn is_pinned(&self, name: &str) -> bool {
        self.record_path(name).is_file()
    }

    /// The identity `name` is pinned at.
    ///
    /// # Errors
    ///
    /// [`PinError::Io`] or [`PinError::Corrupt`] if the record is unreadable.
    pub fn pinned_identity(&self, name: &str) -> Result<Option<VersionedIdentity>, PinError> {
        let path = self.record_path(name);
        let contents = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(PinError::Io { path, source }),
        };
        let pin: Pin =
            serde_json::from_str(&contents).map_err(|source| PinError::Corrupt { path, source })?;
        Ok(Some(pin.identity))
    }

    /// Every readable pin, sorted by name. Unreadable records are skipped.
    pub fn list(&self) -> Vec<Pin> {
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return Vec::new();
        };

        let mut pins: Vec<Pin> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|p| {
                let parsed = std::fs::read_to_string(&p)
                    .ok()
                    .and_then(|c| serde_json::from_str::<Pin>(&c).ok());
                if parsed.is_none() {
                    warn!(path = %p.display(), "skipping unreadable pin record");
                }
                parsed
            })
            .collect();
        pins.sort_by(|a, b| a.name.cmp(&b.name));
        pins
    }

    /// A formula can be pinned once something of it is installed.
    pub fn pinnable(&self, formula: &Formula, layout: &Layout) -> bool {
        layout.is_installed(formula) || !layout.installed_kegs(formula.name()).is_empty()
    }

    /// Pin `formula` at its highest installed keg.
    ///
    /// # Errors
    ///
    /// [`PinError::NotPinnable`] when no keg is installed.
    pub fn pin_installed(&self, formula: &Formula, layout: &Layout) -> Result<Pin, PinError> {
        let identity = layout
            .installed_kegs(formula.name())
            .pop()
            .ok_or_else(|| PinError::NotPinnable {
                name: formula.name().to_string(),
            })?;
        self.pin(formula.name(), &identity)
    }
}
