//! Formula definition documents.
//!
//! A definition is the plain data the recipe loader hands to the engine.
//! On disk it is TOML:
//!
//! ```toml
//! name = "hello"
//! homepage = "https://www.gnu.org/software/hello/"
//! revision = 1
//!
//! [stable]
//! url = "https://ftp.gnu.org/gnu/hello/hello-2.12.1.tar.gz"
//! bottle = true
//!
//! [[stable.dependencies]]
//! name = "gettext"
//! tags = ["recommended"]
//!
//! [head]
//! url = "https://git.savannah.gnu.org/git/hello.git"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::spec::{SoftwareSpec, Variant};

/// Errors that can occur when loading a definition document.
#[derive(Error, Debug)]
pub enum DefinitionError {
    /// The file could not be read.
    #[error("IO error reading {path}: {source}")]
    Io {
        /// File being read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The TOML content did not match the definition schema.
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loader output: every field a formula declares, before selection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FormulaDefinition {
    /// Formula name. Loaders may fill it from the file name when absent.
    #[serde(default)]
    pub name: String,
    /// Where the definition was read from; empty for in-memory definitions.
    #[serde(skip)]
    pub path: PathBuf,
    /// Project homepage.
    #[serde(default)]
    pub homepage: Option<String>,
    /// Packaging revision, bumped when the build changes but the version does not.
    #[serde(default)]
    pub revision: u32,
    /// Released source.
    #[serde(default)]
    pub stable: Option<SoftwareSpec>,
    /// Pre-release source.
    #[serde(default)]
    pub devel: Option<SoftwareSpec>,
    /// Repository tip.
    #[serde(default)]
    pub head: Option<SoftwareSpec>,
    /// Why the formula is not linked into the prefix, if it is keg-only.
    #[serde(default)]
    pub keg_only: Option<String>,
    /// Formulae that cannot be installed alongside this one.
    #[serde(default)]
    pub conflicts: Vec<String>,
    /// Post-install notes for users.
    #[serde(default)]
    pub caveats: Option<String>,
    /// The recipe defines a test block.
    #[serde(default)]
    pub has_test: bool,
    /// The recipe defines a post-install block.
    #[serde(default)]
    pub has_post_install: bool,
}

impl FormulaDefinition {
    /// An empty definition named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the spec for `variant`.
    pub fn with_spec(mut self, variant: Variant, spec: SoftwareSpec) -> Self {
        *self.slot_mut(variant) = Some(spec);
        self
    }

    /// The spec declared for `variant`, if any.
    pub fn spec(&self, variant: Variant) -> Option<&SoftwareSpec> {
        match variant {
            Variant::Stable => self.stable.as_ref(),
            Variant::Devel => self.devel.as_ref(),
            Variant::Head => self.head.as_ref(),
        }
    }

    fn slot_mut(&mut self, variant: Variant) -> &mut Option<SoftwareSpec> {
        match variant {
            Variant::Stable => &mut self.stable,
            Variant::Devel => &mut self.devel,
            Variant::Head => &mut self.head,
        }
    }

    /// Parse a definition from a TOML file on disk, recording its path.
    ///
    /// # Errors
    ///
    /// Returns `DefinitionError::Io` if the file cannot be read, or
    /// `DefinitionError::Parse` if the TOML content is invalid.
    pub fn from_file(path: &Path) -> Result<Self, DefinitionError> {
        let content = fs::read_to_string(path).map_err(|source| DefinitionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut def = Self::parse(&content)?;
        def.path = path.to_path_buf();
        Ok(def)
    }

    /// Parse a definition from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `DefinitionError::Parse` if the TOML content is invalid or does
    /// not match the expected schema.
    pub fn parse(content: &str) -> Result<Self, DefinitionError> {
        Ok(toml::from_str(content)?)
    }
}
