//! Bulk loading of a directory of definition documents.
//!
//! A broken definition is logged and skipped: one bad file must not make
//! every other formula unusable.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use cellar_schema::{FormulaDefinition, Variant};
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::expand::FormulaResolver;
use crate::formula::Formula;

/// Catalog failures. Only the directory itself can fail a load.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("formula directory {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn load_one(path: &Path, requested: Option<Variant>) -> anyhow::Result<Formula> {
    let mut def = FormulaDefinition::from_file(path)?;
    if def.name.is_empty()
        && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
    {
        def.name = stem.to_string();
    }
    Ok(Formula::new(def, requested)?)
}

/// Every valid formula in `dir` (`*.toml`, not recursive), sorted by name.
///
/// # Errors
///
/// [`CatalogError::Io`] if `dir` cannot be read. Broken entries are skipped.
pub fn load_all(dir: &Path, requested: Option<Variant>) -> Result<Vec<Formula>, CatalogError> {
    if let Err(source) = std::fs::read_dir(dir) {
        return Err(CatalogError::Io {
            path: dir.to_path_buf(),
            source,
        });
    }

    let mut formulae: Vec<Formula> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "toml"))
        .filter_map(|e| match load_one(e.path(), requested) {
            Ok(formula) => Some(formula),
            Err(err) => {
                warn!(path = %e.path().display(), error = %format!("{err:#}"), "skipping broken formula");
                None
            }
        })
        .collect();

    formulae.sort_by(|a, b| a.name().cmp(b.name()));
    debug!(dir = %dir.display(), count = formulae.len(), "loaded formulae");
    Ok(formulae)
}

/// Formulae by name.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    formulae: BTreeMap<String, Formula>,
}

impl Catalog {
    /// Load every valid formula in `dir`.
    ///
    /// # Errors
    ///
    /// See [`load_all`].
    pub fn load(dir: &Path, requested: Option<Variant>) -> Result<Self, CatalogError> {
        Ok(load_all(dir, requested)?.into_iter().collect())
    }

    pub fn get(&self, name: &str) -> Option<&Formula> {
        self.formulae.get(name)
    }

    /// Names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.formulae.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.formulae.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formulae.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Formula> {
        self.formulae.values()
    }
}

impl FromIterator<Formula> for Catalog {
    fn from_iter<I: IntoIterator<Item = Formula>>(iter: I) -> Self {
        Self {
            formulae: iter
                .into_iter()
                .map(|f| (f.name().to_string(), f))
                .collect(),
        }
    }
}

impl FormulaResolver for Catalog {
    fn resolve(&self, name: &str) -> Option<Formula> {
        self.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, file: &str, body: &str) {
        std::fs::write(dir.join(file), body).unwrap();
    }

    #[test]
    fn test_load_all_skips_broken() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "zlib.toml",
            "name = \"zlib\"\n[stable]\nurl = \"https://zlib.net/zlib-1.3.1.tar.gz\"\n",
        );
        write(
            dir.path(),
            "curl.toml",
            "name = \"curl\"\n[stable]\nurl = \"https://curl.se/download/curl-8.5.0.tar.gz\"\n",
        );
        write(dir.path(), "garbage.toml", "name = [\n");
        write(
            dir.path(),
            "nourl.toml",
            "name = \"nourl\"\n[stable]\nurl = \"\"\n",
        );
        write(dir.path(), "README.md", "not a formula");

        let formulae = load_all(dir.path(), None).unwrap();
        let names: Vec<&str> = formulae.iter().map(Formula::name).collect();
        assert_eq!(names, vec!["curl", "zlib"]);
        assert_eq!(formulae[1].version().as_str(), "1.3.1");
        assert_eq!(formulae[1].path(), dir.path().join("zlib.toml"));
    }

    #[test]
    fn test_name_defaults_to_file_stem() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "jq.toml",
            "[stable]\nurl = \"https://example.com/jq-1.7.tar.gz\"\n",
        );
        let catalog = Catalog::load(dir.path(), None).unwrap();
        assert!(catalog.get("jq").is_some());
    }

    #[test]
    fn test_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_all(&dir.path().join("nope"), None),
            Err(CatalogError::Io { .. })
        ));
    }

    #[test]
    fn test_resolver() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "a.toml",
            "name = \"a\"\n[stable]\nurl = \"https://e.com/a-1.0.tar.gz\"\n[[stable.dependencies]]\nname = \"b\"\n",
        );
        write(
            dir.path(),
            "b.toml",
            "name = \"b\"\n[stable]\nurl = \"https://e.com/b-2.0.tar.gz\"\n",
        );
        let catalog = Catalog::load(dir.path(), None).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.resolve("b").unwrap().version().as_str(), "2.0");
        assert!(catalog.resolve("c").is_none());
    }
}
