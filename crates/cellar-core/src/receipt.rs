//! `INSTALL_RECEIPT.json`: how a keg was produced.

use std::io;
use std::path::Path;

use cellar_schema::Variant;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::formula::Formula;
use crate::layout::Keg;
use crate::options::BuildOptions;
use crate::persist::write_json_atomic;

/// Install-time facts recorded inside a keg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallReceipt {
    /// Flags the user passed.
    #[serde(default)]
    pub used_options: Vec<String>,
    /// Declared options that were not passed.
    #[serde(default)]
    pub unused_options: Vec<String>,
    /// Built with the intent of producing a bottle.
    #[serde(default)]
    pub built_as_bottle: bool,
    /// Installed from a bottle rather than built.
    #[serde(default)]
    pub poured_from_bottle: bool,
    /// Variant the keg was built from.
    pub source_variant: Variant,
    /// RFC 3339 install time.
    pub installed_at: String,
}

impl InstallReceipt {
    /// Receipt for installing `formula` with `options`.
    pub fn for_build(formula: &Formula, options: &BuildOptions, poured_from_bottle: bool) -> Self {
        Self {
            used_options: options.used().map(|o| format!("--{o}")).collect(),
            unused_options: options
                .unused_options(formula.active_spec())
                .into_iter()
                .map(|o| format!("--{o}"))
                .collect(),
            built_as_bottle: false,
            poured_from_bottle,
            source_variant: formula.active_variant(),
            installed_at: Utc::now().to_rfc3339(),
        }
    }

    /// Write into `keg`, replacing any previous receipt.
    ///
    /// # Errors
    ///
    /// Fails if the keg directory cannot be written.
    pub fn write(&self, keg: &Keg) -> io::Result<()> {
        write_json_atomic(&keg.receipt_path(), self)
    }

    /// Read the receipt of `keg`, if it has a valid one.
    pub fn read(keg: &Keg) -> Option<Self> {
        Self::read_path(&keg.receipt_path())
    }

    fn read_path(path: &Path) -> Option<Self> {
        let contents = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&contents).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Layout;
    use cellar_schema::{BuildOption, FormulaDefinition, SoftwareSpec, VersionedIdentity};

    #[test]
    fn test_write_read() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path(), dir.path().join("Cellar"));
        let spec = SoftwareSpec::new("https://example.com/foo-1.0.tar.gz")
            .option(BuildOption::new("with-ssl", "Build with SSL"))
            .option(BuildOption::new("with-docs", "Build docs"));
        let foo = Formula::from_definition(FormulaDefinition::new("foo").with_spec(Variant::Stable, spec))
            .unwrap();
        let options = BuildOptions::new().with_flag("--with-ssl");

        let receipt = InstallReceipt::for_build(&foo, &options, false);
        assert_eq!(receipt.used_options, vec!["--with-ssl"]);
        assert_eq!(receipt.unused_options, vec!["--with-docs"]);

        let keg = layout.keg("foo", &VersionedIdentity::new("1.0", 0));
        receipt.write(&keg).unwrap();
        assert_eq!(InstallReceipt::read(&keg), Some(receipt));
    }

    #[test]
    fn test_missing_receipt() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path(), dir.path().join("Cellar"));
        let keg = layout.keg("foo", &VersionedIdentity::new("1.0", 0));
        assert_eq!(InstallReceipt::read(&keg), None);
    }
}
