//! On-disk locations of racks, kegs and the shared prefix.
//!
//! Everything here is a pure path computation except the installed-state
//! queries, which only read directories.
//!
//! ```text
//! <prefix>/opt/<name>                 stable alias, no version
//! <prefix>/etc, <prefix>/var          shared across versions
//! <cellar>/<name>                     rack
//! <cellar>/<name>/<version>[_<rev>]   keg
//! ```

use std::path::{Path, PathBuf};

use cellar_schema::{Variant, VersionedIdentity};
use tracing::trace;
use walkdir::WalkDir;

use crate::formula::Formula;

/// Receipt file written into each keg.
pub const RECEIPT_FILE: &str = "INSTALL_RECEIPT.json";

/// Roots for one installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    prefix: PathBuf,
    cellar: PathBuf,
}

impl Layout {
    /// Layout over an install prefix and a cellar.
    pub fn new(prefix: impl Into<PathBuf>, cellar: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
            cellar: cellar.into(),
        }
    }

    /// Install prefix.
    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    /// Cellar root.
    pub fn cellar(&self) -> &Path {
        &self.cellar
    }

    /// Directory holding every installed version of `name`.
    pub fn rack(&self, name: &str) -> PathBuf {
        self.cellar.join(name)
    }

    /// One installed version of `name`.
    pub fn keg(&self, name: &str, identity: &VersionedIdentity) -> Keg {
        Keg {
            name: name.to_string(),
            path: self.rack(name).join(identity.to_string()),
        }
    }

    /// Version-independent alias other formulae link against.
    pub fn opt_prefix(&self, name: &str) -> PathBuf {
        self.prefix.join("opt").join(name)
    }

    /// Shared configuration directory; survives upgrades.
    pub fn etc(&self) -> PathBuf {
        self.prefix.join("etc")
    }

    /// Shared state directory; survives upgrades.
    pub fn var(&self) -> PathBuf {
        self.prefix.join("var")
    }

    /// The keg that counts as installed for `formula`.
    ///
    /// Probes head, devel, then stable and returns the first whose directory
    /// exists. If none does, the stable keg (or the active one, for a formula
    /// without a stable spec).
    pub fn installed_prefix(&self, formula: &Formula) -> Keg {
        for variant in Variant::INSTALLED_PRIORITY {
            if let Some(identity) = formula.identity_for(variant) {
                let keg = self.keg(formula.name(), &identity);
                if keg.path().is_dir() {
                    trace!(formula = formula.name(), %variant, "installed keg found");
                    return keg;
                }
            }
        }

        let fallback = formula
            .identity_for(Variant::Stable)
            .unwrap_or_else(|| formula.identity().clone());
        self.keg(formula.name(), &fallback)
    }

    /// Whether the keg [`installed_prefix`](Self::installed_prefix) picks is
    /// a non-empty directory.
    pub fn is_installed(&self, formula: &Formula) -> bool {
        self.installed_prefix(formula).is_populated()
    }

    /// Populated kegs of `name`, lowest version first.
    pub fn installed_kegs(&self, name: &str) -> Vec<VersionedIdentity> {
        let rack = self.rack(name);
        let mut kegs: Vec<VersionedIdentity> = WalkDir::new(&rack)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_dir())
            .filter(|e| is_non_empty_dir(e.path()))
            .filter_map(|e| e.file_name().to_str()?.parse().ok())
            .collect();
        kegs.sort();
        kegs
    }
}

fn is_non_empty_dir(path: &Path) -> bool {
    std::fs::read_dir(path)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

/// One versioned install directory and its standard subdirectories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keg {
    name: String,
    path: PathBuf,
}

impl Keg {
    /// Keg root.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Formula name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The rack this keg lives in.
    pub fn rack(&self) -> &Path {
        self.path.parent().unwrap_or(&self.path)
    }

    /// Version and revision from the directory name.
    pub fn identity(&self) -> Option<VersionedIdentity> {
        self.path.file_name()?.to_str()?.parse().ok()
    }

    /// Exists and holds at least one entry.
    pub fn is_populated(&self) -> bool {
        is_non_empty_dir(&self.path)
    }

    pub fn bin(&self) -> PathBuf {
        self.path.join("bin")
    }

    pub fn sbin(&self) -> PathBuf {
        self.path.join("sbin")
    }

    pub fn lib(&self) -> PathBuf {
        self.path.join("lib")
    }

    pub fn libexec(&self) -> PathBuf {
        self.path.join("libexec")
    }

    pub fn include(&self) -> PathBuf {
        self.path.join("include")
    }

    pub fn share(&self) -> PathBuf {
        self.path.join("share")
    }

    /// `share/<name>`.
    pub fn pkgshare(&self) -> PathBuf {
        self.share().join(&self.name)
    }

    /// `share/doc/<name>`.
    pub fn doc(&self) -> PathBuf {
        self.share().join("doc").join(&self.name)
    }

    pub fn info(&self) -> PathBuf {
        self.share().join("info")
    }

    pub fn man(&self) -> PathBuf {
        self.share().join("man")
    }

    /// `share/man/man<section>`.
    pub fn man_n(&self, section: u8) -> PathBuf {
        self.man().join(format!("man{section}"))
    }

    /// Every `man1`..`man8` directory.
    pub fn man_sections(&self) -> Vec<PathBuf> {
        (1..=8).map(|n| self.man_n(n)).collect()
    }

    /// macOS framework bundles.
    pub fn frameworks(&self) -> PathBuf {
        self.path.join("Frameworks")
    }

    /// macOS kernel extensions.
    pub fn kext_prefix(&self) -> PathBuf {
        self.path.join("Library").join("Extensions")
    }

    pub fn receipt_path(&self) -> PathBuf {
        self.path.join(RECEIPT_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellar_schema::{FormulaDefinition, SoftwareSpec};

    fn formula_all_variants() -> Formula {
        let def = FormulaDefinition::new("foo")
            .with_spec(Variant::Head, SoftwareSpec::new("https://git.example.com/foo.git"))
            .with_spec(Variant::Devel, SoftwareSpec::new("https://example.com/foo-2.0b1.tar.gz"))
            .with_spec(Variant::Stable, SoftwareSpec::new("https://example.com/foo-1.0.tar.gz"));
        Formula::from_definition(def).unwrap()
    }

    fn populate(path: &Path) {
        std::fs::create_dir_all(path.join("bin")).unwrap();
    }

    #[test]
    fn test_paths() {
        let layout = Layout::new("/usr/local", "/usr/local/Cellar");
        let keg = layout.keg("wget", &VersionedIdentity::new("1.21", 1));

        assert_eq!(keg.path(), Path::new("/usr/local/Cellar/wget/1.21_1"));
        assert_eq!(keg.rack(), Path::new("/usr/local/Cellar/wget"));
        assert_eq!(keg.bin(), PathBuf::from("/usr/local/Cellar/wget/1.21_1/bin"));
        assert_eq!(
            keg.man_n(1),
            PathBuf::from("/usr/local/Cellar/wget/1.21_1/share/man/man1")
        );
        assert_eq!(
            keg.pkgshare(),
            PathBuf::from("/usr/local/Cellar/wget/1.21_1/share/wget")
        );
        assert_eq!(keg.man_sections().len(), 8);
        assert_eq!(keg.identity(), Some(VersionedIdentity::new("1.21", 1)));

        assert_eq!(layout.opt_prefix("wget"), PathBuf::from("/usr/local/opt/wget"));
        assert_eq!(layout.etc(), PathBuf::from("/usr/local/etc"));
        assert_eq!(layout.var(), PathBuf::from("/usr/local/var"));
    }

    #[test]
    fn test_zero_revision_has_no_suffix() {
        let layout = Layout::new("/p", "/p/Cellar");
        let keg = layout.keg("jq", &VersionedIdentity::new("1.7", 0));
        assert_eq!(keg.path(), Path::new("/p/Cellar/jq/1.7"));
    }

    #[test]
    fn test_installed_prefix_priority() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path(), dir.path().join("Cellar"));
        let foo = formula_all_variants();
        let rack = layout.rack("foo");

        // Nothing on disk: stable.
        assert_eq!(layout.installed_prefix(&foo).path(), rack.join("1.0"));
        assert!(!layout.is_installed(&foo));

        populate(&rack.join("1.0"));
        assert_eq!(layout.installed_prefix(&foo).path(), rack.join("1.0"));

        populate(&rack.join("2.0b1"));
        assert_eq!(layout.installed_prefix(&foo).path(), rack.join("2.0b1"));

        populate(&rack.join("HEAD"));
        assert_eq!(layout.installed_prefix(&foo).path(), rack.join("HEAD"));
        assert!(layout.is_installed(&foo));
    }

    #[test]
    fn test_empty_keg_is_not_installed() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path(), dir.path().join("Cellar"));
        let foo = formula_all_variants();

        std::fs::create_dir_all(layout.rack("foo").join("1.0")).unwrap();
        assert!(!layout.is_installed(&foo));
    }

    #[test]
    fn test_installed_kegs_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path(), dir.path().join("Cellar"));
        let rack = layout.rack("foo");

        populate(&rack.join("1.10"));
        populate(&rack.join("1.9_2"));
        populate(&rack.join("1.9"));
        std::fs::create_dir_all(rack.join("2.0")).unwrap();

        assert_eq!(
            layout.installed_kegs("foo"),
            vec![
                VersionedIdentity::new("1.9", 0),
                VersionedIdentity::new("1.9", 2),
                VersionedIdentity::new("1.10", 0),
            ]
        );
        assert!(layout.installed_kegs("missing").is_empty());
    }
}
