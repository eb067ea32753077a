//! Read-only snapshot of a formula and its installed kegs.

use std::path::PathBuf;

use cellar_schema::Variant;
use serde::Serialize;

use crate::formula::Formula;
use crate::layout::Layout;
use crate::receipt::InstallReceipt;

/// Version strings per variant, plus bottle availability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionInfo {
    pub stable: Option<String>,
    pub devel: Option<String>,
    pub head: Option<String>,
    /// The stable spec declares a bottle.
    pub bottle: bool,
}

/// A declared option as shown to users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptionInfo {
    /// `--with-foo`.
    pub option: String,
    pub description: String,
}

/// One keg found on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstalledInfo {
    /// Keg directory name (`1.2_1`).
    pub version: String,
    /// Flags recorded at install time; empty without a receipt.
    pub used_options: Vec<String>,
    pub poured_from_bottle: bool,
}

/// Everything `info`-style output needs about a formula.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormulaInfo {
    pub name: String,
    pub homepage: Option<String>,
    pub versions: VersionInfo,
    pub revision: u32,
    pub dependencies: Vec<String>,
    pub conflicts_with: Vec<String>,
    pub caveats: Option<String>,
    pub options: Vec<OptionInfo>,
    pub keg_only: Option<String>,
    pub has_test: bool,
    pub has_post_install: bool,
    pub opt_prefix: PathBuf,
    pub installed: Vec<InstalledInfo>,
}

impl FormulaInfo {
    /// Pretty JSON.
    ///
    /// # Errors
    ///
    /// Only if serialization itself fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Snapshot `formula` and whatever of it is installed under `layout`.
pub fn describe(formula: &Formula, layout: &Layout) -> FormulaInfo {
    let version_of = |variant| {
        formula
            .identity_for(variant)
            .map(|id| id.version().to_string())
    };

    let installed = layout
        .installed_kegs(formula.name())
        .into_iter()
        .map(|identity| {
            let receipt = InstallReceipt::read(&layout.keg(formula.name(), &identity));
            InstalledInfo {
                version: identity.to_string(),
                used_options: receipt
                    .as_ref()
                    .map(|r| r.used_options.clone())
                    .unwrap_or_default(),
                poured_from_bottle: receipt.is_some_and(|r| r.poured_from_bottle),
            }
        })
        .collect();

    FormulaInfo {
        name: formula.name().to_string(),
        homepage: formula.homepage().map(str::to_string),
        versions: VersionInfo {
            stable: version_of(Variant::Stable),
            devel: version_of(Variant::Devel),
            head: version_of(Variant::Head),
            bottle: formula
                .spec(Variant::Stable)
                .is_some_and(|s| s.bottle_available),
        },
        revision: formula.revision(),
        dependencies: formula
            .dependencies()
            .iter()
            .map(|d| d.name.clone())
            .collect(),
        conflicts_with: formula.conflicts().to_vec(),
        caveats: formula.caveats().map(str::to_string),
        options: formula
            .options()
            .iter()
            .map(|o| OptionInfo {
                option: format!("--{}", o.name),
                description: o.description.clone(),
            })
            .collect(),
        keg_only: formula.keg_only().map(str::to_string),
        has_test: formula.has_test(),
        has_post_install: formula.has_post_install(),
        opt_prefix: layout.opt_prefix(formula.name()),
        installed,
    }
}
