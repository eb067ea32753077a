//! Active-variant selection and attribute validation.
//!
//! A [`Formula`] only exists in a valid state: construction picks the
//! active variant and validates name, URL and version before returning, so
//! nothing downstream (locks, logs, kegs) ever sees a malformed formula.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use cellar_schema::{
    BuildOption, Dependency, FormulaDefinition, Requirement, SoftwareSpec, Variant, Version,
    VersionedIdentity,
};
use thiserror::Error;
use tracing::debug;

/// Attribute checked by [`validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// Formula name.
    Name,
    /// Source URL of the active variant.
    Url,
    /// Version of the active variant after autodetection.
    Version,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Name => "name",
            Self::Url => "url",
            Self::Version => "version",
        })
    }
}

/// Definition errors. Raised before any side effect happens.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormulaError {
    /// No candidate variant declares a non-empty URL.
    #[error("{name}: no specification with a source URL")]
    NoSpecification { name: String },

    /// A mandatory attribute is empty or contains whitespace.
    #[error("invalid attribute {field}: {value:?}")]
    Validation { field: Field, value: String },
}

/// Pick the variant to build.
///
/// The requested variant wins when it declares a URL; otherwise stable,
/// devel and head are tried in that order.
///
/// # Errors
///
/// Returns [`FormulaError::NoSpecification`] when no candidate has a URL.
pub fn select_active(
    def: &FormulaDefinition,
    requested: Option<Variant>,
) -> Result<(Variant, &SoftwareSpec), FormulaError> {
    requested
        .into_iter()
        .chain(Variant::SELECTION_ORDER)
        .find_map(|variant| {
            def.spec(variant)
                .filter(|spec| spec.has_url())
                .map(|spec| (variant, spec))
        })
        .ok_or_else(|| FormulaError::NoSpecification {
            name: def.name.clone(),
        })
}

/// The version a variant resolves to: `HEAD` for head, the declared version,
/// or one detected from the URL. Empty when none of those apply.
pub fn resolve_version(variant: Variant, spec: &SoftwareSpec) -> Version {
    if variant == Variant::Head {
        return Version::head();
    }
    match spec.version.as_deref() {
        Some(v) if !v.is_empty() => Version::new(v),
        _ => Version::detect(&spec.url).unwrap_or_else(|| Version::new("")),
    }
}

fn check(field: Field, value: &str) -> Result<(), FormulaError> {
    if value.is_empty() || value.chars().any(char::is_whitespace) {
        return Err(FormulaError::Validation {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Check name, URL and version, in that order.
///
/// # Errors
///
/// Returns [`FormulaError::Validation`] naming the first bad field.
pub fn validate(name: &str, spec: &SoftwareSpec, version: &Version) -> Result<(), FormulaError> {
    check(Field::Name, name)?;
    check(Field::Url, &spec.url)?;
    check(Field::Version, version.as_str())
}

/// A validated formula with its active variant fixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Formula {
    name: String,
    path: PathBuf,
    homepage: Option<String>,
    revision: u32,
    specs: BTreeMap<Variant, SoftwareSpec>,
    active: Variant,
    identity: VersionedIdentity,
    keg_only: Option<String>,
    conflicts: Vec<String>,
    caveats: Option<String>,
    has_test: bool,
    has_post_install: bool,
}

impl Formula {
    /// Select the active variant and validate.
    ///
    /// # Errors
    ///
    /// Returns [`FormulaError::NoSpecification`] if no variant is usable, or
    /// [`FormulaError::Validation`] if name, URL or version is malformed.
    pub fn new(def: FormulaDefinition, requested: Option<Variant>) -> Result<Self, FormulaError> {
        let (active, spec) = select_active(&def, requested)?;
        let version = resolve_version(active, spec);
        validate(&def.name, spec, &version)?;

        debug!(formula = %def.name, variant = %active, version = %version, "selected spec");

        let specs: BTreeMap<Variant, SoftwareSpec> = [
            (Variant::Stable, def.stable),
            (Variant::Devel, def.devel),
            (Variant::Head, def.head),
        ]
        .into_iter()
        .filter_map(|(variant, spec)| spec.map(|s| (variant, s)))
        .collect();

        Ok(Self {
            identity: VersionedIdentity::new(version, def.revision),
            name: def.name,
            path: def.path,
            homepage: def.homepage,
            revision: def.revision,
            specs,
            active,
            keg_only: def.keg_only,
            conflicts: def.conflicts,
            caveats: def.caveats,
            has_test: def.has_test,
            has_post_install: def.has_post_install,
        })
    }

    /// Build with the default variant preference.
    ///
    /// # Errors
    ///
    /// See [`Formula::new`].
    pub fn from_definition(def: FormulaDefinition) -> Result<Self, FormulaError> {
        Self::new(def, None)
    }

    /// Formula name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Where the definition was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Project homepage.
    pub fn homepage(&self) -> Option<&str> {
        self.homepage.as_deref()
    }

    /// Packaging revision.
    pub fn revision(&self) -> u32 {
        self.revision
    }

    /// The variant chosen at construction.
    pub fn active_variant(&self) -> Variant {
        self.active
    }

    /// Spec of the active variant.
    pub fn active_spec(&self) -> &SoftwareSpec {
        &self.specs[&self.active]
    }

    /// Spec declared for `variant`.
    pub fn spec(&self, variant: Variant) -> Option<&SoftwareSpec> {
        self.specs.get(&variant)
    }

    /// Declared variants in stable, devel, head order.
    pub fn variants(&self) -> impl Iterator<Item = Variant> + '_ {
        self.specs.keys().copied()
    }

    /// Identity of the active variant.
    pub fn identity(&self) -> &VersionedIdentity {
        &self.identity
    }

    /// Version of the active variant.
    pub fn version(&self) -> &Version {
        self.identity.version()
    }

    /// Identity `variant` would install as, if it declares a usable version.
    pub fn identity_for(&self, variant: Variant) -> Option<VersionedIdentity> {
        if variant == self.active {
            return Some(self.identity.clone());
        }
        let spec = self.spec(variant)?;
        let version = resolve_version(variant, spec);
        if version.is_empty() {
            return None;
        }
        Some(VersionedIdentity::new(version, self.revision))
    }

    /// Dependencies of the active variant.
    pub fn dependencies(&self) -> &[Dependency] {
        &self.active_spec().dependencies
    }

    /// Requirements of the active variant.
    pub fn requirements(&self) -> &[Requirement] {
        &self.active_spec().requirements
    }

    /// Options declared by the active variant.
    pub fn options(&self) -> &[BuildOption] {
        &self.active_spec().options
    }

    /// Keg-only reason, if the formula is not linked into the prefix.
    pub fn keg_only(&self) -> Option<&str> {
        self.keg_only.as_deref()
    }

    /// Conflicting formula names.
    pub fn conflicts(&self) -> &[String] {
        &self.conflicts
    }

    /// Caveats text.
    pub fn caveats(&self) -> Option<&str> {
        self.caveats.as_deref()
    }

    /// The recipe defines a test.
    pub fn has_test(&self) -> bool {
        self.has_test
    }

    /// The recipe defines a post-install step.
    pub fn has_post_install(&self) -> bool {
        self.has_post_install
    }
}
