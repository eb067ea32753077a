//! Per-variant build specifications and the edges they declare.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::arch::Arch;

/// One of the alternative source specifications a formula may declare.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    /// Released source.
    #[default]
    Stable,
    /// Pre-release source.
    Devel,
    /// Tip of the upstream repository; always versioned `HEAD`.
    Head,
}

impl Variant {
    /// Fallback order used when the requested variant has no usable URL.
    pub const SELECTION_ORDER: [Variant; 3] = [Variant::Stable, Variant::Devel, Variant::Head];

    /// Order in which installed prefixes are probed on disk.
    pub const INSTALLED_PRIORITY: [Variant; 3] = [Variant::Head, Variant::Devel, Variant::Stable];

    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Devel => "devel",
            Self::Head => "head",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Variant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stable" => Ok(Self::Stable),
            "devel" => Ok(Self::Devel),
            "head" => Ok(Self::Head),
            _ => Err(format!("Unknown variant: {s}")),
        }
    }
}

/// When and how strongly an edge is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepTag {
    /// Needed only while building.
    Build,
    /// Needed only to run the formula's test.
    Test,
    /// Off unless the user asks for it with `with-<name>`.
    Optional,
    /// On unless the user turns it off with `without-<name>`.
    Recommended,
    /// Needed at runtime.
    Run,
}

impl DepTag {
    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Test => "test",
            Self::Optional => "optional",
            Self::Recommended => "recommended",
            Self::Run => "run",
        }
    }
}

impl fmt::Display for DepTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An edge to another named formula.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    /// Name of the formula depended upon.
    pub name: String,
    /// Tags qualifying the edge.
    #[serde(default)]
    pub tags: BTreeSet<DepTag>,
    /// Options the dependency must be built with.
    #[serde(default)]
    pub options: BTreeSet<String>,
}

impl Dependency {
    /// An untagged dependency on `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: BTreeSet::new(),
            options: BTreeSet::new(),
        }
    }

    /// Add tags to the edge.
    pub fn with_tags(mut self, tags: impl IntoIterator<Item = DepTag>) -> Self {
        self.tags.extend(tags);
        self
    }

    /// Require the dependency to be built with `option`.
    pub fn with_option(mut self, option: impl Into<String>) -> Self {
        self.options.insert(option.into());
        self
    }

    /// Whether the edge carries `tag`.
    pub fn has_tag(&self, tag: DepTag) -> bool {
        self.tags.contains(&tag)
    }

    /// Tagged `build`.
    pub fn is_build(&self) -> bool {
        self.has_tag(DepTag::Build)
    }

    /// Tagged `optional`.
    pub fn is_optional(&self) -> bool {
        self.has_tag(DepTag::Optional)
    }

    /// Tagged `recommended`.
    pub fn is_recommended(&self) -> bool {
        self.has_tag(DepTag::Recommended)
    }
}

/// The condition a [`Requirement`] checks on the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequirementCheck {
    /// Host OS matches (`linux`, `macos`), as in `std::env::consts::OS`.
    Platform(String),
    /// Host CPU architecture matches.
    Arch(Arch),
    /// An executable with this name is on `PATH`.
    Executable(String),
    /// An environment variable is set and non-empty.
    Env(String),
}

/// A non-formula precondition for building or running a formula.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    /// Identifier used for deduplication and display (e.g. `x11`).
    pub name: String,
    /// What is checked.
    pub check: RequirementCheck,
    /// Tags qualifying the requirement (same vocabulary as dependencies).
    #[serde(default)]
    pub tags: BTreeSet<DepTag>,
    /// A formula that can satisfy the requirement when it is unmet.
    #[serde(default)]
    pub default_formula: Option<String>,
}

impl Requirement {
    /// A requirement with no tags and no fallback formula.
    pub fn new(name: impl Into<String>, check: RequirementCheck) -> Self {
        Self {
            name: name.into(),
            check,
            tags: BTreeSet::new(),
            default_formula: None,
        }
    }

    /// Add tags to the requirement.
    pub fn with_tags(mut self, tags: impl IntoIterator<Item = DepTag>) -> Self {
        self.tags.extend(tags);
        self
    }

    /// Coarse category: `platform`, `arch`, `toolchain` or `env`.
    pub fn kind(&self) -> &'static str {
        match self.check {
            RequirementCheck::Platform(_) => "platform",
            RequirementCheck::Arch(_) => "arch",
            RequirementCheck::Executable(_) => "toolchain",
            RequirementCheck::Env(_) => "env",
        }
    }

    /// Whether the requirement carries `tag`.
    pub fn has_tag(&self, tag: DepTag) -> bool {
        self.tags.contains(&tag)
    }
}

/// A user-selectable build option (`with-foo`, `universal`, ...).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BuildOption {
    /// Flag name without leading dashes.
    pub name: String,
    /// One-line description shown to users.
    #[serde(default)]
    pub description: String,
}

impl BuildOption {
    /// Build an option from name and description.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Where a patch's content comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchSource {
    /// Fetched from a URL by the fetch collaborator.
    Url(String),
    /// Embedded diff text.
    Inline(String),
}

/// A patch applied to the staged source before building.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    /// Patch content.
    pub source: PatchSource,
    /// Leading path components stripped (`patch -pN`).
    #[serde(default = "default_strip")]
    pub strip: u32,
}

fn default_strip() -> u32 {
    1
}

/// Everything one variant declares.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SoftwareSpec {
    /// Source URL. Must be non-empty for the variant to be selectable.
    #[serde(default)]
    pub url: String,
    /// Explicit version. Autodetected from `url` when absent.
    #[serde(default)]
    pub version: Option<String>,
    /// Dependency edges, in declaration order.
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    /// Requirements, in declaration order.
    #[serde(default)]
    pub requirements: Vec<Requirement>,
    /// Declared build options.
    #[serde(default)]
    pub options: Vec<BuildOption>,
    /// Patches, in application order.
    #[serde(default)]
    pub patches: Vec<Patch>,
    /// Whether a bottle is published for this variant.
    #[serde(default, alias = "bottle")]
    pub bottle_available: bool,
}

impl SoftwareSpec {
    /// A spec with only a URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Set an explicit version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Append a dependency.
    pub fn depends_on(mut self, dep: Dependency) -> Self {
        self.dependencies.push(dep);
        self
    }

    /// Append a requirement.
    pub fn requires(mut self, req: Requirement) -> Self {
        self.requirements.push(req);
        self
    }

    /// Declare an option.
    pub fn option(mut self, option: BuildOption) -> Self {
        if !self.options.iter().any(|o| o.name == option.name) {
            self.options.push(option);
        }
        self
    }

    /// Whether the URL is usable for selection.
    pub fn has_url(&self) -> bool {
        !self.url.trim().is_empty()
    }

    /// Whether `name` is a declared option.
    pub fn has_option(&self, name: &str) -> bool {
        self.options.iter().any(|o| o.name == name)
    }
}
