//! Host CPU architectures.

/// CPU architecture a build runs on or a requirement asks for.
///
/// # Example
///
/// ```
/// use cellar_schema::Arch;
///
/// if let Some(current) = Arch::current() {
///     println!("Running on: {}", current);
/// }
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    /// 64-bit ARM (`aarch64`).
    #[default]
    Arm64,
    /// `x86_64`
    X86_64,
}

impl Arch {
    /// The host architecture, or `None` on one this enum does not name.
    pub fn current() -> Option<Self> {
        match std::env::consts::ARCH {
            "aarch64" => Some(Self::Arm64),
            "x86_64" => Some(Self::X86_64),
            _ => None,
        }
    }

    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Arm64 => "arm64",
            Self::X86_64 => "x86_64",
        }
    }

    /// Rust-convention architecture name (`aarch64` / `x86_64`).
    ///
    /// Distinct from [`as_str()`](Self::as_str) which uses platform names
    /// (`arm64`). The value matches `std::env::consts::ARCH`.
    pub fn rust_name(&self) -> &'static str {
        match self {
            Self::Arm64 => "aarch64",
            Self::X86_64 => "x86_64",
        }
    }
}

impl std::fmt::Display for Arch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Arch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "arm64" | "aarch64" => Ok(Self::Arm64),
            "x86_64" | "amd64" | "intel" => Ok(Self::X86_64),
            _ => Err(format!("Unknown architecture: {s}")),
        }
    }
}
