//! Version strings and versioned identities.
//!
//! Formula versions are free-form strings (`1.2.10`, `2.0rc1`, `20240101`),
//! not semver, so ordering is done on a token stream: runs of digits and
//! runs of letters, with every other character acting as a separator.
//!
//! | Left | Right | Outcome |
//! |---|---|---|
//! | numeric | numeric | compared as integers (`10 > 9`) |
//! | alpha | alpha | compared lexically |
//! | numeric | alpha | numeric wins |
//! | missing | numeric | equal if the number is zero, else less |
//! | missing | alpha | missing wins (`1.0 > 1.0beta`) |
//!
//! The literal `HEAD` sorts above every other version.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// The version token every `head` variant resolves to.
pub const HEAD_VERSION: &str = "HEAD";

/// Archive suffixes stripped before looking for a version in a URL.
const ARCHIVE_SUFFIXES: &[&str] = &[
    ".tar.gz", ".tar.bz2", ".tar.xz", ".tar.zst", ".tar.lz", ".tgz", ".tbz2", ".tbz", ".txz",
    ".tar", ".zip", ".7z", ".gz", ".bz2", ".xz", ".zst",
];

/// Stem is nothing but a version, e.g. GitHub tag archives (`v1.2.3`).
static BARE_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^v?(\d+(?:\.\d+)+(?:[a-z]+\d*)?)$").expect("static regex")
});

/// `name-1.2.3`, `name_1.2.3`, `name-v1.2.3-src`, `name-2.0b1`.
static SUFFIXED_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[-_]v?(\d+(?:\.\d+)*(?:[-.]?(?:alpha|beta|rc|pre|p)\d*|[a-z]+\d*)?)(?:[-_.](?:src|source|orig))?$")
        .expect("static regex")
});

/// Last resort: any dotted number sequence.
static DOTTED_ANYWHERE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)+)").expect("static regex"));

/// A formula version string with token-wise ordering.
///
/// Equality is exact string equality. Two versions whose tokens compare
/// equal (`1.0` and `1.00`) are ordered by their raw strings so that
/// [`Ord`] stays consistent with [`Eq`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Numeric(&'a str),
    Alpha(&'a str),
}

impl Version {
    /// Wrap a version string as-is.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The version every `head` variant carries.
    pub fn head() -> Self {
        Self(HEAD_VERSION.to_string())
    }

    /// Returns the raw version string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the `HEAD` pseudo-version.
    pub fn is_head(&self) -> bool {
        self.0 == HEAD_VERSION
    }

    /// Whether the string is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Guess a version from a source URL's file name.
    ///
    /// Query strings and archive extensions are stripped first. Returns
    /// `None` when nothing version-shaped is found.
    pub fn detect(url: &str) -> Option<Self> {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        let file = path.trim_end_matches('/').rsplit('/').next()?;
        let lower = file.to_ascii_lowercase();

        let mut stem = file;
        for suffix in ARCHIVE_SUFFIXES {
            if lower.ends_with(suffix) {
                stem = &file[..file.len() - suffix.len()];
                break;
            }
        }

        [&*BARE_VERSION, &*SUFFIXED_VERSION, &*DOTTED_ANYWHERE]
            .iter()
            .find_map(|re| re.captures(stem))
            .and_then(|caps| caps.get(1))
            .map(|m| Self(m.as_str().to_string()))
    }

    fn tokens(&self) -> Vec<Token<'_>> {
        let mut out = Vec::new();
        let bytes = self.0.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            let start = i;
            if bytes[i].is_ascii_digit() {
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                out.push(Token::Numeric(&self.0[start..i]));
            } else if bytes[i].is_ascii_alphabetic() {
                while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
                    i += 1;
                }
                out.push(Token::Alpha(&self.0[start..i]));
            } else {
                i += 1;
            }
        }
        out
    }
}

/// Compare two digit runs as integers without parsing (no overflow).
fn cmp_numeric(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn is_zero(n: &str) -> bool {
    n.bytes().all(|b| b == b'0')
}

fn cmp_tokens(a: Option<Token<'_>>, b: Option<Token<'_>>) -> Ordering {
    match (a, b) {
        (Some(Token::Numeric(x)), Some(Token::Numeric(y))) => cmp_numeric(x, y),
        (Some(Token::Alpha(x)), Some(Token::Alpha(y))) => x.cmp(y),
        (Some(Token::Numeric(_)), Some(Token::Alpha(_))) => Ordering::Greater,
        (Some(Token::Alpha(_)), Some(Token::Numeric(_))) => Ordering::Less,
        (None, Some(Token::Numeric(y))) if is_zero(y) => Ordering::Equal,
        (None, Some(Token::Numeric(_))) | (Some(Token::Alpha(_)), None) => Ordering::Less,
        (Some(Token::Numeric(x)), None) if is_zero(x) => Ordering::Equal,
        (Some(Token::Numeric(_)), None) | (None, Some(Token::Alpha(_))) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.is_head(), other.is_head()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Greater,
            (false, true) => return Ordering::Less,
            (false, false) => {}
        }

        let left = self.tokens();
        let right = other.tokens();
        for i in 0..left.len().max(right.len()) {
            let ord = cmp_tokens(left.get(i).copied(), right.get(i).copied());
            if ord != Ordering::Equal {
                return ord;
            }
        }
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Version {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Version {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// An immutable `(version, revision)` pair identifying one build of a formula.
///
/// Ordered by version first, then revision. Rendered as `1.2.3` when the
/// revision is zero and `1.2.3_2` otherwise; that rendering is also the
/// keg directory name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VersionedIdentity {
    version: Version,
    #[serde(default)]
    revision: u32,
}

impl VersionedIdentity {
    /// Build an identity from a version and revision.
    pub fn new(version: impl Into<Version>, revision: u32) -> Self {
        Self {
            version: version.into(),
            revision,
        }
    }

    /// The version component.
    pub fn version(&self) -> &Version {
        &self.version
    }

    /// The revision component.
    pub fn revision(&self) -> u32 {
        self.revision
    }

    /// Whether this identity refers to a `HEAD` build.
    pub fn is_head(&self) -> bool {
        self.version.is_head()
    }
}

impl fmt::Display for VersionedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.revision == 0 {
            write!(f, "{}", self.version)
        } else {
            write!(f, "{}_{}", self.version, self.revision)
        }
    }
}

/// Error returned when a keg directory name cannot be read as an identity.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("not a versioned identity: {0:?}")]
pub struct ParseIdentityError(pub String);

impl FromStr for VersionedIdentity {
    type Err = ParseIdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s.chars().any(char::is_whitespace) {
            return Err(ParseIdentityError(s.to_string()));
        }
        if let Some((version, revision)) = s.rsplit_once('_')
            && !version.is_empty()
            && let Ok(revision) = revision.parse::<u32>()
        {
            return Ok(Self::new(version, revision));
        }
        Ok(Self::new(s, 0))
    }
}
