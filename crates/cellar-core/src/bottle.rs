//! Precompiled bottles: whether one should be poured, and where it is.

use std::path::PathBuf;

use cellar_schema::{Variant, VersionedIdentity};
use tracing::debug;

use crate::formula::Formula;
use crate::options::BuildOptions;

/// Source of local bottle archives.
pub trait BottleRepository {
    /// Path to a bottle for `name` at `identity` on this platform.
    fn locate(&self, name: &str, identity: &VersionedIdentity) -> Option<PathBuf>;
}

/// A repository with no bottles at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBottles;

impl BottleRepository for NoBottles {
    fn locate(&self, _name: &str, _identity: &VersionedIdentity) -> Option<PathBuf> {
        None
    }
}

/// Whether `formula` is a bottle candidate under `options`.
///
/// Only a stable spec that declares a bottle qualifies, and only when the
/// user neither asked for a source build nor passed build flags.
pub fn would_pour(formula: &Formula, options: &BuildOptions) -> bool {
    !options.build_from_source
        && options.is_empty()
        && formula.active_variant() == Variant::Stable
        && formula.active_spec().bottle_available
}

/// The bottle to pour for `formula`, if any.
pub fn pour_bottle(
    formula: &Formula,
    options: &BuildOptions,
    repo: &dyn BottleRepository,
) -> Option<PathBuf> {
    if !would_pour(formula, options) {
        return None;
    }
    let path = repo.locate(formula.name(), formula.identity());
    debug!(formula = formula.name(), bottle = ?path, "bottle lookup");
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellar_schema::{FormulaDefinition, SoftwareSpec};

    struct OneBottle(PathBuf);

    impl BottleRepository for OneBottle {
        fn locate(&self, name: &str, identity: &VersionedIdentity) -> Option<PathBuf> {
            (name == "zlib" && identity.version().as_str() == "1.3").then(|| self.0.clone())
        }
    }

    fn zlib(bottle: bool) -> Formula {
        let spec = SoftwareSpec {
            bottle_available: bottle,
            ..SoftwareSpec::new("https://zlib.net/zlib-1.3.tar.gz")
        };
        Formula::from_definition(FormulaDefinition::new("zlib").with_spec(Variant::Stable, spec))
            .unwrap()
    }

    #[test]
    fn test_would_pour() {
        assert!(would_pour(&zlib(true), &BuildOptions::new()));
        assert!(!would_pour(&zlib(false), &BuildOptions::new()));
        assert!(!would_pour(
            &zlib(true),
            &BuildOptions::new().with_flag("with-debug")
        ));

        let mut source = BuildOptions::new();
        source.build_from_source = true;
        assert!(!would_pour(&zlib(true), &source));
    }

    #[test]
    fn test_pour_bottle() {
        let repo = OneBottle(PathBuf::from("/bottles/zlib-1.3.tar.gz"));
        assert_eq!(
            pour_bottle(&zlib(true), &BuildOptions::new(), &repo),
            Some(PathBuf::from("/bottles/zlib-1.3.tar.gz"))
        );
        assert_eq!(pour_bottle(&zlib(true), &BuildOptions::new(), &NoBottles), None);
        assert_eq!(pour_bottle(&zlib(false), &BuildOptions::new(), &repo), None);
    }
}
