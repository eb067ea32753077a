//! Per-operation build options.
//!
//! One value is created per install and passed explicitly to whatever needs
//! it (the expansion filter, the build executor, the install receipt).

use std::collections::BTreeSet;
use std::time::Duration;

use cellar_schema::SoftwareSpec;

/// Flags and knobs for a single install/build operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    used: BTreeSet<String>,
    /// Tee subprocess output to the console as it is produced.
    pub verbose: bool,
    /// Kill a build step that runs longer than this.
    pub timeout: Option<Duration>,
    /// Parallel make jobs exported as `MAKEFLAGS`.
    pub jobs: usize,
    /// Never pour a bottle, always build.
    pub build_from_source: bool,
    /// Keep `test` dependencies when expanding.
    pub include_test: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            used: BTreeSet::new(),
            verbose: false,
            timeout: None,
            jobs: num_cpus::get(),
            build_from_source: false,
            include_test: false,
        }
    }
}

impl BuildOptions {
    /// Empty options with one job per logical CPU.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user flag. Leading dashes are dropped: `--with-foo` == `with-foo`.
    pub fn with_flag(mut self, flag: &str) -> Self {
        self.insert(flag);
        self
    }

    /// Add a user flag in place.
    pub fn insert(&mut self, flag: &str) {
        let flag = flag.trim_start_matches('-');
        if !flag.is_empty() {
            self.used.insert(flag.to_string());
        }
    }

    /// Flags the user passed, sorted.
    pub fn used(&self) -> impl Iterator<Item = &str> {
        self.used.iter().map(String::as_str)
    }

    /// Whether no flags were passed.
    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }

    /// Whether the flag was passed verbatim.
    pub fn contains(&self, flag: &str) -> bool {
        self.used.contains(flag.trim_start_matches('-'))
    }

    /// Whether `name` is switched on: `with-<name>` passed, or `<name>`
    /// itself passed, and `without-<name>` not passed.
    pub fn with(&self, name: &str) -> bool {
        if self.used.contains(&format!("without-{name}")) {
            return false;
        }
        self.used.contains(&format!("with-{name}")) || self.used.contains(name)
    }

    /// Whether `without-<name>` was passed.
    pub fn without(&self, name: &str) -> bool {
        self.used.contains(&format!("without-{name}"))
    }

    /// Options a dependency is installed with: no user flags, same
    /// source/bottle preference and job count.
    pub fn for_dependency(&self) -> Self {
        Self {
            used: BTreeSet::new(),
            include_test: false,
            ..self.clone()
        }
    }

    /// Declared options of `spec` the user did not pass.
    pub fn unused_options(&self, spec: &SoftwareSpec) -> Vec<String> {
        spec.options
            .iter()
            .filter(|o| !self.used.contains(&o.name))
            .map(|o| o.name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellar_schema::BuildOption;

    #[test]
    fn test_with_and_without() {
        let options = BuildOptions::new()
            .with_flag("--with-gettext")
            .with_flag("without-nls")
            .with_flag("universal");

        assert!(options.with("gettext"));
        assert!(options.with("universal"));
        assert!(!options.with("nls"));
        assert!(options.without("nls"));
        assert!(!options.without("gettext"));
        assert!(!options.with("x11"));
    }

    #[test]
    fn test_with_is_explicit_opt_in() {
        let none = BuildOptions::new();
        assert!(!none.with("gettext"));
        assert!(!none.without("gettext"));

        let both = BuildOptions::new()
            .with_flag("with-gettext")
            .with_flag("without-gettext");
        assert!(!both.with("gettext"));
        assert!(both.without("gettext"));
    }

    #[test]
    fn test_flags_normalised() {
        let options = BuildOptions::new().with_flag("--with-a").with_flag("with-a");
        assert_eq!(options.used().collect::<Vec<_>>(), vec!["with-a"]);
        assert!(options.contains("--with-a"));
    }

    #[test]
    fn test_unused_options() {
        let spec = SoftwareSpec::new("https://e.com/x-1.0.tar.gz")
            .option(BuildOption::new("with-a", ""))
            .option(BuildOption::new("with-b", ""));
        let options = BuildOptions::new().with_flag("with-a");
        assert_eq!(options.unused_options(&spec), vec!["with-b".to_string()]);
    }

    #[test]
    fn test_default_jobs() {
        assert!(BuildOptions::new().jobs >= 1);
    }
}
