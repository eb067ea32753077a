//! End-to-end flow over a temporary cellar home: load, expand, lock, build,
//! record, inspect, pin.

#![cfg(unix)]

use std::path::{Path, PathBuf};

use cellar_core::{
    BuildError, BuildExecutor, BuildOptions, Catalog, Config, DependencyGraphExpander, Error,
    Field, Formula, FormulaError, HostEnvironment, InstallReceipt, LockError, NullReporter,
    default_filter, describe,
};
use cellar_schema::{FormulaDefinition, SoftwareSpec, Variant};
use tempfile::TempDir;

/// Temporary home with a formula directory.
struct TestContext {
    _temp_dir: TempDir,
    config: Config,
    formula_dir: PathBuf,
}

impl TestContext {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let config = Config::with_home(temp_dir.path().join(".cellar"));
        let formula_dir = temp_dir.path().join("Formula");
        std::fs::create_dir_all(&formula_dir).expect("failed to create formula dir");

        Self {
            _temp_dir: temp_dir,
            config,
            formula_dir,
        }
    }

    fn add(&self, name: &str, body: &str) {
        std::fs::write(self.formula_dir.join(format!("{name}.toml")), body)
            .expect("failed to write formula");
    }

    fn catalog(&self) -> Catalog {
        Catalog::load(&self.formula_dir, None).expect("failed to load catalog")
    }
}

fn seed(ctx: &TestContext) {
    ctx.add(
        "app",
        r#"
name = "app"
revision = 1
has_test = true

[stable]
url = "https://example.com/app-2.4.0.tar.gz"

[[stable.options]]
name = "with-docs"
description = "Build documentation"

[[stable.dependencies]]
name = "libfoo"

[[stable.dependencies]]
name = "docgen"
tags = ["optional"]

[[stable.dependencies]]
name = "cmake"
tags = ["build"]
"#,
    );
    ctx.add(
        "libfoo",
        r#"
name = "libfoo"
[stable]
url = "https://example.com/libfoo-1.0.tar.gz"
[[stable.dependencies]]
name = "zlib"
"#,
    );
    ctx.add(
        "zlib",
        "name = \"zlib\"\n[stable]\nurl = \"https://zlib.net/zlib-1.3.1.tar.gz\"\n",
    );
    ctx.add(
        "cmake",
        "name = \"cmake\"\n[stable]\nurl = \"https://cmake.org/files/cmake-3.28.1.tar.gz\"\n",
    );
    ctx.add(
        "docgen",
        "name = \"docgen\"\n[stable]\nurl = \"https://example.com/docgen-0.9.tar.gz\"\n",
    );
    ctx.add("broken", "name = \"broken\"\n[stable]\nurl = \n");
}

fn build(
    formula: &Formula,
    config: &Config,
    options: &BuildOptions,
    keg: &Path,
) -> Result<(), BuildError> {
    let env = HostEnvironment::new(&config.layout());
    let mut exec = BuildExecutor::new(formula, &config.logs, options, &env, &NullReporter);
    exec.run("/bin/sh", ["-c", "echo configuring", "configure"])?;
    let install = format!("mkdir -p '{0}/bin' && echo '#!/bin/sh' > '{0}/bin/app'", keg.display());
    exec.run("/bin/sh", ["-c", install.as_str()])?;
    Ok(())
}

#[test]
fn test_full_install_flow() {
    let ctx = TestContext::new();
    seed(&ctx);
    let catalog = ctx.catalog();
    assert!(catalog.get("broken").is_none());

    let app = catalog.get("app").unwrap().clone();
    let options = BuildOptions::new();

    let expansion = DependencyGraphExpander::new(&catalog)
        .expand_with(&app, default_filter(&options))
        .unwrap();
    assert_eq!(expansion.formula_names(), vec!["zlib", "libfoo", "cmake", "app"]);

    let locks = ctx.config.lock_manager();
    let mut lock = locks.acquire(app.name(), "install").unwrap();
    assert!(matches!(
        locks.acquire(app.name(), "install"),
        Err(LockError::Held { .. })
    ));

    let layout = ctx.config.layout();
    let keg = layout.keg(app.name(), app.identity());
    assert!(keg.path().ends_with("Cellar/app/2.4.0_1"));
    build(&app, &ctx.config, &options, keg.path()).unwrap();

    InstallReceipt::for_build(&app, &options, false)
        .write(&keg)
        .unwrap();
    locks.release(&mut lock);

    assert!(layout.is_installed(&app));
    assert!(ctx.config.logs.join("app").join("01.sh").exists());
    assert!(ctx.config.logs.join("app").join("02.sh").exists());

    let info = describe(&app, &layout);
    assert_eq!(info.installed.len(), 1);
    assert_eq!(info.installed[0].version, "2.4.0_1");
    assert_eq!(info.options[0].option, "--with-docs");
    assert!(info.has_test);

    let pins = ctx.config.pin_registry();
    assert!(pins.pinnable(&app, &layout));
    pins.pin_installed(&app, &layout).unwrap();
    assert!(pins.is_pinned("app"));
    pins.unpin("app").unwrap();
    assert!(!pins.is_pinned("app"));
}

#[test]
fn test_optional_dependency_with_flag() {
    let ctx = TestContext::new();
    seed(&ctx);
    let catalog = ctx.catalog();
    let app = catalog.get("app").unwrap();

    let options = BuildOptions::new().with_flag("--with-docgen");
    let expansion = DependencyGraphExpander::new(&catalog)
        .expand_with(app, default_filter(&options))
        .unwrap();
    assert_eq!(
        expansion.formula_names(),
        vec!["zlib", "libfoo", "docgen", "cmake", "app"]
    );
}

#[test]
fn test_failed_build_leaves_diagnostics() {
    let ctx = TestContext::new();
    seed(&ctx);
    let app = ctx.catalog().get("app").unwrap().clone();
    let options = BuildOptions::new();
    let env = HostEnvironment::new(&ctx.config.layout());
    let mut exec = BuildExecutor::new(&app, &ctx.config.logs, &options, &env, &NullReporter);

    let err: Error = exec
        .run("/bin/sh", ["-c", "echo 'error: missing header'; exit 2"])
        .unwrap_err()
        .into();

    let Error::Build(BuildError::Failed { log_path, env, .. }) = err else {
        panic!("expected a build failure");
    };
    assert!(!env.is_empty());
    let log = std::fs::read_to_string(log_path).unwrap();
    assert!(log.contains("error: missing header"));
    assert!(log.contains("CELLAR_PREFIX: "));
    assert!(!ctx.config.layout().is_installed(&app));
}

#[test]
fn test_invalid_name_fails_before_side_effects() {
    let ctx = TestContext::new();
    let def = FormulaDefinition::new("bad name").with_spec(
        Variant::Stable,
        SoftwareSpec::new("https://example.com/bad-1.0.tar.gz"),
    );

    let err = Formula::from_definition(def).unwrap_err();
    assert_eq!(
        err,
        FormulaError::Validation {
            field: Field::Name,
            value: "bad name".into()
        }
    );
    assert!(!ctx.config.locks.exists());
    assert!(!ctx.config.logs.exists());
}
