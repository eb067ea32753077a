//! Build environment hooks the executor calls for special commands.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::Command;

use cellar_schema::Arch;

use crate::layout::Layout;
use crate::requirement::current_os;

/// Compiler variables the host environment may inject into builds.
pub const COMPILER_VARS: &[&str] = &[
    "CC", "CXX", "OBJC", "OBJCXX", "CPP", "MAKE", "LD", "LDSHARED", "CFLAGS", "CXXFLAGS",
    "OBJCFLAGS", "OBJCXXFLAGS", "LDFLAGS", "CPPFLAGS",
];

/// Variable carrying compiler-shim configuration flags.
pub const CCCFG_VAR: &str = "CELLAR_CCCFG";

/// Environment adjustments for individual build commands.
pub trait BuildEnvironment: Send + Sync {
    /// Remove injected compiler settings, for tools that pick their own.
    fn strip_compiler_extras(&self, cmd: &mut Command);

    /// Stop the compiler shim from filtering arguments for this command.
    fn relax_argument_filtering(&self, cmd: &mut Command);

    /// Describe the build configuration for a failure log.
    ///
    /// # Errors
    ///
    /// Propagates write errors.
    fn dump_config(&self, out: &mut dyn Write) -> io::Result<()>;
}

/// Default hooks for the running host.
#[derive(Debug, Clone)]
pub struct HostEnvironment {
    prefix: PathBuf,
    cellar: PathBuf,
}

impl HostEnvironment {
    /// Hooks reporting `layout`'s roots.
    pub fn new(layout: &Layout) -> Self {
        Self {
            prefix: layout.prefix().to_path_buf(),
            cellar: layout.cellar().to_path_buf(),
        }
    }
}

impl BuildEnvironment for HostEnvironment {
    fn strip_compiler_extras(&self, cmd: &mut Command) {
        for var in COMPILER_VARS {
            cmd.env_remove(var);
        }
    }

    fn relax_argument_filtering(&self, cmd: &mut Command) {
        let mut flags = std::env::var(CCCFG_VAR).unwrap_or_default();
        if !flags.contains('O') {
            flags.push('O');
        }
        cmd.env(CCCFG_VAR, flags);
    }

    fn dump_config(&self, out: &mut dyn Write) -> io::Result<()> {
        let tool = |name: &str| {
            which::which(name)
                .map(|p| p.display().to_string())
                .unwrap_or_else(|_| "N/A".into())
        };

        writeln!(out, "CELLAR_PREFIX: {}", self.prefix.display())?;
        writeln!(out, "CELLAR_CELLAR: {}", self.cellar.display())?;
        writeln!(out, "OS: {}", current_os())?;
        writeln!(
            out,
            "Arch: {}",
            Arch::current().map_or(std::env::consts::ARCH, |a| a.as_str())
        )?;
        writeln!(out, "CPU: {} logical cores", num_cpus::get())?;
        writeln!(out, "cc: {}", tool("cc"))?;
        writeln!(out, "make: {}", tool("make"))?;
        Ok(())
    }
}
