//! Evaluating non-formula preconditions against the host.

use cellar_schema::{Arch, Requirement, RequirementCheck};

/// OS name as requirements spell it. `macos` also answers to `darwin`/`osx`.
pub fn current_os() -> &'static str {
    std::env::consts::OS
}

fn os_matches(wanted: &str) -> bool {
    let wanted = wanted.to_ascii_lowercase();
    let os = current_os();
    match wanted.as_str() {
        "darwin" | "osx" | "mac" => os == "macos",
        other => other == os,
    }
}

/// Whether the host satisfies `req` right now.
pub fn is_satisfied(req: &Requirement) -> bool {
    match &req.check {
        RequirementCheck::Platform(os) => os_matches(os),
        RequirementCheck::Arch(arch) => Arch::current() == Some(*arch),
        RequirementCheck::Executable(name) => which::which(name).is_ok(),
        RequirementCheck::Env(var) => std::env::var_os(var).is_some_and(|v| !v.is_empty()),
    }
}
