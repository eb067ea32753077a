//! Reporter trait for build console output
//!
//! The executor reports through this trait instead of writing to a terminal,
//! so embedders decide where command echoes and live output go.

use std::path::Path;

pub trait BuildReporter: Send + Sync {
    /// A build command is about to run; `line` is the display form.
    fn command(&self, formula: &str, line: &str);

    /// One line of live output (verbose builds only).
    fn output_line(&self, line: &str);

    /// A command failed; `tail` is the end of its log.
    fn failure_tail(&self, log_path: &Path, tail: &str);
}

impl<T: BuildReporter + ?Sized> BuildReporter for std::sync::Arc<T> {
    fn command(&self, formula: &str, line: &str) {
        (**self).command(formula, line)
    }
    fn output_line(&self, line: &str) {
        (**self).output_line(line)
    }
    fn failure_tail(&self, log_path: &Path, tail: &str) {
        (**self).failure_tail(log_path, tail)
    }
}

/// Writes to stdout/stderr.
#[derive(Clone, Copy, Default)]
pub struct ConsoleReporter;

impl BuildReporter for ConsoleReporter {
    fn command(&self, _formula: &str, line: &str) {
        println!("==> {line}");
    }

    fn output_line(&self, line: &str) {
        println!("{line}");
    }

    fn failure_tail(&self, log_path: &Path, tail: &str) {
        eprintln!("{tail}");
        eprintln!("\nFull log: {}", log_path.display());
    }
}

/// A no-op reporter for silent operations (e.g., tests, background builds).
#[derive(Clone, Copy, Default)]
pub struct NullReporter;

impl BuildReporter for NullReporter {
    fn command(&self, _: &str, _: &str) {}
    fn output_line(&self, _: &str) {}
    fn failure_tail(&self, _: &Path, _: &str) {}
}
