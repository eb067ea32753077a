//! Build command execution with per-invocation logs.
//!
//! Every [`BuildExecutor::run`] gets its own log file, `NN.<command>`, in the
//! formula's log directory, numbered in call order. The child's stdout and
//! stderr go to one stream. Without `verbose` that stream is the log file
//! itself; with `verbose` it is a pipe drained line by line on a second
//! thread into both the log and the reporter while the child runs.
//!
//! A failed command, including one that could not be started, leaves a log
//! ending in an `ENV` and a `CONFIG` section and surfaces as [`BuildError`]
//! pointing at it.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, PipeReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

use crate::environment::BuildEnvironment;
use crate::formula::Formula;
use crate::options::BuildOptions;
use crate::reporter::BuildReporter;

/// Exported to every build command: the log it writes to.
pub const CC_LOG_PATH_VAR: &str = "CELLAR_CC_LOG_PATH";

/// Log lines echoed to the console when a command fails.
pub const FAILURE_TAIL_LINES: usize = 5;

/// Build failures. Each points at a log on disk.
#[derive(Error, Debug)]
pub enum BuildError {
    /// The command exited unsuccessfully.
    #[error("failed executing: {command} {}\nlog: {}", args.join(" "), log_path.display())]
    Failed {
        command: String,
        args: Vec<String>,
        env: BTreeMap<String, String>,
        log_path: PathBuf,
        /// Exit code; `None` when killed by a signal.
        status: Option<i32>,
    },

    /// The command ran past the configured timeout and was killed.
    #[error("{command} timed out after {}s\nlog: {}", timeout.as_secs_f64(), log_path.display())]
    TimedOut {
        command: String,
        args: Vec<String>,
        env: BTreeMap<String, String>,
        log_path: PathBuf,
        timeout: Duration,
    },

    /// The command could not be started.
    #[error("could not start {command}: {source}\nlog: {}", log_path.display())]
    Spawn {
        command: String,
        args: Vec<String>,
        env: BTreeMap<String, String>,
        log_path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The log could not be written or the child not waited on.
    #[error("build log {}: {source}", path.display())]
    Log {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl BuildError {
    /// The log holding the failed command's output.
    pub fn log_path(&self) -> Option<&Path> {
        match self {
            Self::Failed { log_path, .. }
            | Self::TimedOut { log_path, .. }
            | Self::Spawn { log_path, .. } => Some(log_path),
            Self::Log { path, .. } => Some(path),
        }
    }
}

/// A finished, successful command.
#[derive(Debug, Clone)]
pub struct BuildInvocation {
    pub command: String,
    pub args: Vec<String>,
    pub log_path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub status: ExitStatus,
}

enum Outcome {
    Exited(ExitStatus),
    TimedOut,
    NotStarted(io::Error),
}

/// Runs one formula's build commands.
pub struct BuildExecutor<'a> {
    formula: &'a Formula,
    log_dir: PathBuf,
    options: &'a BuildOptions,
    env: &'a dyn BuildEnvironment,
    reporter: &'a dyn BuildReporter,
    cwd: Option<PathBuf>,
    exec_count: u32,
}

impl<'a> BuildExecutor<'a> {
    /// Executor logging to `<logs>/<formula name>/`.
    pub fn new(
        formula: &'a Formula,
        logs: &Path,
        options: &'a BuildOptions,
        env: &'a dyn BuildEnvironment,
        reporter: &'a dyn BuildReporter,
    ) -> Self {
        Self {
            formula,
            log_dir: logs.join(formula.name()),
            options,
            env,
            reporter,
            cwd: None,
            exec_count: 0,
        }
    }

    /// Run commands in `dir` (the staged source tree).
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Commands run so far.
    pub fn invocations(&self) -> u32 {
        self.exec_count
    }

    /// Run `command` with `args`, logging everything.
    ///
    /// # Errors
    ///
    /// [`BuildError::Failed`] on a non-zero exit, [`BuildError::TimedOut`]
    /// when the timeout kills it, [`BuildError::Spawn`] if it cannot start,
    /// each after the log is finished with its diagnostics;
    /// [`BuildError::Log`] if the log cannot be written.
    pub fn run<I, S>(&mut self, command: &str, args: I) -> Result<BuildInvocation, BuildError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|a| a.as_ref().to_string()).collect();

        self.exec_count += 1;
        let log_path = self
            .log_dir
            .join(format!("{:02}.{}", self.exec_count, basename(command)));
        let log_err = |source| BuildError::Log {
            path: log_path.clone(),
            source,
        };

        std::fs::create_dir_all(&self.log_dir).map_err(log_err)?;

        self.reporter.command(
            self.formula.name(),
            &pretty_command(command, &args, self.options.verbose),
        );

        let started_at = Utc::now();
        let mut log = File::create(&log_path).map_err(log_err)?;
        write_header(&mut log, started_at, command, &args).map_err(log_err)?;

        let mut cmd = Command::new(command);
        cmd.args(&args)
            .env(CC_LOG_PATH_VAR, &log_path)
            .env("MAKEFLAGS", format!("-j{}", self.options.jobs));
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        self.apply_hooks(&mut cmd, command, &args);
        let env = captured_env(&cmd);

        debug!(
            formula = self.formula.name(),
            command,
            log = %log_path.display(),
            "running build command"
        );

        let outcome = if self.options.verbose {
            self.run_teed(cmd, &log, &log_path)?
        } else {
            self.run_logged(cmd, &log, &log_path)?
        };

        if let Outcome::Exited(status) = outcome
            && status.success()
        {
            log.flush().map_err(log_err)?;
            debug!(formula = self.formula.name(), command, "build command succeeded");
            return Ok(BuildInvocation {
                command: command.to_string(),
                args,
                log_path,
                started_at,
                status,
            });
        }

        let noted = match &outcome {
            Outcome::NotStarted(source) => writeln!(log, "could not start {command}: {source}"),
            _ => Ok(()),
        };
        if let Err(e) = noted.and_then(|()| self.finish_failed_log(&mut log, &log_path, &env)) {
            warn!(log = %log_path.display(), error = %e, "could not complete failure log");
        }

        match outcome {
            Outcome::Exited(status) => {
                warn!(
                    formula = self.formula.name(),
                    command,
                    status = ?status.code(),
                    log = %log_path.display(),
                    "build command failed"
                );
                Err(BuildError::Failed {
                    command: command.to_string(),
                    args,
                    env,
                    log_path,
                    status: status.code(),
                })
            }
            Outcome::TimedOut => {
                let timeout = self.options.timeout.unwrap_or_default();
                warn!(
                    formula = self.formula.name(),
                    command,
                    timeout_secs = timeout.as_secs_f64(),
                    log = %log_path.display(),
                    "build command timed out"
                );
                Err(BuildError::TimedOut {
                    command: command.to_string(),
                    args,
                    env,
                    log_path,
                    timeout,
                })
            }
            Outcome::NotStarted(source) => {
                warn!(
                    formula = self.formula.name(),
                    command,
                    error = %source,
                    log = %log_path.display(),
                    "build command could not start"
                );
                Err(BuildError::Spawn {
                    command: command.to_string(),
                    args,
                    env,
                    log_path,
                    source,
                })
            }
        }
    }

    fn apply_hooks(&self, cmd: &mut Command, command: &str, args: &[String]) {
        let base = basename(command);
        if base.starts_with("xcodebuild") {
            self.env.strip_compiler_extras(cmd);
        }
        if is_packaging_shim(base, args) {
            self.env.relax_argument_filtering(cmd);
        }
    }

    // Child writes straight into the log file.
    fn run_logged(
        &self,
        mut cmd: Command,
        log: &File,
        log_path: &Path,
    ) -> Result<Outcome, BuildError> {
        let log_err = |source| BuildError::Log {
            path: log_path.to_path_buf(),
            source,
        };

        cmd.stdout(Stdio::from(log.try_clone().map_err(log_err)?))
            .stderr(Stdio::from(log.try_clone().map_err(log_err)?));

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => return Ok(Outcome::NotStarted(source)),
        };
        drop(cmd);

        wait_child(&mut child, self.options.timeout).map_err(log_err)
    }

    // Child writes into a pipe; a reader thread copies each line to the log
    // and the reporter until the write end closes.
    fn run_teed(
        &self,
        mut cmd: Command,
        log: &File,
        log_path: &Path,
    ) -> Result<Outcome, BuildError> {
        let log_err = |source| BuildError::Log {
            path: log_path.to_path_buf(),
            source,
        };

        // Close-on-exec: only the child's stdout and stderr keep the writer.
        let (reader, writer) = io::pipe().map_err(log_err)?;
        let sink = log.try_clone().map_err(log_err)?;

        cmd.stdout(Stdio::from(writer.try_clone().map_err(log_err)?))
            .stderr(Stdio::from(writer));

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => return Ok(Outcome::NotStarted(source)),
        };
        // Our copies of the write end must close or the reader never sees EOF.
        drop(cmd);

        let reporter = self.reporter;
        let timeout = self.options.timeout;
        std::thread::scope(|s| -> io::Result<Outcome> {
            let drain = s.spawn(move || drain_lines(reader, sink, reporter));
            let waited = wait_child(&mut child, timeout);
            let drained = drain
                .join()
                .unwrap_or_else(|_| Err(io::Error::other("output reader panicked")));
            let outcome = waited?;
            drained?;
            Ok(outcome)
        })
        .map_err(log_err)
    }

    fn finish_failed_log(
        &self,
        log: &mut File,
        log_path: &Path,
        env: &BTreeMap<String, String>,
    ) -> io::Result<()> {
        log.flush()?;

        // Verbose builds already showed everything.
        if !self.options.verbose {
            let tail = read_last_lines(log_path, FAILURE_TAIL_LINES)?;
            self.reporter.failure_tail(log_path, &tail);
        }

        log.seek(SeekFrom::End(0))?;
        writeln!(log)?;
        writeln!(log, "ENV")?;
        for (key, value) in env {
            writeln!(log, "{key}: {value}")?;
        }
        writeln!(log)?;
        writeln!(log, "CONFIG")?;
        self.env.dump_config(log)?;
        log.sync_all()
    }
}

fn wait_child(child: &mut Child, timeout: Option<Duration>) -> io::Result<Outcome> {
    let Some(limit) = timeout else {
        return child.wait().map(Outcome::Exited);
    };
    match child.wait_timeout(limit)? {
        Some(status) => Ok(Outcome::Exited(status)),
        None => {
            let _ = child.kill();
            child.wait()?;
            Ok(Outcome::TimedOut)
        }
    }
}

fn drain_lines(
    reader: PipeReader,
    mut sink: File,
    reporter: &dyn BuildReporter,
) -> io::Result<()> {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            return Ok(());
        }
        sink.write_all(&buf)?;
        let line = String::from_utf8_lossy(&buf);
        reporter.output_line(line.trim_end_matches(['\n', '\r']));
    }
}

fn write_header(
    log: &mut File,
    started_at: DateTime<Utc>,
    command: &str,
    args: &[String],
) -> io::Result<()> {
    let mut header = format!("{}\n\n{command}\n", started_at.to_rfc3339());
    for arg in args {
        header.push_str(arg);
        header.push('\n');
    }
    header.push('\n');
    log.write_all(header.as_bytes())
}

// Process environment with the command's own overrides applied.
fn captured_env(cmd: &Command) -> BTreeMap<String, String> {
    let mut env: BTreeMap<String, String> = std::env::vars_os()
        .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
        .collect();
    for (key, value) in cmd.get_envs() {
        let Some(key) = key.to_str() else { continue };
        match value {
            Some(value) => {
                env.insert(key.to_string(), value.to_string_lossy().into_owned());
            }
            None => {
                env.remove(key);
            }
        }
    }
    env
}

fn basename(command: &str) -> &str {
    Path::new(command)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(command)
}

/// An interpreter running a setup script or the setuptools shim.
pub fn is_packaging_shim(command: &str, args: &[String]) -> bool {
    if !basename(command).starts_with("python") {
        return false;
    }
    matches!(
        args.first().map(String::as_str),
        Some("setup.py" | "build.py")
    ) || args.iter().any(|a| a.starts_with("import setuptools"))
}

/// Display form of a command line.
///
/// Drops `configure` flags every formula passes unless `verbose`, and
/// shortens inline scripts. The log always gets the real arguments.
pub fn pretty_command(command: &str, args: &[String], verbose: bool) -> String {
    let noisy = !verbose && basename(command) == "configure";
    let mut parts = vec![command.to_string()];
    for arg in args {
        if noisy && (arg == "--disable-dependency-tracking" || arg == "--disable-debug") {
            continue;
        }
        if arg.starts_with("import setuptools") {
            parts.push("import setuptools...".to_string());
        } else if let Some((first, _)) = arg.split_once('\n') {
            parts.push(format!("{first}..."));
        } else {
            parts.push(arg.clone());
        }
    }
    parts.join(" ")
}

/// Read the last N lines from a file efficiently.
///
/// Seeks to near the end and reads a fixed-size tail buffer, so huge build
/// logs are never loaded whole.
pub fn read_last_lines(path: &Path, n: usize) -> io::Result<String> {
    const TAIL_SIZE: u64 = 16 * 1024;

    let mut file = File::open(path)?;
    let file_len = file.metadata()?.len();

    let seek_pos = file_len.saturating_sub(TAIL_SIZE);
    file.seek(SeekFrom::Start(seek_pos))?;

    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    let buffer = String::from_utf8_lossy(&bytes);

    // Seeked mid-file: the first line is partial.
    let content = if seek_pos > 0 {
        buffer.find('\n').map_or(&*buffer, |idx| &buffer[idx + 1..])
    } else {
        &buffer
    };

    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(n);
    Ok(lines[start..].join("\n"))
}
