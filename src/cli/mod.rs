//! Argument parsing, request building and outcome reporting.

use crate::constants;
use crate::core::config;
use crate::core::engine::{self, Outcome};
use crate::core::error::LockError;
use crate::core::paths::LockLocation;
use crate::models::config::ConfigFile;
use crate::models::request::{LockRequest, Mode, WaitPolicy};
use crate::util::logging;
use anyhow::{Context, Result};
use clap::Parser;
use nix::unistd::{self, Pid};
use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn parse_pid_arg(s: &str) -> std::result::Result<i32, String> {
    match s.trim().parse::<i32>() {
        Ok(pid) if pid > 0 => Ok(pid),
        _ => Err(format!("'{}' is not a valid PID", s)),
    }
}

fn parse_non_negative(s: &str) -> std::result::Result<f64, String> {
    match s.trim_start().parse::<f64>() {
        Ok(n) if n.is_finite() && n >= 0.0 => Ok(n),
        _ => Err(format!("'{}' is an invalid floating point number", s)),
    }
}

/// True for strings a caller could have meant as a PID: all of `s`, after
/// leading whitespace, reads as a C floating point literal.
fn looks_numeric(s: &str) -> bool {
    let body = s.trim_start_matches(|c: char| c.is_ascii_whitespace() || c == '\x0b');
    let body = body.strip_prefix(['+', '-']).unwrap_or(body);
    let lower = body.to_ascii_lowercase();
    if matches!(lower.as_str(), "inf" | "infinity" | "nan") {
        return true;
    }
    if let Some(tag) = lower.strip_prefix("nan(").and_then(|r| r.strip_suffix(')')) {
        return tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    }
    match lower.strip_prefix("0x") {
        Some(hex) => is_float_literal(hex, |c| c.is_ascii_hexdigit(), 'p'),
        None => is_float_literal(&lower, |c| c.is_ascii_digit(), 'e'),
    }
}

fn is_float_literal(s: &str, digit: impl Fn(char) -> bool, exp: char) -> bool {
    let (mantissa, exponent) = match s.split_once(exp) {
        Some((m, e)) => (m, Some(e)),
        None => (s, None),
    };
    let (int, frac) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    if int.is_empty() && frac.is_empty() {
        return false;
    }
    if !int.chars().all(&digit) || !frac.chars().all(&digit) {
        return false;
    }
    match exponent {
        None => true,
        Some(e) => {
            let e = e.strip_prefix(['+', '-']).unwrap_or(e);
            !e.is_empty() && e.chars().all(|c| c.is_ascii_digit())
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "lockpid",
    version,
    about = "Put a PID into a lock file, unless a live process already holds it",
    after_help = "Exit status: 0 on success, 125 if another live process holds the lock \
                  (or --timeout expired), 124 for an already-held lock with --error-if-held, \
                  126 for usage errors, otherwise the errno of the failing system call.\n\n\
                  Only suitable for local locks, not networked locks. The file is flock'ed \
                  before its PID is checked or written, and a symlink is never followed."
)]
pub struct Cli {
    /// Directory holding lock files [default: /var/lock]
    #[arg(short = 'd', long = "directory", value_name = "DIR", env = constants::ENV_LOCK_DIR)]
    pub directory: Option<PathBuf>,

    /// PID to put in the lock (default: our parent's PID)
    #[arg(short = 'p', long = "pid", value_name = "PID", value_parser = parse_pid_arg)]
    pub pid: Option<i32>,

    /// Replace our PID in a lock we hold with NPID
    #[arg(short = 'P', long = "new-pid", value_name = "NPID", value_parser = parse_pid_arg)]
    pub new_pid: Option<i32>,

    /// Wait for the lock to become available
    #[arg(short = 'w', long)]
    pub wait: bool,

    /// Poll interval while waiting, in milliseconds (implies --wait) [default: 50.0]
    #[arg(short = 'W', long = "wait-msecs", value_name = "MS", value_parser = parse_non_negative)]
    pub wait_msecs: Option<f64>,

    /// Give up waiting after SECS seconds (implies --wait)
    #[arg(short = 't', long, value_name = "SECS", value_parser = parse_non_negative)]
    pub timeout: Option<f64>,

    /// Release the lock instead of acquiring it
    #[arg(short = 'r', long)]
    pub release: bool,

    /// Exit with status 124 if the lock is already ours
    #[arg(short = 'e', long = "error-if-held")]
    pub error_if_held: bool,

    /// Don't announce a busy lock
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Announce a successful acquire or release
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// TOML file with defaults
    #[arg(short = 'c', long, value_name = "FILE", env = constants::ENV_CONFIG)]
    pub config: Option<PathBuf>,

    /// Lock file name
    #[arg(value_name = "FILE")]
    pub files: Vec<String>,
}

/// A fully validated command line, ready to run.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub location: LockLocation,
    pub request: LockRequest,
    pub quiet: bool,
    pub verbose: bool,
}

impl Invocation {
    /// The lock file name as the user gave it.
    pub fn name(&self) -> String {
        self.location.file().display().to_string()
    }
}

impl Cli {
    /// Validate arguments and merge them with the environment and config file.
    pub fn into_invocation(self) -> Result<Invocation> {
        let identifier = self.identifier()?;
        let file_cfg = match &self.config {
            Some(path) => config::load(path).context("load defaults")?,
            None => ConfigFile::default(),
        };

        let interval_ms = match self.wait_msecs {
            Some(ms) => ms,
            None => env_wait_msecs()?
                .or(file_cfg.wait_msecs)
                .unwrap_or(constants::DEFAULT_WAIT_MSECS),
        };
        let timeout_secs = self.timeout.or(file_cfg.timeout_secs);
        let wait = if self.wait || self.wait_msecs.is_some() || self.timeout.is_some() {
            WaitPolicy::Poll {
                interval: millis(interval_ms)?,
                timeout: timeout_secs.map(seconds).transpose()?,
            }
        } else {
            WaitPolicy::NoWait
        };

        let requested_dir = self.directory.or(file_cfg.lock_dir);
        let location = LockLocation::resolve(&identifier, requested_dir);

        let owner = self.pid.map(Pid::from_raw).unwrap_or_else(unistd::getppid);
        let mut request = LockRequest::acquire(location.file(), owner)
            .with_wait(wait)
            .with_error_if_held(self.error_if_held || file_cfg.error_if_held);
        if let Some(npid) = self.new_pid {
            request = request.with_replacement(Pid::from_raw(npid));
        }
        if self.release {
            request.mode = Mode::Release;
        }

        Ok(Invocation {
            location,
            request,
            quiet: self.quiet || file_cfg.quiet,
            verbose: self.verbose,
        })
    }

    fn identifier(&self) -> Result<String> {
        let first = match self.files.first() {
            Some(first) if !first.is_empty() => first,
            Some(_) => return Err(LockError::usage("lock filename can't be empty").into()),
            None => return Err(LockError::usage("missing lock filename").into()),
        };
        if looks_numeric(first) {
            return Err(LockError::usage("lock filename can't be an integer").into());
        }
        if let Some(second) = self.files.get(1) {
            if looks_numeric(second) {
                return Err(
                    LockError::usage("give the PID with -p, not after the lock filename").into(),
                );
            }
            return Err(LockError::usage("multiple locks aren't supported yet").into());
        }
        Ok(first.clone())
    }
}

fn millis(ms: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(ms / 1000.0)
        .map_err(|_| LockError::usage(format!("'{}' is an invalid wait interval", ms)).into())
}

fn seconds(secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| LockError::usage(format!("'{}' is an invalid timeout", secs)).into())
}

fn env_wait_msecs() -> Result<Option<f64>> {
    match env::var(constants::ENV_WAIT_MSECS) {
        Ok(raw) => parse_non_negative(&raw)
            .map(Some)
            .map_err(|e| LockError::usage(format!("{}: {}", constants::ENV_WAIT_MSECS, e)).into()),
        Err(_) => Ok(None),
    }
}

/// Change into the lock directory and run the engine.
pub fn execute(inv: &Invocation) -> Result<Outcome> {
    inv.location.enter()?;
    tracing::debug!(lock = %inv.location, owner = %inv.request.owner, mode = ?inv.request.mode, "running");
    Ok(engine::run(&inv.request)?)
}

/// Print the status line scripts expect for `outcome`.
pub fn report(prog: &str, inv: &Invocation, outcome: Outcome) {
    if let Some(line) = status_line(prog, inv, outcome) {
        println!("{}", line);
    }
}

/// The stdout line for `outcome`, if any. `-q` silences every one of them.
fn status_line(prog: &str, inv: &Invocation, outcome: Outcome) -> Option<String> {
    if inv.quiet {
        return None;
    }
    let name = inv.name();
    match outcome {
        Outcome::Acquired if inv.verbose => {
            Some(format!("caller successfully acquired lock '{}'", name))
        }
        Outcome::Released if inv.verbose => Some(format!("released lock '{}'", name)),
        Outcome::Acquired | Outcome::Released => None,
        Outcome::AlreadyHeld => Some(format!("{} {}: already hold lock", prog, name)),
        Outcome::Busy {
            timed_out: true, ..
        } => Some(format!("gave up waiting for lock '{}'", name)),
        Outcome::Busy { .. } if inv.request.wait.is_waiting() => None,
        Outcome::Busy {
            holder: Some(pid), ..
        } => Some(format!("process {} holds lock '{}'", pid, name)),
        Outcome::Busy { holder: None, .. } => Some(format!("lock '{}' is busy", name)),
        Outcome::NotOwner { holder } => Some(format!(
            "process {} holds lock '{}'; not releasing",
            holder, name
        )),
    }
}

/// Exit status for a failed run.
pub fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<LockError>()
        .map(LockError::exit_code)
        .unwrap_or(constants::EXIT_UNKNOWN)
}

/// Our command name with any directory stripped.
pub fn program_name(argv0: Option<OsString>) -> String {
    argv0
        .as_deref()
        .map(Path::new)
        .and_then(Path::file_name)
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "lockpid".to_string())
}

/// Parse `args`, run, report, and return the process exit status.
pub fn main_with_args<I, T>(args: I) -> u8
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
    let prog = program_name(args.first().cloned());

    let cli = match Cli::try_parse_from(&args) {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                constants::EXIT_USAGE
            } else {
                constants::EXIT_SUCCESS
            };
        }
    };

    if let Err(e) = logging::init(cli.verbose) {
        eprintln!("{}: warning: {:#}", prog, e);
    }

    let inv = match cli.into_invocation() {
        Ok(inv) => inv,
        Err(e) => {
            eprintln!("{}: {:#}", prog, e);
            return exit_code(&e);
        }
    };

    match execute(&inv) {
        Ok(outcome) => {
            report(&prog, &inv, outcome);
            outcome.exit_code(inv.request.error_if_held)
        }
        Err(e) => {
            eprintln!("\n{} {}: {}\n", prog, inv.name(), e);
            exit_code(&e)
        }
    }
}
