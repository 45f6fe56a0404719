//! External command execution
//!
//! Every external program pvarr runs (package managers, `mount`, `docker`,
//! `systemctl`, ...) goes through a [`CommandRunner`]. The host implementation
//! isolates children in their own process group and registers them for
//! cleanup; tests substitute a recording fake.

use crate::error::{PvarrError, Result};
use crate::process_guard::{CommandProcessGroup, TrackedChild};
use std::fmt;
use std::process::{Command, Stdio};
use tracing::{debug, info};

/// Captured result of one external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code (None if terminated by signal)
    pub exit_code: Option<i32>,
    pub success: bool,
}

impl CommandOutput {
    /// Successful output carrying `stdout`
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: Some(0),
            success: true,
        }
    }

    /// Failed output with exit code 1 carrying `stderr`
    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code: Some(1),
            success: false,
        }
    }

    /// Convert a non-zero exit into an error naming `context`
    pub fn ensure_success(&self, context: &str) -> Result<()> {
        if self.success {
            return Ok(());
        }
        Err(PvarrError::command(format!(
            "{} failed (exit code {}): {}",
            context,
            self.exit_code.unwrap_or(-1),
            self.stderr.trim()
        )))
    }
}

/// Runs external programs.
///
/// `run` returns `Err` only when the program could not be spawned at all;
/// a non-zero exit is reported through `CommandOutput::success`.
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput>;

    /// Whether the current process already has root privileges
    fn is_privileged(&self) -> bool {
        nix::unistd::geteuid().is_root()
    }
}

/// Convenience for call sites holding `&str` argument lists
pub fn run_args(runner: &dyn CommandRunner, program: &str, args: &[&str]) -> Result<CommandOutput> {
    let owned: Vec<String> = args.iter().map(|a| (*a).to_string()).collect();
    runner.run(program, &owned)
}

/// Runs commands on the host.
#[derive(Debug, Clone, Default)]
pub struct SystemCommandRunner {
    dry_run: bool,
}

impl SystemCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// In dry-run mode commands are logged and reported as successful
    pub fn dry_run() -> Self {
        Self { dry_run: true }
    }
}

impl CommandRunner for SystemCommandRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        info!("exec: {} {}", program, args.join(" "));

        if self.dry_run {
            info!("[DRY RUN] skipped {}", program);
            return Ok(CommandOutput::ok(""));
        }

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .in_new_process_group()
            .spawn()
            .map_err(|e| PvarrError::command(format!("failed to spawn {}: {}", program, e)))?;

        let _tracked = TrackedChild::register(child.id());
        let output = child
            .wait_with_output()
            .map_err(|e| PvarrError::command(format!("failed waiting for {}: {}", program, e)))?;

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
            success: output.status.success(),
        };
        debug!(program, exit_code = ?result.exit_code, "command finished");
        Ok(result)
    }
}

/// How privileged commands get run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Elevation {
    /// Already root: run commands as-is
    Root,
    /// Non-interactive sudo is available: prefix with `sudo`
    Sudo,
    /// No way to elevate: run as-is and expect failures
    Unavailable,
}

impl Elevation {
    /// Probe privileges: root, else `sudo -n true`, else unavailable.
    pub fn detect(runner: &dyn CommandRunner) -> Self {
        if runner.is_privileged() {
            return Self::Root;
        }
        match run_args(runner, "sudo", &["-n", "true"]) {
            Ok(out) if out.success => Self::Sudo,
            _ => Self::Unavailable,
        }
    }

    #[inline]
    pub fn can_elevate(self) -> bool {
        !matches!(self, Self::Unavailable)
    }

    /// Build the (program, args) pair for a privileged command
    pub fn wrap(self, command: &[&str]) -> (String, Vec<String>) {
        let mut parts: Vec<String> = command.iter().map(|s| (*s).to_string()).collect();
        if self == Self::Sudo {
            parts.insert(0, "sudo".to_string());
        }
        let program = parts.remove(0);
        (program, parts)
    }
}

impl fmt::Display for Elevation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root => write!(f, "root"),
            Self::Sudo => write!(f, "sudo"),
            Self::Unavailable => write!(f, "unprivileged"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_runner_captures_output() {
        let out = run_args(&SystemCommandRunner::new(), "sh", &["-c", "echo hello; exit 3"])
            .expect("sh should spawn");
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.exit_code, Some(3));
        assert!(!out.success);
    }

    #[test]
    fn test_spawn_failure_is_error() {
        let err = run_args(&SystemCommandRunner::new(), "/nonexistent/pvarr-binary", &[]).unwrap_err();
        assert!(matches!(err, PvarrError::Command(_)));
    }

    #[test]
    fn test_dry_run_does_not_execute() {
        let out = run_args(&SystemCommandRunner::dry_run(), "sh", &["-c", "exit 1"]).unwrap();
        assert!(out.success);
    }

    #[test]
    fn test_ensure_success_reports_stderr() {
        let err = CommandOutput::failed("no space left").ensure_success("apt install").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("apt install"));
        assert!(msg.contains("no space left"));
    }

    #[test]
    fn test_elevation_wrap() {
        let (program, args) = Elevation::Sudo.wrap(&["systemctl", "start", "docker"]);
        assert_eq!(program, "sudo");
        assert_eq!(args, vec!["systemctl", "start", "docker"]);

        let (program, args) = Elevation::Root.wrap(&["systemctl", "start", "docker"]);
        assert_eq!(program, "systemctl");
        assert_eq!(args, vec!["start", "docker"]);
    }
}
