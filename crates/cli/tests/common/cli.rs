//! Helpers for running the `fsmon` binary
//!
//! One-shot commands run to completion through [`FsmonCommand::execute`];
//! `fsmon monitor` is started with [`FsmonCommand::spawn`] so the test can
//! touch the file system while it runs.

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, Command, Stdio};
use std::time::{Duration, Instant};

/// CLI command builder
pub struct FsmonCommand {
    binary_path: PathBuf,
    working_dir: PathBuf,
    args: Vec<String>,
    env: HashMap<String, String>,
}

impl FsmonCommand {
    /// Create a new command in the given working directory
    ///
    /// `XDG_CONFIG_HOME` points into the working directory so a user config
    /// never leaks into a test.
    pub fn new(working_dir: impl AsRef<Path>) -> Self {
        let working_dir = working_dir.as_ref().to_path_buf();
        let mut env = HashMap::new();
        env.insert(
            "XDG_CONFIG_HOME".to_string(),
            working_dir.join(".config").display().to_string(),
        );

        Self {
            binary_path: PathBuf::from(env!("CARGO_BIN_EXE_fsmon")),
            working_dir,
            args: Vec::new(),
            env,
        }
    }

    /// Add command arguments
    pub fn args(&mut self, args: &[&str]) -> &mut Self {
        self.args.extend(args.iter().map(|s| s.to_string()));
        self
    }

    /// Add a path argument
    pub fn path_arg(&mut self, path: impl AsRef<Path>) -> &mut Self {
        self.args.push(path.as_ref().display().to_string());
        self
    }

    /// Set environment variable
    pub fn env(&mut self, key: &str, value: &str) -> &mut Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.binary_path);
        command
            .args(&self.args)
            .current_dir(&self.working_dir)
            .envs(&self.env);
        command
    }

    /// Run to completion
    pub fn execute(&self) -> Result<CommandResult> {
        let start = Instant::now();
        let output = self
            .command()
            .output()
            .context("Failed to execute fsmon")?;

        Ok(CommandResult {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
            duration: start.elapsed(),
        })
    }

    /// Execute and assert success
    pub fn assert_success(&self) -> Result<CommandResult> {
        let result = self.execute()?;

        if !result.success() {
            bail!(
                "Command failed (exit code: {}):\nArgs: {:?}\nStdout: {}\nStderr: {}",
                result.exit_code,
                self.args,
                result.stdout,
                result.stderr
            );
        }

        Ok(result)
    }

    /// Execute and expect failure
    pub fn assert_failure(&self) -> Result<CommandResult> {
        let result = self.execute()?;

        if result.success() {
            bail!(
                "Command should have failed but succeeded:\nArgs: {:?}\nStdout: {}",
                self.args,
                result.stdout
            );
        }

        Ok(result)
    }

    /// Start in the background with piped output
    pub fn spawn(&self) -> Result<RunningCommand> {
        let mut child = self
            .command()
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("Failed to spawn fsmon")?;
        let stderr = child.stderr.take().context("stderr not piped")?;

        Ok(RunningCommand {
            child,
            stderr: BufReader::new(stderr),
            stderr_seen: String::new(),
            started: Instant::now(),
        })
    }
}

/// A command started with [`FsmonCommand::spawn`]
pub struct RunningCommand {
    child: Child,
    stderr: BufReader<ChildStderr>,
    stderr_seen: String,
    started: Instant,
}

impl RunningCommand {
    /// Block until a stderr line contains `needle`
    pub fn wait_for_stderr(&mut self, needle: &str) -> Result<()> {
        loop {
            let mut line = String::new();
            let read = self.stderr.read_line(&mut line)?;
            if read == 0 {
                bail!("fsmon exited before printing {:?}:\n{}", needle, self.stderr_seen);
            }
            self.stderr_seen.push_str(&line);
            if line.contains(needle) {
                return Ok(());
            }
        }
    }

    /// Wait for exit, killing the process once `timeout` has passed
    pub fn finish(mut self, timeout: Duration) -> Result<CommandResult> {
        let deadline = Instant::now() + timeout;
        let status = loop {
            if let Some(status) = self.child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                self.child.kill()?;
                bail!("fsmon did not exit within {:?}:\n{}", timeout, self.stderr_seen);
            }
            std::thread::sleep(Duration::from_millis(20));
        };

        let mut stdout = String::new();
        if let Some(mut pipe) = self.child.stdout.take() {
            pipe.read_to_string(&mut stdout)?;
        }
        let mut rest = String::new();
        self.stderr.read_to_string(&mut rest)?;
        self.stderr_seen.push_str(&rest);

        Ok(CommandResult {
            stdout,
            stderr: self.stderr_seen,
            exit_code: status.code().unwrap_or(-1),
            duration: self.started.elapsed(),
        })
    }
}

/// Command execution result with timing
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration: Duration,
}

impl CommandResult {
    /// Check if command succeeded
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Check if stdout contains text
    pub fn contains_stdout(&self, text: &str) -> bool {
        self.stdout.contains(text)
    }

    /// Check if stderr contains text
    pub fn contains_stderr(&self, text: &str) -> bool {
        self.stderr.contains(text)
    }

    /// Parse `--json` event lines
    pub fn events(&self) -> Result<Vec<serde_json::Value>> {
        self.stdout
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).with_context(|| format!("Not JSON: {}", line)))
            .collect()
    }
}

/// Macro for convenient command construction
///
/// Usage:
/// ```ignore
/// fsmon!(dir, "backends").assert_success()?;
/// ```
#[macro_export]
macro_rules! fsmon {
    ($dir:expr, $($arg:expr),*) => {{
        let mut cmd = $crate::common::cli::FsmonCommand::new($dir);
        cmd.args(&[$($arg),*]);
        cmd
    }};
}
