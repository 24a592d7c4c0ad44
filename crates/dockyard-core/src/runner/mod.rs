//! External command execution.
//!
//! Every host interaction (docker, sudo, wget, systemctl) goes through a
//! [`CommandRunner`]. Commands are argv vectors and are never passed through
//! a shell. Elevated commands get their credential on stdin (see
//! [`CommandSpec::argv`]).

mod system;

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use system::SystemRunner;

use crate::error::ProvisionError;
use crate::progress::ProgressSink;
use crate::request::Credential;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Privilege-escalation prefix. `-S` reads the password from stdin, `-k`
/// ignores any cached ticket so stdin is always consumed by sudo, and the
/// empty prompt keeps the output clean.
const SUDO_PREFIX: [&str; 5] = ["-S", "-k", "-p", "", "--"];

#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
    pub credential: Option<Credential>,
    /// Forward each output line to the progress sink as it arrives.
    pub stream: bool,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            current_dir: None,
            credential: None,
            stream: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn elevated(mut self, credential: &Credential) -> Self {
        self.credential = Some(credential.clone());
        self
    }

    pub fn streamed(mut self) -> Self {
        self.stream = true;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_elevated(&self) -> bool {
        self.credential.is_some()
    }

    /// The program and arguments actually spawned.
    pub fn argv(&self) -> (String, Vec<String>) {
        if self.is_elevated() {
            let mut args: Vec<String> = SUDO_PREFIX.iter().map(|s| s.to_string()).collect();
            args.push(self.program.clone());
            args.extend(self.args.iter().cloned());
            ("sudo".to_string(), args)
        } else {
            (self.program.clone(), self.args.clone())
        }
    }

    /// True when the command line is `program` followed by `prefix`.
    pub fn matches(&self, program: &str, prefix: &[&str]) -> bool {
        self.program == program
            && self.args.len() >= prefix.len()
            && self.args.iter().zip(prefix).all(|(a, p)| a == p)
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_elevated() {
            f.write_str("sudo ")?;
        }
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.chars().any(char::is_whitespace) {
                write!(f, " '{}'", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub exit_code: i32,
    /// Stdout and stderr lines, merged in arrival order.
    pub output: Vec<String>,
}

impl CommandResult {
    pub fn success(output: Vec<String>) -> Self {
        Self {
            exit_code: 0,
            output,
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn text(&self) -> String {
        self.output.join("\n")
    }

    /// Turn a non-zero exit into [`ProvisionError::CommandExecution`].
    pub fn into_checked(self, spec: &CommandSpec) -> Result<Self, ProvisionError> {
        if self.is_success() {
            return Ok(self);
        }
        Err(ProvisionError::CommandExecution {
            command: spec.to_string(),
            exit_code: self.exit_code,
            output: self.output,
        })
    }
}

/// Executes [`CommandSpec`]s on behalf of the sequencer.
pub trait CommandRunner: Send + Sync {
    /// Run to completion and report the exit code, whatever it is.
    ///
    /// Errors are reserved for spawn failures and timeouts.
    fn execute(
        &self,
        spec: &CommandSpec,
        sink: &ProgressSink,
    ) -> impl Future<Output = Result<CommandResult, ProvisionError>> + Send;

    /// Like [`execute`](Self::execute), but a non-zero exit is an error.
    fn run(
        &self,
        spec: &CommandSpec,
        sink: &ProgressSink,
    ) -> impl Future<Output = Result<CommandResult, ProvisionError>> + Send {
        async move { self.execute(spec, sink).await?.into_checked(spec) }
    }
}
