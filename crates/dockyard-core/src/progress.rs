//! Progress reporting from the provisioning worker to the front end.
//!
//! The worker never touches the terminal (or any widget). It pushes
//! [`ProgressEvent`]s into a bounded channel and the front end drains them on
//! its own task. Yes/no decisions travel the same way: the worker sends a
//! `Confirm` event carrying a oneshot reply and waits for the answer.

use std::fmt;
use std::path::PathBuf;

use tokio::sync::{mpsc, oneshot};

use crate::error::ProvisionError;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// States of a provisioning run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Idle,
    CheckingConflicts,
    CheckingPreconditions,
    InstallingDependency,
    Rendering,
    Pulling,
    Starting,
    Succeeded,
    Failed,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Succeeded | Stage::Failed)
    }

    pub fn description(self) -> &'static str {
        match self {
            Stage::Idle => "Validating inputs",
            Stage::CheckingConflicts => "Checking for existing instances",
            Stage::CheckingPreconditions => "Checking Docker installation",
            Stage::InstallingDependency => "Installing Docker",
            Stage::Rendering => "Writing configuration",
            Stage::Pulling => "Pulling images",
            Stage::Starting => "Starting containers",
            Stage::Succeeded => "Installation completed",
            Stage::Failed => "Installation failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Process exit codes for a finished run.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const VALIDATION: i32 = 1;
    pub const DEPENDENCY_INSTALL: i32 = 2;
    pub const ORCHESTRATION: i32 = 3;
}

/// Terminal result of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Succeeded {
        install_dir: PathBuf,
        access_url: String,
    },
    Failed {
        stage: Stage,
        reason: String,
        exit_code: i32,
    },
}

impl Outcome {
    /// Classify a step failure: validation, dependency install, or
    /// everything else.
    pub fn failed(stage: Stage, error: &ProvisionError) -> Self {
        let exit_code = match error {
            ProvisionError::Validation(_) => exit_code::VALIDATION,
            ProvisionError::Download { .. }
            | ProvisionError::ElevatedExecution { .. }
            | ProvisionError::ToolUnavailable { .. } => exit_code::DEPENDENCY_INSTALL,
            _ if stage == Stage::InstallingDependency => exit_code::DEPENDENCY_INSTALL,
            _ => exit_code::ORCHESTRATION,
        };
        Outcome::Failed {
            stage,
            reason: error.to_string(),
            exit_code,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded { .. })
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Succeeded { .. } => exit_code::SUCCESS,
            Outcome::Failed { exit_code, .. } => *exit_code,
        }
    }

    /// Human-readable summary for the final dialog or console line.
    pub fn message(&self) -> String {
        match self {
            Outcome::Succeeded {
                install_dir,
                access_url,
            } => format!(
                "Immich is now running!\n\nAccess it at: {}\n\nConfiguration saved in: {}",
                access_url,
                install_dir.display()
            ),
            Outcome::Failed { stage, reason, .. } => {
                format!("Installation failed while {}: {}", stage_gerund(*stage), reason)
            }
        }
    }
}

fn stage_gerund(stage: Stage) -> &'static str {
    match stage {
        Stage::Idle => "validating inputs",
        Stage::CheckingConflicts => "checking for existing instances",
        Stage::CheckingPreconditions => "checking Docker",
        Stage::InstallingDependency => "installing Docker",
        Stage::Rendering => "writing configuration",
        Stage::Pulling => "pulling images",
        Stage::Starting => "starting containers",
        Stage::Succeeded | Stage::Failed => "finishing",
    }
}

#[derive(Debug)]
pub enum ProgressEvent {
    Line(String),
    Stage(Stage),
    Confirm {
        prompt: String,
        reply: oneshot::Sender<bool>,
    },
    Done(Outcome),
}

/// Sending half of the progress channel.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ProgressSink {
    pub fn new(tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self { tx }
    }

    /// A bounded channel with a sink on one end.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    pub async fn line(&self, text: impl Into<String>) {
        let text = text.into();
        tracing::debug!(target: "dockyard::progress", "{}", text);
        self.send(ProgressEvent::Line(text)).await;
    }

    pub async fn stage(&self, stage: Stage) {
        tracing::debug!(?stage, "Entering stage");
        self.send(ProgressEvent::Stage(stage)).await;
    }

    pub async fn done(&self, outcome: Outcome) {
        self.send(ProgressEvent::Done(outcome)).await;
    }

    /// Ask the front end a yes/no question. A closed channel or a dropped
    /// reply counts as "no".
    pub async fn confirm(&self, prompt: impl Into<String>) -> bool {
        let (reply, answer) = oneshot::channel();
        let event = ProgressEvent::Confirm {
            prompt: prompt.into(),
            reply,
        };
        if self.tx.send(event).await.is_err() {
            tracing::debug!("Progress receiver closed; declining confirmation");
            return false;
        }
        answer.await.unwrap_or(false)
    }

    async fn send(&self, event: ProgressEvent) {
        if self.tx.send(event).await.is_err() {
            tracing::debug!("Progress receiver closed; dropping event");
        }
    }
}
