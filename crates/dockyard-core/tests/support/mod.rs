//! Scripted command runner for sequencer and resolver tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;

use dockyard_core::error::ProvisionError;
use dockyard_core::progress::{ProgressEvent, ProgressSink};
use dockyard_core::runner::{CommandResult, CommandRunner, CommandSpec};
use tokio::sync::{Semaphore, mpsc};

/// What a scripted command does when invoked.
#[derive(Debug, Clone)]
pub enum Reply {
    Exit(i32, Vec<String>),
    Timeout,
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Exit(0, Vec::new())
    }

    pub fn ok_with(lines: &[&str]) -> Self {
        Reply::Exit(0, lines.iter().map(|l| l.to_string()).collect())
    }

    pub fn fail(code: i32) -> Self {
        Reply::Exit(code, Vec::new())
    }

    pub fn fail_with(code: i32, lines: &[&str]) -> Self {
        Reply::Exit(code, lines.iter().map(|l| l.to_string()).collect())
    }
}

struct Rule {
    program: String,
    prefix: Vec<String>,
    /// Consumed front to back; the last reply repeats.
    replies: VecDeque<Reply>,
}

impl Rule {
    fn matches(&self, spec: &CommandSpec) -> bool {
        let prefix: Vec<&str> = self.prefix.iter().map(String::as_str).collect();
        spec.matches(&self.program, &prefix)
    }

    fn next(&mut self) -> Reply {
        if self.replies.len() > 1 {
            self.replies.pop_front().unwrap_or_else(Reply::ok)
        } else {
            self.replies.front().cloned().unwrap_or_else(Reply::ok)
        }
    }
}

/// Answers every command with exit 0 unless a rule says otherwise. Later
/// rules take precedence over earlier ones.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<CommandSpec>>,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// A healthy host: docker installed, daemon up, nothing running.
    pub fn docker_ready() -> Self {
        Self::new()
    }

    /// No docker binary yet.
    pub fn docker_missing() -> Self {
        Self::new()
            .on("docker", &["--version"], Reply::fail(127))
            .on("docker", &["ps"], Reply::fail(127))
    }

    pub fn on(self, program: &str, prefix: &[&str], reply: Reply) -> Self {
        self.on_each(program, prefix, vec![reply])
    }

    pub fn on_each(self, program: &str, prefix: &[&str], replies: Vec<Reply>) -> Self {
        self.rules
            .lock()
            .unwrap()
            .push(Rule {
                program: program.to_string(),
                prefix: prefix.iter().map(|p| p.to_string()).collect(),
                replies: replies.into(),
            });
        self
    }

    /// Block every command until the returned semaphore gets permits.
    pub fn gated(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.gate = Some(gate.clone());
        (self, gate)
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    /// Every call rendered as a command line, elevated ones with `sudo `.
    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(ToString::to_string).collect()
    }

    pub fn called(&self, program: &str, prefix: &[&str]) -> bool {
        self.calls().iter().any(|c| c.matches(program, prefix))
    }

    fn reply_for(&self, spec: &CommandSpec) -> Reply {
        let mut rules = self.rules.lock().unwrap();
        rules
            .iter_mut()
            .rev()
            .find(|rule| rule.matches(spec))
            .map(Rule::next)
            .unwrap_or_else(Reply::ok)
    }
}

impl CommandRunner for ScriptedRunner {
    async fn execute(
        &self,
        spec: &CommandSpec,
        sink: &ProgressSink,
    ) -> Result<CommandResult, ProvisionError> {
        self.calls.lock().unwrap().push(spec.clone());
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await;
        }
        match self.reply_for(spec) {
            Reply::Exit(exit_code, output) => {
                if spec.stream {
                    for line in &output {
                        sink.line(line.clone()).await;
                    }
                }
                Ok(CommandResult { exit_code, output })
            }
            Reply::Timeout => Err(ProvisionError::Timeout {
                command: spec.to_string(),
                timeout: spec.timeout,
            }),
        }
    }
}

/// Everything the front end would have seen.
#[derive(Debug, Default)]
pub struct Transcript {
    pub lines: Vec<String>,
    pub stages: Vec<dockyard_core::progress::Stage>,
    pub prompts: Vec<String>,
    pub outcomes: Vec<dockyard_core::progress::Outcome>,
}

impl Transcript {
    pub fn has_line(&self, needle: &str) -> bool {
        self.lines.iter().any(|l| l.contains(needle))
    }

    pub fn error_lines(&self) -> Vec<&String> {
        self.lines.iter().filter(|l| l.starts_with("ERROR")).collect()
    }
}

/// Drain the channel until every sink is dropped, answering each
/// confirmation with `answer`.
pub async fn drain(mut rx: mpsc::Receiver<ProgressEvent>, answer: bool) -> Transcript {
    let mut transcript = Transcript::default();
    while let Some(event) = rx.recv().await {
        match event {
            ProgressEvent::Line(line) => transcript.lines.push(line),
            ProgressEvent::Stage(stage) => transcript.stages.push(stage),
            ProgressEvent::Confirm { prompt, reply } => {
                transcript.prompts.push(prompt);
                let _ = reply.send(answer);
            }
            ProgressEvent::Done(outcome) => transcript.outcomes.push(outcome),
        }
    }
    transcript
}

/// A sink whose events are collected on a background task.
pub fn recording_sink(answer: bool) -> (ProgressSink, tokio::task::JoinHandle<Transcript>) {
    let (sink, rx) = ProgressSink::channel(1024);
    let handle = tokio::spawn(drain(rx, answer));
    (sink, handle)
}
