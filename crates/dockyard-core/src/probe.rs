//! Read-only probes for external tools.
//!
//! Any failure (missing binary, non-zero exit, timeout) reads as "not
//! available". Callers only ever see a boolean.

use std::time::Duration;

use crate::progress::ProgressSink;
use crate::runner::{CommandRunner, CommandSpec};

/// `<tool> --version` exits zero.
pub async fn is_tool_available<R: CommandRunner>(
    runner: &R,
    sink: &ProgressSink,
    tool: &str,
    timeout: Duration,
) -> bool {
    probe(runner, sink, CommandSpec::new(tool, ["--version"]).timeout(timeout)).await
}

/// `<tool> ps` exits zero, meaning the daemon behind the tool answers.
pub async fn is_daemon_reachable<R: CommandRunner>(
    runner: &R,
    sink: &ProgressSink,
    tool: &str,
    timeout: Duration,
) -> bool {
    probe(runner, sink, CommandSpec::new(tool, ["ps"]).timeout(timeout)).await
}

async fn probe<R: CommandRunner>(runner: &R, sink: &ProgressSink, spec: CommandSpec) -> bool {
    match runner.run(&spec, sink).await {
        Ok(_) => true,
        Err(err) => {
            tracing::debug!(command = %spec, error = %err, "Probe failed");
            false
        }
    }
}
