//! [`CommandRunner`] backed by real child processes.

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use super::{CommandResult, CommandRunner, CommandSpec};
use crate::error::ProvisionError;
use crate::progress::ProgressSink;

const LINE_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for SystemRunner {
    async fn execute(
        &self,
        spec: &CommandSpec,
        sink: &ProgressSink,
    ) -> Result<CommandResult, ProvisionError> {
        let (program, args) = spec.argv();
        let mut command = Command::new(&program);
        command
            .args(&args)
            .stdin(if spec.is_elevated() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.current_dir {
            command.current_dir(dir);
        }

        tracing::debug!(command = %spec, timeout_secs = spec.timeout.as_secs(), "Running command");
        let mut child = command.spawn().map_err(|source| ProvisionError::Spawn {
            command: spec.to_string(),
            source,
        })?;

        let (line_tx, mut line_rx) = mpsc::channel::<String>(LINE_BUFFER);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, line_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, line_tx.clone()));
        }
        drop(line_tx);
        let stdin = child.stdin.take();

        let work = async {
            if let (Some(mut stdin), Some(credential)) = (stdin, spec.credential.as_ref()) {
                let mut payload = credential.expose().as_bytes().to_vec();
                payload.push(b'\n');
                // sudo may exit before reading; the exit status reports that.
                if let Err(err) = stdin.write_all(&payload).await {
                    tracing::debug!(command = %spec, error = %err, "Could not write credential");
                }
            }

            let mut output = Vec::new();
            while let Some(line) = line_rx.recv().await {
                if spec.stream {
                    sink.line(line.clone()).await;
                }
                output.push(line);
            }
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, output))
        };

        match tokio::time::timeout(spec.timeout, work).await {
            Ok(Ok((status, output))) => {
                let exit_code = status.code().unwrap_or(-1);
                tracing::debug!(command = %spec, exit_code, "Command finished");
                Ok(CommandResult { exit_code, output })
            }
            Ok(Err(source)) => Err(ProvisionError::Spawn {
                command: spec.to_string(),
                source,
            }),
            Err(_) => {
                if let Err(err) = child.start_kill() {
                    tracing::debug!(command = %spec, error = %err, "Could not kill timed out command");
                }
                tracing::warn!(command = %spec, timeout_secs = spec.timeout.as_secs(), "Command timed out");
                Err(ProvisionError::Timeout {
                    command: spec.to_string(),
                    timeout: spec.timeout,
                })
            }
        }
    }
}

/// Read `reader` to EOF, one line at a time. Bytes that are not UTF-8 are
/// replaced rather than ending the read, so the child never sees a closed pipe.
async fn forward_lines<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut receiver_open = true;
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                tracing::debug!(error = %err, "Stopped reading command output");
                break;
            }
        }
        if !receiver_open {
            continue;
        }
        let line = String::from_utf8_lossy(trim_newline(&buf)).into_owned();
        if tx.send(line).await.is_err() {
            receiver_open = false;
        }
    }
}

fn trim_newline(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
