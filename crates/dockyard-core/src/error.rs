//! Error types for provisioning runs.

use std::path::PathBuf;
use std::time::Duration;

/// Which required input a validation failure refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestField {
    Credential,
    InstallPath,
    PrimaryStoragePath,
    ExternalStoragePath,
}

impl RequestField {
    pub fn label(self) -> &'static str {
        match self {
            RequestField::Credential => "sudo password",
            RequestField::InstallPath => "installation path",
            RequestField::PrimaryStoragePath => "photos location",
            RequestField::ExternalStoragePath => "external library path",
        }
    }
}

/// A request that cannot be provisioned as given. Recoverable by re-prompting.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Please specify the {}", .0.label())]
    MissingField(RequestField),
    #[error("The {} does not exist: {}", .field.label(), .path.display())]
    PathNotFound { field: RequestField, path: PathBuf },
}

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{tool} is not available")]
    ToolUnavailable { tool: String },

    #[error("Failed to download {url}: {reason}")]
    Download { url: String, reason: String },

    #[error("Elevated command `{command}` failed: {reason}")]
    ElevatedExecution { command: String, reason: String },

    #[error("`{command}` exited with status {exit_code}")]
    CommandExecution {
        command: String,
        exit_code: i32,
        output: Vec<String>,
    },

    #[error("`{command}` timed out after {}s", .timeout.as_secs())]
    Timeout { command: String, timeout: Duration },

    #[error("Failed to start `{command}`")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Timed out while checking for existing instances")]
    ConflictResolutionTimeout,

    #[error("Port {port} is still in use")]
    PortStillOccupied { port: u16 },

    #[error("Failed to write {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("A provisioning run is already in progress")]
    AlreadyRunning,
}

impl ProvisionError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ProvisionError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ProvisionError::Timeout { .. } | ProvisionError::ConflictResolutionTimeout
        )
    }

    /// The last few lines of captured output, if the error carries any.
    pub fn output_tail(&self, max_lines: usize) -> Option<String> {
        match self {
            ProvisionError::CommandExecution { output, .. } if !output.is_empty() => {
                let start = output.len().saturating_sub(max_lines);
                Some(output[start..].join("\n"))
            }
            _ => None,
        }
    }
}
