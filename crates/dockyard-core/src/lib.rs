//! Dockyard Core Library
//!
//! Provisions a self-hosted Immich stack on a Linux host: resolves conflicts
//! with running instances, installs Docker when missing, writes the compose
//! and environment files, then pulls and starts the containers.

pub mod config;
pub mod conflict;
pub mod error;
pub mod installer;
pub mod probe;
pub mod progress;
pub mod render;
pub mod request;
pub mod runner;
pub mod secret;
pub mod sequencer;

/// The container tool every probe and orchestration command goes through.
pub const CONTAINER_TOOL: &str = "docker";

/// Re-exports of commonly used types
pub mod prelude {
    // Configuration
    pub use crate::config::{ConfigStore, ProvisionConfig, TimeoutPolicy};

    // Errors
    pub use crate::error::{ProvisionError, RequestField, ValidationError};

    // Inputs
    pub use crate::request::{Credential, ProvisionRequest};
    pub use crate::secret::GeneratedSecret;

    // Execution
    pub use crate::runner::{CommandResult, CommandRunner, CommandSpec, SystemRunner};

    // Progress
    pub use crate::progress::{Outcome, ProgressEvent, ProgressSink, Stage};

    // Sequencing
    pub use crate::conflict::{ConflictResolver, Resolution, RunningInstance};
    pub use crate::sequencer::{EnvironmentReport, Sequencer};
}
