//! Installing the container engine through its upstream bootstrap script.

use std::path::Path;

use crate::CONTAINER_TOOL;
use crate::config::{InstallerSettings, TimeoutPolicy};
use crate::error::ProvisionError;
use crate::progress::ProgressSink;
use crate::request::Credential;
use crate::runner::{CommandRunner, CommandSpec};

/// Environment variables consulted, in order, for the account that should
/// join the `docker` group.
const USER_VARS: [&str; 3] = ["SUDO_USER", "USER", "LOGNAME"];

pub struct DependencyInstaller<'a, R> {
    runner: &'a R,
    sink: &'a ProgressSink,
    settings: &'a InstallerSettings,
    timeouts: TimeoutPolicy,
}

impl<'a, R: CommandRunner> DependencyInstaller<'a, R> {
    pub fn new(
        runner: &'a R,
        sink: &'a ProgressSink,
        settings: &'a InstallerSettings,
        timeouts: TimeoutPolicy,
    ) -> Self {
        Self {
            runner,
            sink,
            settings,
            timeouts,
        }
    }

    /// Download and run the bootstrap script, then enable the service.
    ///
    /// Only the download and the script itself are fatal. Group membership
    /// and service management are attempted and reported.
    pub async fn install(&self, credential: &Credential) -> Result<(), ProvisionError> {
        let installed = match self.download().await {
            Ok(()) => self.run_script(credential).await,
            Err(err) => Err(err),
        };
        self.remove_script();
        installed?;

        match invoking_user(self.settings.group_user.as_deref()) {
            Some(user) => {
                self.sink
                    .line(format!("Adding {} to the {} group...", user, CONTAINER_TOOL))
                    .await;
                self.best_effort(
                    CommandSpec::new("usermod", ["-aG", CONTAINER_TOOL, user.as_str()])
                        .elevated(credential),
                )
                .await;
            }
            None => {
                self.sink
                    .line("Could not determine the current user, skipping group membership")
                    .await;
            }
        }

        self.sink.line("Starting Docker service...").await;
        for action in ["start", "enable"] {
            let spec = CommandSpec::new("systemctl", [action, CONTAINER_TOOL]).elevated(credential);
            self.best_effort(spec).await;
        }

        self.sink.line("✓ Docker installed successfully").await;
        Ok(())
    }

    async fn download(&self) -> Result<(), ProvisionError> {
        let url = self.settings.bootstrap_url.as_str();
        let path = self.settings.script_path.to_string_lossy();
        self.sink.line("Downloading Docker installation script...").await;

        let wget = CommandSpec::new("wget", ["-O", &*path, url])
            .timeout(self.timeouts.download());
        match self.runner.run(&wget, self.sink).await {
            Ok(_) => return Ok(()),
            Err(err) => {
                tracing::debug!(command = %wget, error = %err, "wget download failed");
                self.sink.line("Trying alternative download method...").await;
            }
        }

        let curl = CommandSpec::new("curl", ["-fsSL", url, "-o", &*path])
            .timeout(self.timeouts.download());
        match self.runner.run(&curl, self.sink).await {
            Ok(_) => Ok(()),
            Err(err) => {
                tracing::warn!(%url, error = %err, "Bootstrap script download failed");
                Err(ProvisionError::Download {
                    url: url.to_string(),
                    reason: err.output_tail(3).unwrap_or_else(|| err.to_string()),
                })
            }
        }
    }

    async fn run_script(&self, credential: &Credential) -> Result<(), ProvisionError> {
        self.sink
            .line("Installing Docker (this may take several minutes)...")
            .await;
        let path = self.settings.script_path.to_string_lossy();
        let spec = CommandSpec::new("sh", [&*path])
            .elevated(credential)
            .streamed()
            .timeout(self.timeouts.install());
        self.runner
            .run(&spec, self.sink)
            .await
            .map(|_| ())
            .map_err(|err| ProvisionError::ElevatedExecution {
                command: spec.to_string(),
                reason: err.to_string(),
            })
    }

    async fn best_effort(&self, spec: CommandSpec) {
        let spec = spec.timeout(self.timeouts.service());
        if let Err(err) = self.runner.run(&spec, self.sink).await {
            tracing::warn!(command = %spec, error = %err, "Post-install step failed");
            self.sink.line(format!("⚠ {}", err)).await;
        }
    }

    fn remove_script(&self) {
        let path: &Path = &self.settings.script_path;
        if let Err(err) = std::fs::remove_file(path) {
            tracing::debug!(path = %path.display(), error = %err, "Could not remove bootstrap script");
        }
    }
}

/// The account to add to the `docker` group: the configured one, otherwise
/// whoever invoked us (through sudo or directly).
pub fn invoking_user(configured: Option<&str>) -> Option<String> {
    if let Some(user) = configured.filter(|u| !u.trim().is_empty()) {
        return Some(user.to_string());
    }
    USER_VARS
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|value| !value.trim().is_empty())
}
