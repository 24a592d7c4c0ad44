//! The provisioning state machine.
//!
//! A run walks `Idle → CheckingConflicts → CheckingPreconditions →
//! InstallingDependency → Rendering → Pulling → Starting → Succeeded`, with
//! `Failed` reachable from every non-terminal stage. Each step starts only
//! after the previous one succeeded. The sink receives one `Stage` event per
//! stage entered, exactly one `Done`, and on failure exactly one error line.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::CONTAINER_TOOL;
use crate::config::ProvisionConfig;
use crate::conflict::{ConflictResolver, RunningInstance};
use crate::error::ProvisionError;
use crate::installer::DependencyInstaller;
use crate::probe;
use crate::progress::{Outcome, ProgressSink, Stage};
use crate::render;
use crate::request::{Credential, ProvisionRequest};
use crate::runner::{CommandRunner, CommandSpec};
use crate::secret::GeneratedSecret;

pub struct Sequencer<R> {
    runner: R,
    config: ProvisionConfig,
    running: AtomicBool,
}

/// Result of a read-only look at the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentReport {
    pub tool_available: bool,
    pub daemon_reachable: bool,
    /// Running containers whose name matches the conflict pattern.
    pub conflicting: Vec<RunningInstance>,
    /// Whether some running container publishes the configured host port.
    pub port_in_use: bool,
}

impl EnvironmentReport {
    pub fn is_ready(&self) -> bool {
        self.tool_available && self.daemon_reachable
    }
}

/// Clears the running flag when a run ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<R: CommandRunner> Sequencer<R> {
    pub fn new(runner: R, config: ProvisionConfig) -> Self {
        Self {
            runner,
            config,
            running: AtomicBool::new(false),
        }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn config(&self) -> &ProvisionConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn access_url(&self) -> String {
        format!("http://localhost:{}", self.config.ports.host)
    }

    /// Provision the stack described by `request`.
    ///
    /// A call made while another run is active fails immediately with
    /// [`ProvisionError::AlreadyRunning`] and runs nothing.
    pub async fn run(&self, request: ProvisionRequest, sink: &ProgressSink) -> Outcome {
        let Some(_guard) = RunGuard::acquire(&self.running) else {
            let err = ProvisionError::AlreadyRunning;
            tracing::warn!("{}", err);
            sink.line(format!("ERROR: {}", err)).await;
            let outcome = Outcome::failed(Stage::Idle, &err);
            sink.done(outcome.clone()).await;
            return outcome;
        };

        let mut stage = Stage::Idle;
        sink.stage(stage).await;
        let outcome = match self.provision(&request, sink, &mut stage).await {
            Ok(install_dir) => {
                sink.stage(Stage::Succeeded).await;
                sink.line("✓ Installation completed successfully!").await;
                Outcome::Succeeded {
                    install_dir,
                    access_url: self.access_url(),
                }
            }
            Err(err) => {
                tracing::error!(?stage, error = %err, "Provisioning failed");
                sink.line(format!("ERROR: {}", err)).await;
                sink.stage(Stage::Failed).await;
                Outcome::failed(stage, &err)
            }
        };
        sink.done(outcome.clone()).await;
        outcome
    }

    async fn provision(
        &self,
        request: &ProvisionRequest,
        sink: &ProgressSink,
        stage: &mut Stage,
    ) -> Result<PathBuf, ProvisionError> {
        request.validate()?;
        let timeouts = self.config.timeouts;

        if request.resolve_conflicts {
            enter(Stage::CheckingConflicts, stage, sink).await;
            sink.line("Checking for existing Immich instances...").await;
            let port = self.config.ports.host;
            let resolution = ConflictResolver::new(&self.runner, sink, timeouts)
                .resolve(&self.config.conflicts.pattern, port)
                .await;
            if let Some(err) = resolution.into_error(port) {
                return Err(err);
            }
        }

        enter(Stage::CheckingPreconditions, stage, sink).await;
        sink.line("Checking Docker installation...").await;
        let ready = probe::is_tool_available(&self.runner, sink, CONTAINER_TOOL, timeouts.probe())
            .await
            && probe::is_daemon_reachable(&self.runner, sink, CONTAINER_TOOL, timeouts.probe())
                .await;

        // Group membership granted by the installer does not reach the
        // current session, so compose has to go through sudo afterwards.
        let compose_credential = if ready {
            sink.line("Docker is already installed and running").await;
            None
        } else {
            enter(Stage::InstallingDependency, stage, sink).await;
            sink.line("Docker not found. Installing Docker...").await;
            DependencyInstaller::new(&self.runner, sink, &self.config.installer, timeouts)
                .install(&request.credential)
                .await?;
            if !probe::is_tool_available(&self.runner, sink, CONTAINER_TOOL, timeouts.probe()).await
            {
                return Err(ProvisionError::ToolUnavailable {
                    tool: CONTAINER_TOOL.to_string(),
                });
            }
            Some(&request.credential)
        };

        enter(Stage::Rendering, stage, sink).await;
        let install_dir = request.install_path.clone();
        sink.line(format!(
            "Creating installation directory: {}",
            install_dir.display()
        ))
        .await;
        sink.line("Generating secure database credentials...").await;
        let secret = GeneratedSecret::generate();
        let artifacts = render::render(request, &secret, &self.config);
        for path in render::write_artifacts(&install_dir, &artifacts)? {
            sink.line(format!("Created: {}", path.display())).await;
        }

        enter(Stage::Pulling, stage, sink).await;
        sink.line("Pulling Docker images (this may take a few minutes)...")
            .await;
        self.compose(&["pull"], &install_dir, compose_credential, sink)
            .await?;

        enter(Stage::Starting, stage, sink).await;
        sink.line("Starting Immich containers...").await;
        self.compose(&["up", "-d"], &install_dir, compose_credential, sink)
            .await?;
        sink.line("✓ Immich containers started").await;

        Ok(install_dir)
    }

    async fn compose(
        &self,
        args: &[&str],
        dir: &Path,
        credential: Option<&Credential>,
        sink: &ProgressSink,
    ) -> Result<(), ProvisionError> {
        let mut spec = CommandSpec::new(
            CONTAINER_TOOL,
            std::iter::once("compose").chain(args.iter().copied()),
        )
        .current_dir(dir)
        .streamed()
        .timeout(self.config.timeouts.compose());
        if let Some(credential) = credential {
            spec = spec.elevated(credential);
        }
        self.runner.run(&spec, sink).await.map(|_| ())
    }

    /// Probe the host without changing anything.
    pub async fn inspect(&self, sink: &ProgressSink) -> Result<EnvironmentReport, ProvisionError> {
        let timeouts = self.config.timeouts;
        let tool_available =
            probe::is_tool_available(&self.runner, sink, CONTAINER_TOOL, timeouts.probe()).await;
        if !tool_available {
            return Ok(EnvironmentReport {
                tool_available,
                daemon_reachable: false,
                conflicting: Vec::new(),
                port_in_use: false,
            });
        }

        let daemon_reachable =
            probe::is_daemon_reachable(&self.runner, sink, CONTAINER_TOOL, timeouts.probe()).await;
        let instances = if daemon_reachable {
            ConflictResolver::new(&self.runner, sink, timeouts)
                .list_instances()
                .await?
                .unwrap_or_default()
        } else {
            Vec::new()
        };
        let port = self.config.ports.host;
        let port_in_use = instances.iter().any(|i| i.publishes(port));
        let conflicting = instances
            .into_iter()
            .filter(|i| i.matches(&self.config.conflicts.pattern))
            .collect();

        Ok(EnvironmentReport {
            tool_available,
            daemon_reachable,
            conflicting,
            port_in_use,
        })
    }
}

async fn enter(next: Stage, stage: &mut Stage, sink: &ProgressSink) {
    *stage = next;
    sink.stage(next).await;
}
