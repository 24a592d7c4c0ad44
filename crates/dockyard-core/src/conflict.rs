//! Stopping previously deployed instances before redeploying.
//!
//! Matching containers are stopped one by one, then any compose project
//! with a matching name is torn down. Each stop is best-effort. A timeout on
//! any docker call aborts the whole resolution.

use std::collections::BTreeSet;

use serde::Deserialize;

use crate::CONTAINER_TOOL;
use crate::config::TimeoutPolicy;
use crate::error::ProvisionError;
use crate::probe;
use crate::progress::ProgressSink;
use crate::runner::{CommandRunner, CommandSpec};

const PS_FORMAT: &str = "{{.Names}}\t{{.Ports}}";

/// A container observed through `docker ps`. Never owned by us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningInstance {
    pub name: String,
    pub ports: BTreeSet<String>,
}

impl RunningInstance {
    /// Parse one `{{.Names}}\t{{.Ports}}` line.
    pub fn parse(line: &str) -> Option<Self> {
        let (name, ports) = line.split_once('\t').unwrap_or((line, ""));
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        let ports = ports
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();
        Some(Self {
            name: name.to_string(),
            ports,
        })
    }

    pub fn matches(&self, pattern: &str) -> bool {
        name_matches(&self.name, pattern)
    }

    /// True when `port` is published on the host side.
    pub fn publishes(&self, port: u16) -> bool {
        self.ports.iter().any(|entry| {
            host_port_range(entry).is_some_and(|(lo, hi)| (lo..=hi).contains(&port))
        })
    }
}

/// Host side of `0.0.0.0:2283->2283/tcp` or `:::8000-8010->80/tcp`.
fn host_port_range(entry: &str) -> Option<(u16, u16)> {
    let (host, _) = entry.split_once("->")?;
    let ports = host.rsplit(':').next()?;
    match ports.split_once('-') {
        Some((lo, hi)) => Some((lo.parse().ok()?, hi.parse().ok()?)),
        None => {
            let port = ports.parse().ok()?;
            Some((port, port))
        }
    }
}

fn name_matches(name: &str, pattern: &str) -> bool {
    name.to_lowercase().contains(&pattern.to_lowercase())
}

/// One entry of `docker compose ls --format json`.
#[derive(Debug, Clone, Deserialize)]
pub struct ComposeProject {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "ConfigFiles", default)]
    pub config_files: String,
}

impl ComposeProject {
    pub fn primary_config_file(&self) -> Option<&str> {
        self.config_files
            .split(',')
            .map(str::trim)
            .find(|f| !f.is_empty())
    }
}

pub fn parse_compose_projects(json: &str) -> Result<Vec<ComposeProject>, serde_json::Error> {
    let trimmed = json.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(trimmed)
}

/// How conflict resolution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Nothing left in the way.
    Clear,
    /// The port is still busy but the user chose to continue.
    Overridden,
    /// The port is still busy and the user declined.
    Declined,
    /// A listing or stop call timed out.
    TimedOut,
}

impl Resolution {
    pub fn may_proceed(self) -> bool {
        matches!(self, Resolution::Clear | Resolution::Overridden)
    }

    /// The error to report when the run cannot proceed.
    pub fn into_error(self, port: u16) -> Option<ProvisionError> {
        match self {
            Resolution::Clear | Resolution::Overridden => None,
            Resolution::Declined => Some(ProvisionError::PortStillOccupied { port }),
            Resolution::TimedOut => Some(ProvisionError::ConflictResolutionTimeout),
        }
    }
}

pub struct ConflictResolver<'a, R> {
    runner: &'a R,
    sink: &'a ProgressSink,
    timeouts: TimeoutPolicy,
}

impl<'a, R: CommandRunner> ConflictResolver<'a, R> {
    pub fn new(runner: &'a R, sink: &'a ProgressSink, timeouts: TimeoutPolicy) -> Self {
        Self {
            runner,
            sink,
            timeouts,
        }
    }

    pub async fn resolve(&self, pattern: &str, port: u16) -> Resolution {
        match self.try_resolve(pattern, port).await {
            Ok(resolution) => resolution,
            Err(err) => {
                tracing::warn!(error = %err, "Conflict resolution aborted");
                self.sink
                    .line("Timeout while checking for existing instances")
                    .await;
                Resolution::TimedOut
            }
        }
    }

    /// Only timeouts surface as errors. Everything else is logged.
    async fn try_resolve(&self, pattern: &str, port: u16) -> Result<Resolution, ProvisionError> {
        if !probe::is_tool_available(self.runner, self.sink, CONTAINER_TOOL, self.timeouts.probe())
            .await
        {
            self.sink
                .line("Docker not installed yet, skipping existing instance check")
                .await;
            return Ok(Resolution::Clear);
        }

        self.sink
            .line(format!("Searching for running '{}' containers...", pattern))
            .await;
        let Some(instances) = self.list_instances().await? else {
            self.sink.line("Could not check for existing containers").await;
            return Ok(Resolution::Clear);
        };

        let matching: Vec<&RunningInstance> =
            instances.iter().filter(|i| i.matches(pattern)).collect();
        if matching.is_empty() {
            self.sink.line("No existing containers found").await;
            return Ok(Resolution::Clear);
        }

        let names: Vec<&str> = matching.iter().map(|i| i.name.as_str()).collect();
        self.sink
            .line(format!(
                "Found {} matching container(s): {}",
                matching.len(),
                names.join(", ")
            ))
            .await;
        if instances.iter().any(|i| i.publishes(port)) {
            self.sink
                .line(format!("⚠ Port {} is currently in use by a Docker container", port))
                .await;
        }

        for instance in &matching {
            self.stop(instance).await?;
        }

        self.teardown_projects(pattern).await?;

        self.sink
            .line(format!("Verifying port {} is now free...", port))
            .await;
        let still_busy = self
            .list_instances()
            .await?
            .is_some_and(|list| list.iter().any(|i| i.publishes(port)));
        if !still_busy {
            self.sink
                .line(format!("✓ Port {} is now available", port))
                .await;
            return Ok(Resolution::Clear);
        }

        self.sink
            .line(format!("⚠ Warning: Port {} may still be in use", port))
            .await;
        let proceed = self
            .sink
            .confirm(format!(
                "Port {} appears to still be in use. Continue anyway?",
                port
            ))
            .await;
        Ok(if proceed {
            Resolution::Overridden
        } else {
            Resolution::Declined
        })
    }

    /// `None` when docker answered but the listing failed.
    pub async fn list_instances(&self) -> Result<Option<Vec<RunningInstance>>, ProvisionError> {
        let spec = CommandSpec::new(CONTAINER_TOOL, ["ps", "--format", PS_FORMAT])
            .timeout(self.timeouts.list());
        match self.runner.run(&spec, self.sink).await {
            Ok(result) => Ok(Some(
                result
                    .output
                    .iter()
                    .filter_map(|line| RunningInstance::parse(line))
                    .collect(),
            )),
            Err(err) if err.is_timeout() => Err(err),
            Err(err) => {
                tracing::warn!(error = %err, "Listing containers failed");
                Ok(None)
            }
        }
    }

    async fn stop(&self, instance: &RunningInstance) -> Result<(), ProvisionError> {
        self.sink
            .line(format!("Stopping container: {}", instance.name))
            .await;
        let spec = CommandSpec::new(CONTAINER_TOOL, ["stop", instance.name.as_str()])
            .timeout(self.timeouts.stop());
        match self.runner.run(&spec, self.sink).await {
            Ok(_) => {
                self.sink
                    .line(format!("✓ Stopped: {}", instance.name))
                    .await;
            }
            Err(err) if err.is_timeout() => return Err(err),
            Err(err) => {
                let detail = err.output_tail(3).unwrap_or_else(|| err.to_string());
                tracing::warn!(container = %instance.name, error = %err, "Stop failed");
                self.sink
                    .line(format!("⚠ Failed to stop {}: {}", instance.name, detail))
                    .await;
            }
        }
        Ok(())
    }

    async fn teardown_projects(&self, pattern: &str) -> Result<(), ProvisionError> {
        self.sink
            .line("Checking for Docker Compose projects...")
            .await;
        // --all: the containers were just stopped, so their projects no
        // longer show as running.
        let spec = CommandSpec::new(CONTAINER_TOOL, ["compose", "ls", "--all", "--format", "json"])
            .timeout(self.timeouts.list());
        let listing = match self.runner.run(&spec, self.sink).await {
            Ok(result) => result.text(),
            Err(err) if err.is_timeout() => return Err(err),
            Err(err) => {
                tracing::warn!(error = %err, "Listing compose projects failed");
                return Ok(());
            }
        };

        let projects = match parse_compose_projects(&listing) {
            Ok(projects) => projects,
            Err(err) => {
                tracing::warn!(error = %err, "Unparseable compose project list");
                self.sink.line("Could not parse compose project list").await;
                return Ok(());
            }
        };

        for project in projects.iter().filter(|p| name_matches(&p.name, pattern)) {
            self.teardown(project).await?;
        }
        Ok(())
    }

    async fn teardown(&self, project: &ComposeProject) -> Result<(), ProvisionError> {
        let spec = match project.primary_config_file() {
            Some(file) => {
                self.sink
                    .line(format!("Found project '{}' at: {}", project.name, file))
                    .await;
                let spec = CommandSpec::new(CONTAINER_TOOL, ["compose", "-f", file, "down"]);
                match std::path::Path::new(file).parent() {
                    Some(dir) if dir.is_dir() => spec.current_dir(dir),
                    _ => spec,
                }
            }
            None => {
                self.sink
                    .line(format!("Found project '{}'", project.name))
                    .await;
                CommandSpec::new(CONTAINER_TOOL, ["compose", "-p", project.name.as_str(), "down"])
            }
        }
        .timeout(self.timeouts.teardown());

        self.sink.line("Running docker compose down...").await;
        match self.runner.run(&spec, self.sink).await {
            Ok(_) => {
                self.sink
                    .line(format!("✓ Stopped Docker Compose project '{}'", project.name))
                    .await;
            }
            Err(err) if err.is_timeout() => return Err(err),
            Err(err) => {
                let detail = err.output_tail(3).unwrap_or_else(|| err.to_string());
                self.sink
                    .line(format!("⚠ Compose down failed for '{}': {}", project.name, detail))
                    .await;
            }
        }
        Ok(())
    }
}
