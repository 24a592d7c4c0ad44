//! Schema for dockyard.toml.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use url::Url;

pub const DEFAULT_BOOTSTRAP_URL: &str = "https://get.docker.com";
pub const DEFAULT_PORT: u16 = 2283;

/// Everything about a deployment that is not user input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionConfig {
    /// Written as `TZ` into the environment descriptor when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    pub network: NetworkLayout,
    pub ports: PortMapping,
    pub database: DatabaseSettings,
    pub images: ImageSet,
    pub timeouts: TimeoutPolicy,
    pub conflicts: ConflictSettings,
    pub installer: InstallerSettings,
}

impl ProvisionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.ports.host == 0 || self.ports.container == 0 {
            anyhow::bail!("Ports must be non-zero");
        }
        if self.network.internal.trim().is_empty() || self.network.external.trim().is_empty() {
            anyhow::bail!("Network names must not be empty");
        }
        for name in [&self.network.internal, &self.network.external] {
            if !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            {
                anyhow::bail!("Invalid network name '{}'", name);
            }
        }
        if self.network.internal == self.network.external {
            anyhow::bail!(
                "Internal and external networks must differ (both are '{}')",
                self.network.internal
            );
        }
        if self.database.username.is_empty() || self.database.name.is_empty() {
            anyhow::bail!("Database username and name must not be empty");
        }
        if self.conflicts.pattern.trim().is_empty() {
            anyhow::bail!("Conflict pattern must not be empty");
        }
        self.installer.parsed_bootstrap_url()?;
        Ok(())
    }
}

/// Networks declared by the orchestration descriptor.
///
/// Only the application server joins `external`. Everything else talks over
/// `internal`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkLayout {
    pub internal: String,
    pub external: String,
    /// Mark the internal network `internal: true` (no outbound route).
    pub isolate_internal: bool,
}

impl Default for NetworkLayout {
    fn default() -> Self {
        Self {
            internal: "immich-internal".to_string(),
            external: "immich-public".to_string(),
            isolate_internal: true,
        }
    }
}

/// The single published port, `host:container`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortMapping {
    pub host: u16,
    pub container: u16,
}

impl Default for PortMapping {
    fn default() -> Self {
        Self {
            host: DEFAULT_PORT,
            container: DEFAULT_PORT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub username: String,
    pub name: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            username: "postgres".to_string(),
            name: "immich".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSet {
    pub server: String,
    pub machine_learning: String,
    pub redis: String,
    pub database: String,
}

impl Default for ImageSet {
    fn default() -> Self {
        Self {
            server: "ghcr.io/immich-app/immich-server:release".to_string(),
            machine_learning: "ghcr.io/immich-app/immich-machine-learning:release".to_string(),
            redis: "redis:6.2-alpine".to_string(),
            database: "tensorchord/pgvecto-rs:pg14-v0.2.0".to_string(),
        }
    }
}

/// Per-class command timeouts, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutPolicy {
    pub probe_secs: u64,
    pub list_secs: u64,
    pub stop_secs: u64,
    pub teardown_secs: u64,
    pub download_secs: u64,
    pub install_secs: u64,
    /// `usermod` and `systemctl` calls after the install script.
    pub service_secs: u64,
    pub compose_secs: u64,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            probe_secs: 5,
            list_secs: 10,
            stop_secs: 30,
            teardown_secs: 60,
            download_secs: 60,
            install_secs: 600,
            service_secs: 60,
            compose_secs: 300,
        }
    }
}

impl TimeoutPolicy {
    pub fn probe(&self) -> Duration {
        Duration::from_secs(self.probe_secs)
    }

    pub fn list(&self) -> Duration {
        Duration::from_secs(self.list_secs)
    }

    pub fn stop(&self) -> Duration {
        Duration::from_secs(self.stop_secs)
    }

    pub fn teardown(&self) -> Duration {
        Duration::from_secs(self.teardown_secs)
    }

    pub fn download(&self) -> Duration {
        Duration::from_secs(self.download_secs)
    }

    pub fn install(&self) -> Duration {
        Duration::from_secs(self.install_secs)
    }

    pub fn service(&self) -> Duration {
        Duration::from_secs(self.service_secs)
    }

    pub fn compose(&self) -> Duration {
        Duration::from_secs(self.compose_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictSettings {
    /// Case-insensitive substring matched against container and project names.
    pub pattern: String,
}

impl Default for ConflictSettings {
    fn default() -> Self {
        Self {
            pattern: "immich".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallerSettings {
    /// Where the Docker convenience script is fetched from. Must be http(s).
    pub bootstrap_url: String,
    pub script_path: PathBuf,
    /// Account added to the `docker` group. Falls back to the invoking user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_user: Option<String>,
}

impl Default for InstallerSettings {
    fn default() -> Self {
        Self {
            bootstrap_url: DEFAULT_BOOTSTRAP_URL.to_string(),
            script_path: std::env::temp_dir().join("get-docker.sh"),
            group_user: None,
        }
    }
}

impl InstallerSettings {
    /// Parse `bootstrap_url`, rejecting anything that is not http(s).
    pub fn parsed_bootstrap_url(&self) -> anyhow::Result<Url> {
        let url = Url::parse(&self.bootstrap_url)
            .with_context(|| format!("Invalid bootstrap URL '{}'", self.bootstrap_url))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => anyhow::bail!("Unsupported bootstrap URL scheme '{}': {}", other, url),
        }
    }
}
