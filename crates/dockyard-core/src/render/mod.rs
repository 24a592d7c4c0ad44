//! Orchestration and environment descriptors for the photo stack.
//!
//! [`render`] is pure: the same request, secret and config always produce
//! byte-identical files. [`write_artifacts`] is the only part that touches
//! the filesystem.

mod compose;
mod env;

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::ProvisionConfig;
use crate::error::ProvisionError;
use crate::request::ProvisionRequest;
use crate::secret::GeneratedSecret;

pub const COMPOSE_FILE_NAME: &str = "docker-compose.yml";
pub const ENV_FILE_NAME: &str = ".env";

/// Upload directory, relative to the install directory.
pub const UPLOAD_DIR: &str = "upload";
/// Database data directory, relative to the install directory.
pub const DATABASE_DIR: &str = "postgres";

/// Service names double as hostnames on the internal network.
pub const SERVER_SERVICE: &str = "immich-server";
pub const MICROSERVICES_SERVICE: &str = "immich-microservices";
pub const MACHINE_LEARNING_SERVICE: &str = "immich-machine-learning";
pub const REDIS_SERVICE: &str = "redis";
pub const DATABASE_SERVICE: &str = "database";

pub const MACHINE_LEARNING_PORT: u16 = 3003;
pub const MODEL_CACHE_VOLUME: &str = "model-cache";

/// One file to be written into the install directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedArtifact {
    pub file_name: &'static str,
    pub content: String,
}

impl RenderedArtifact {
    pub fn target_path(&self, dir: &Path) -> PathBuf {
        dir.join(self.file_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifacts {
    pub compose: RenderedArtifact,
    pub env: RenderedArtifact,
}

impl Artifacts {
    pub fn iter(&self) -> impl Iterator<Item = &RenderedArtifact> {
        [&self.compose, &self.env].into_iter()
    }
}

pub fn render(
    request: &ProvisionRequest,
    secret: &GeneratedSecret,
    config: &ProvisionConfig,
) -> Artifacts {
    Artifacts {
        compose: RenderedArtifact {
            file_name: COMPOSE_FILE_NAME,
            content: compose::render(request, secret, config),
        },
        env: RenderedArtifact {
            file_name: ENV_FILE_NAME,
            content: env::render(request, secret, config),
        },
    }
}

/// Write both artifacts into `dir`, creating it first. Existing files are
/// overwritten. Both files carry the database secret, so on Unix they are
/// readable by the owner only.
pub fn write_artifacts(dir: &Path, artifacts: &Artifacts) -> Result<Vec<PathBuf>, ProvisionError> {
    fs::create_dir_all(dir).map_err(|e| ProvisionError::io(dir, e))?;

    let mut written = Vec::new();
    for artifact in artifacts.iter() {
        let path = artifact.target_path(dir);
        fs::write(&path, &artifact.content).map_err(|e| ProvisionError::io(&path, e))?;
        restrict_permissions(&path)?;
        tracing::debug!(path = %path.display(), "Wrote artifact");
        written.push(path);
    }
    Ok(written)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), ProvisionError> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .map_err(|e| ProvisionError::io(path, e))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), ProvisionError> {
    Ok(())
}

/// Double-quoted YAML scalar. `$` is doubled so compose interpolation leaves
/// the value as written.
fn yaml_quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\t' => quoted.push_str("\\t"),
            '$' => quoted.push_str("$$"),
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

fn upload_location(request: &ProvisionRequest) -> PathBuf {
    request.install_path.join(UPLOAD_DIR)
}
