//! The inputs of a single provisioning run.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{RequestField, ValidationError};

/// Elevation credential supplied by the user.
///
/// Never printed: `Debug` is redacted and there is no `Display`.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Raw secret, for writing to a child's stdin.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Snapshot of the user's inputs, handed to the sequencer by value.
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    pub credential: Credential,
    pub install_path: PathBuf,
    pub primary_storage_path: PathBuf,
    pub external_storage_path: PathBuf,
    /// Stop running instances of the service before installing.
    pub resolve_conflicts: bool,
}

impl ProvisionRequest {
    pub fn new(
        credential: Credential,
        install_path: impl Into<PathBuf>,
        primary_storage_path: impl Into<PathBuf>,
        external_storage_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            credential,
            install_path: install_path.into(),
            primary_storage_path: primary_storage_path.into(),
            external_storage_path: external_storage_path.into(),
            resolve_conflicts: true,
        }
    }

    pub fn with_resolve_conflicts(mut self, resolve: bool) -> Self {
        self.resolve_conflicts = resolve;
        self
    }

    /// Check that every input is present and both storage paths exist.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.credential.is_empty() {
            return Err(ValidationError::MissingField(RequestField::Credential));
        }
        for (field, path) in self.paths() {
            if path.as_os_str().is_empty() {
                return Err(ValidationError::MissingField(field));
            }
        }
        for (field, path) in self.storage_paths() {
            if !path.exists() {
                return Err(ValidationError::PathNotFound {
                    field,
                    path: path.to_path_buf(),
                });
            }
        }
        Ok(())
    }

    fn paths(&self) -> [(RequestField, &Path); 3] {
        [
            (RequestField::InstallPath, &self.install_path),
            (RequestField::PrimaryStoragePath, &self.primary_storage_path),
            (RequestField::ExternalStoragePath, &self.external_storage_path),
        ]
    }

    fn storage_paths(&self) -> [(RequestField, &Path); 2] {
        [
            (RequestField::PrimaryStoragePath, &self.primary_storage_path),
            (RequestField::ExternalStoragePath, &self.external_storage_path),
        ]
    }
}
