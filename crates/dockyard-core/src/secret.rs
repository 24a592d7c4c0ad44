//! Per-run database secret.

use std::fmt;

use rand::Rng;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;

pub const SECRET_LEN: usize = 32;

/// Random alphanumeric token shared by the database and the application.
#[derive(Clone, PartialEq, Eq)]
pub struct GeneratedSecret(String);

impl GeneratedSecret {
    /// Draw a fresh secret from the operating system's CSPRNG.
    pub fn generate() -> Self {
        let token: String = OsRng
            .sample_iter(&Alphanumeric)
            .take(SECRET_LEN)
            .map(char::from)
            .collect();
        Self(token)
    }

    /// Wrap a known value. Rendering is deterministic given the secret,
    /// so tests pin it through here.
    pub fn from_value(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for GeneratedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("GeneratedSecret(<redacted>)")
    }
}
