//! `.env`, read by every service through `env_file`.

use super::{
    DATABASE_SERVICE, MACHINE_LEARNING_PORT, MACHINE_LEARNING_SERVICE, REDIS_SERVICE,
    upload_location,
};
use crate::config::ProvisionConfig;
use crate::request::ProvisionRequest;
use crate::secret::GeneratedSecret;

pub(super) fn render(
    request: &ProvisionRequest,
    secret: &GeneratedSecret,
    config: &ProvisionConfig,
) -> String {
    let mut entries = vec![
        ("HOST", "0.0.0.0".to_string()),
        (
            "UPLOAD_LOCATION",
            upload_location(request).display().to_string(),
        ),
        (
            "IMMICH_MACHINE_LEARNING_URL",
            format!("http://{MACHINE_LEARNING_SERVICE}:{MACHINE_LEARNING_PORT}"),
        ),
        ("DB_PASSWORD", secret.expose().to_string()),
        ("DB_HOSTNAME", DATABASE_SERVICE.to_string()),
        ("DB_USERNAME", config.database.username.clone()),
        ("DB_DATABASE_NAME", config.database.name.clone()),
        ("REDIS_HOSTNAME", REDIS_SERVICE.to_string()),
    ];
    if let Some(tz) = &config.timezone {
        entries.push(("TZ", tz.clone()));
    }

    let mut out = String::from("# Generated by dockyard. Regenerated on every install.\n");
    for (key, value) in entries {
        out.push_str(key);
        out.push('=');
        out.push_str(&env_value(&value));
        out.push('\n');
    }
    out
}

/// Values outside a plain character set are single-quoted so compose reads
/// them literally. That covers `$` interpolation and ` #` comments.
fn env_value(value: &str) -> String {
    let plain = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "/._:-+@,=".contains(c));
    if plain {
        return value.to_string();
    }
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}
