//! Secret handling
//!
//! Broker keys, the LLM key and collector credentials are held in
//! `Zeroizing<String>` so they are wiped from memory on drop.
//!
//! An environment value of the form `op://vault/item/field` is resolved with
//! the 1Password CLI instead of being used literally.

use std::env;
use tracing::{info, warn};
use zeroize::Zeroizing;

/// Error type for secret loading operations
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("1Password CLI error: {0}")]
    OnePasswordError(String),

    #[error("Environment variable not set: {0}")]
    EnvVarNotSet(String),

    #[error("Secret validation failed: {0}")]
    ValidationFailed(String),
}

/// Load a required secret from `env_var_name`.
pub fn load_secret(env_var_name: &str) -> Result<Zeroizing<String>, SecretError> {
    let raw = load_from_env(env_var_name)?;
    if raw.trim().is_empty() {
        return Err(SecretError::EnvVarNotSet(env_var_name.to_string()));
    }

    if let Some(reference) = raw.strip_prefix("op://") {
        let secret = load_from_op_cli(&format!("op://{}", reference))?;
        info!("✓ Loaded secret from 1Password CLI: {}", env_var_name);
        return Ok(secret);
    }

    Ok(Zeroizing::new(raw.trim().to_string()))
}

/// Like [`load_secret`], but a missing or empty variable is `None`.
/// A failing 1Password reference is logged and also `None`.
pub fn optional_secret(env_var_name: &str) -> Option<Zeroizing<String>> {
    match load_secret(env_var_name) {
        Ok(secret) => Some(secret),
        Err(SecretError::EnvVarNotSet(_)) => None,
        Err(e) => {
            warn!("Ignoring secret {}: {}", env_var_name, e);
            None
        }
    }
}

/// Load a secret from 1Password CLI
fn load_from_op_cli(reference: &str) -> Result<Zeroizing<String>, SecretError> {
    use std::process::Command;

    let output = Command::new("op")
        .arg("read")
        .arg(reference)
        .output()
        .map_err(|e| {
            SecretError::OnePasswordError(format!(
                "Failed to execute 'op' command: {}. Install 1Password CLI from https://developer.1password.com/docs/cli",
                e
            ))
        })?;

    if !output.status.success() {
        let error_msg = String::from_utf8_lossy(&output.stderr);
        return Err(SecretError::OnePasswordError(format!(
            "1Password CLI failed: {}",
            error_msg
        )));
    }

    let secret = String::from_utf8(output.stdout)
        .map_err(|e| SecretError::OnePasswordError(format!("Invalid UTF-8 from 1Password: {}", e)))?
        .trim()
        .to_string();

    if secret.is_empty() {
        return Err(SecretError::OnePasswordError(
            "1Password returned empty secret".to_string(),
        ));
    }

    Ok(Zeroizing::new(secret))
}

/// Load a secret from environment variable (wrapped in Zeroizing)
fn load_from_env(env_var_name: &str) -> Result<Zeroizing<String>, SecretError> {
    env::var(env_var_name)
        .map(Zeroizing::new)
        .map_err(|_| SecretError::EnvVarNotSet(env_var_name.to_string()))
}

/// Validate that a secret meets minimum length and is not an obvious placeholder
pub fn validate_secret_strength(secret: &str, min_length: usize) -> Result<(), SecretError> {
    if secret.len() < min_length {
        return Err(SecretError::ValidationFailed(format!(
            "Secret too short: {} characters (minimum: {})",
            secret.len(),
            min_length
        )));
    }

    let weak_patterns = ["test", "demo", "example", "placeholder", "changeme", "12345"];
    let secret_lower = secret.to_lowercase();

    for pattern in &weak_patterns {
        if secret_lower.contains(pattern) {
            return Err(SecretError::ValidationFailed(format!(
                "Secret contains weak pattern: {}",
                pattern
            )));
        }
    }

    Ok(())
}

/// Keep the first `visible` characters, mask the rest.
pub fn mask(secret: &str, visible: usize) -> String {
    let shown: String = secret.chars().take(visible).collect();
    let hidden = secret.chars().count().saturating_sub(visible);
    format!("{}{}", shown, "*".repeat(hidden))
}
