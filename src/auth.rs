use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use std::collections::HashSet;
use std::sync::Arc;

/// Minimum accepted key length (256 bits as hex)
const MIN_KEY_LENGTH: usize = 32;

/// Bearer keys accepted by the HTTP API. An empty set disables the check.
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    keys: Arc<HashSet<String>>,
}

impl ApiKeys {
    /// Keep the keys that meet the minimum length; weak ones are logged and
    /// dropped.
    pub fn new(keys: &[String]) -> Self {
        let mut accepted = HashSet::new();
        for key in keys.iter().map(|k| k.trim()).filter(|k| !k.is_empty()) {
            if key.len() < MIN_KEY_LENGTH {
                tracing::error!(
                    "SECURITY: ignoring API key that is too weak (length: {}, minimum: {})",
                    key.len(),
                    MIN_KEY_LENGTH
                );
                continue;
            }
            accepted.insert(key.to_string());
        }

        if accepted.is_empty() {
            tracing::warn!("No API keys configured, HTTP API is unauthenticated");
        } else {
            tracing::info!(
                "✓ API authentication initialized with {} valid key(s)",
                accepted.len()
            );
        }

        Self {
            keys: Arc::new(accepted),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.keys.is_empty()
    }

    fn is_valid(&self, key: &str) -> bool {
        self.keys.contains(key)
    }
}

/// Middleware requiring `Authorization: Bearer <key>` when keys are configured
pub async fn require_auth(
    State(keys): State<ApiKeys>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if !keys.is_enabled() {
        return Ok(next.run(request).await);
    }

    let auth_header = request
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok());

    match auth_header.and_then(|auth| auth.strip_prefix("Bearer ")) {
        Some(key) if keys.is_valid(key.trim()) => Ok(next.run(request).await),
        Some(_) => {
            tracing::warn!("Invalid API key attempted");
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            tracing::warn!("Missing or malformed Authorization header");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_validation() {
        let strong = "k".repeat(32);
        let keys = ApiKeys::new(&[strong.clone(), "short".to_string(), " ".to_string()]);

        assert!(keys.is_enabled());
        assert!(keys.is_valid(&strong));
        assert!(!keys.is_valid("short"));
        assert!(!keys.is_valid(""));
    }

    #[test]
    fn test_no_keys_disables_auth() {
        assert!(!ApiKeys::new(&[]).is_enabled());
        assert!(!ApiKeys::default().is_enabled());
    }
}
