//! API key authorization
//!
//! Clients send `Authorization: ELK <apikey>`. Each key is configured with a
//! list of glob patterns naming the indices it may write to; a key that
//! exists but matches none of its patterns for the requested index is
//! forbidden rather than unauthorized.

use std::collections::HashMap;

use axum::http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("bad authorization header (must be in the form 'ELK <apikey>')")]
    BadHeader,
    #[error("apikey not found in configuration")]
    UnknownKey,
    #[error("index '{index}' is not allowed for this apikey")]
    Forbidden { index: String },
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadHeader | Self::UnknownKey => StatusCode::UNAUTHORIZED,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
        }
    }
}

/// Compiled API key table
pub struct ApiKeys {
    keys: HashMap<String, Vec<glob::Pattern>>,
}

impl ApiKeys {
    /// Compile the configured key table. Invalid patterns are rejected by
    /// config validation before this point and skipped here.
    pub fn new(config: &HashMap<String, Vec<String>>) -> Self {
        let keys = config
            .iter()
            .map(|(key, patterns)| {
                let compiled = patterns
                    .iter()
                    .filter_map(|p| glob::Pattern::new(p).ok())
                    .collect();
                (key.clone(), compiled)
            })
            .collect();
        Self { keys }
    }

    /// Authorize a raw `Authorization` header value against an index
    pub fn authorize(&self, header: &str, index: &str) -> Result<(), AuthError> {
        let parts: Vec<&str> = header.split(' ').collect();
        if parts.len() != 2 || parts[0] != "ELK" {
            return Err(AuthError::BadHeader);
        }
        let patterns = self.keys.get(parts[1]).ok_or(AuthError::UnknownKey)?;
        if patterns.iter().any(|p| p.matches(index)) {
            Ok(())
        } else {
            Err(AuthError::Forbidden {
                index: index.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> ApiKeys {
        let mut config = HashMap::new();
        config.insert(
            "devops-secret".to_string(),
            vec!["app-*".to_string(), "exact".to_string()],
        );
        ApiKeys::new(&config)
    }

    #[test]
    fn test_empty_header_unauthorized() {
        assert_eq!(keys().authorize("", "app-1"), Err(AuthError::BadHeader));
    }

    #[test]
    fn test_single_token_unauthorized() {
        assert_eq!(keys().authorize("devops-secret", "app-1"), Err(AuthError::BadHeader));
    }

    #[test]
    fn test_wrong_prefix_unauthorized() {
        assert_eq!(
            keys().authorize("Bearer devops-secret", "app-1"),
            Err(AuthError::BadHeader)
        );
    }

    #[test]
    fn test_unknown_key_unauthorized() {
        assert_eq!(keys().authorize("ELK nope", "app-1"), Err(AuthError::UnknownKey));
    }

    #[test]
    fn test_non_matching_index_forbidden() {
        let err = keys().authorize("ELK devops-secret", "web-1").unwrap_err();
        assert!(matches!(err, AuthError::Forbidden { .. }));
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_matching_glob_authorized() {
        assert!(keys().authorize("ELK devops-secret", "app-1").is_ok());
        assert!(keys().authorize("ELK devops-secret", "exact").is_ok());
    }
}
