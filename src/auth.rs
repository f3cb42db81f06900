//! Caller identity.

use crate::error::FlowError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    #[serde(default)]
    pub email: String,
}

/// Resolves a bearer token to an identity.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, token: &str) -> Result<Identity, FlowError>;
}

/// One configured token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenEntry {
    pub token: String,
    pub user_id: String,
    #[serde(default)]
    pub email: String,
}

/// Static bearer tokens, usually loaded from the config file.
#[derive(Debug, Clone, Default)]
pub struct TokenTable {
    tokens: HashMap<String, Identity>,
}

impl TokenTable {
    pub fn new(entries: &[TokenEntry]) -> Self {
        let tokens = entries
            .iter()
            .filter(|e| !e.token.is_empty() && !e.user_id.is_empty())
            .map(|e| {
                (
                    e.token.clone(),
                    Identity {
                        user_id: e.user_id.clone(),
                        email: e.email.clone(),
                    },
                )
            })
            .collect();
        Self { tokens }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl Authenticator for TokenTable {
    fn authenticate(&self, token: &str) -> Result<Identity, FlowError> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or_else(|| FlowError::Unauthenticated("unknown token".to_string()))
    }
}

/// Extract the token from an `Authorization` header value.
pub fn bearer_token(header: Option<&str>) -> Result<&str, FlowError> {
    let header = header.ok_or_else(|| FlowError::Unauthenticated("missing authorization header".to_string()))?;

    let token = header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .map(str::trim)
        .ok_or_else(|| FlowError::Unauthenticated("expected a bearer token".to_string()))?;

    if token.is_empty() {
        return Err(FlowError::Unauthenticated("empty bearer token".to_string()));
    }
    Ok(token)
}
