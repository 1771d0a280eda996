//! Narrow authentication seam.
//!
//! Token minting and validation belong to the outer HTTP layer; the bridge
//! only needs "this token belongs to that user". Deployments inject their
//! JWT-backed implementation at wiring time.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::AppError;

pub trait Authenticator: Send + Sync {
    /// Resolve a session token to a user id.
    fn authenticate(&self, token: &str) -> Result<i64, AppError>;
}

/// Token table for tests and local development.
#[derive(Default)]
pub struct StaticTokenAuthenticator {
    tokens: RwLock<HashMap<String, i64>>,
}

impl StaticTokenAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, token: &str, user_id: i64) {
        self.tokens.write().insert(token.to_string(), user_id);
    }
}

impl Authenticator for StaticTokenAuthenticator {
    fn authenticate(&self, token: &str) -> Result<i64, AppError> {
        self.tokens
            .read()
            .get(token)
            .copied()
            .ok_or(AppError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_token_is_unauthorized() {
        let auth = StaticTokenAuthenticator::new();
        auth.insert("tok-1", 42);
        assert_eq!(auth.authenticate("tok-1").unwrap(), 42);
        assert!(matches!(
            auth.authenticate("nope"),
            Err(AppError::Unauthorized)
        ));
    }
}
