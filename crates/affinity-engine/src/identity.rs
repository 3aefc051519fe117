//! Credential resolution. The engine only ever sees the resolved user id.

use std::collections::HashMap;

/// Guest identity used when a request carries no token.
pub const ANONYMOUS_USER: &str = "anonymous";

pub trait IdentityProvider: Send + Sync {
    /// User id for a token, or `None` when the token is invalid.
    fn resolve(&self, token: &str) -> Option<String>;
}

/// Fixed token table, configured as `token=user_id` pairs separated by commas.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenProvider {
    tokens: HashMap<String, String>,
}

impl StaticTokenProvider {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }

    pub fn parse(pairs: &str) -> anyhow::Result<Self> {
        let mut tokens = HashMap::new();
        for pair in pairs.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (token, user_id) = pair
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("Invalid AUTH_TOKENS entry '{}': expected token=user_id", pair))?;
            let (token, user_id) = (token.trim(), user_id.trim());
            if token.is_empty() || user_id.is_empty() {
                anyhow::bail!("Invalid AUTH_TOKENS entry '{}': empty token or user id", pair);
            }
            tokens.insert(token.to_string(), user_id.to_string());
        }
        Ok(Self { tokens })
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl IdentityProvider for StaticTokenProvider {
    fn resolve(&self, token: &str) -> Option<String> {
        self.tokens.get(token).cloned()
    }
}
