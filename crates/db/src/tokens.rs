//! Device-token lookup for single-user sends and pruning of dead tokens.

use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::queries;
use crate::retry::with_retry;

#[async_trait]
pub trait TokenRegistry: Send + Sync {
    async fn resolve_user_tokens(&self, user_id: &str) -> Result<Vec<String>, StoreError>;

    /// Drop tokens the provider reported as permanently invalid.
    async fn prune_tokens(&self, tokens: &[String]) -> Result<u64, StoreError>;
}

#[derive(Clone)]
pub struct PgTokenRegistry {
    pool: PgPool,
}

impl PgTokenRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenRegistry for PgTokenRegistry {
    async fn resolve_user_tokens(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        with_retry("tokens.resolve", || async {
            let rows = queries::device_tokens::list_active_for_user(&self.pool, user_id).await?;
            Ok::<_, StoreError>(rows.into_iter().map(|row| row.token).collect())
        })
        .await
    }

    async fn prune_tokens(&self, tokens: &[String]) -> Result<u64, StoreError> {
        if tokens.is_empty() {
            return Ok(0);
        }
        with_retry("tokens.prune", || async {
            let pruned = queries::device_tokens::invalidate(&self.pool, tokens).await?;
            Ok::<_, StoreError>(pruned)
        })
        .await
    }
}

#[derive(Default)]
pub struct MemoryTokenRegistry {
    tokens: RwLock<HashMap<String, Vec<String>>>,
}

impl MemoryTokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, user_id: &str, token: &str) {
        let mut tokens = self.tokens.write().await;
        let user_tokens = tokens.entry(user_id.to_string()).or_default();
        if !user_tokens.iter().any(|t| t == token) {
            user_tokens.push(token.to_string());
        }
    }
}

#[async_trait]
impl TokenRegistry for MemoryTokenRegistry {
    async fn resolve_user_tokens(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .tokens
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn prune_tokens(&self, tokens: &[String]) -> Result<u64, StoreError> {
        let mut registry = self.tokens.write().await;
        let mut pruned = 0;
        for user_tokens in registry.values_mut() {
            let before = user_tokens.len();
            user_tokens.retain(|t| !tokens.contains(t));
            pruned += (before - user_tokens.len()) as u64;
        }
        Ok(pruned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_resolve() {
        let registry = MemoryTokenRegistry::new();
        registry.register("user_1", "tok_a").await;
        registry.register("user_1", "tok_b").await;
        registry.register("user_1", "tok_a").await;

        let tokens = registry.resolve_user_tokens("user_1").await.unwrap();
        assert_eq!(tokens, vec!["tok_a".to_string(), "tok_b".to_string()]);
        assert!(registry.resolve_user_tokens("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_prune_removes_tokens_across_users() {
        let registry = MemoryTokenRegistry::new();
        registry.register("user_1", "tok_a").await;
        registry.register("user_2", "tok_b").await;
        registry.register("user_2", "tok_c").await;

        let pruned = registry
            .prune_tokens(&["tok_a".to_string(), "tok_c".to_string()])
            .await
            .unwrap();
        assert_eq!(pruned, 2);
        assert!(registry.resolve_user_tokens("user_1").await.unwrap().is_empty());
        assert_eq!(
            registry.resolve_user_tokens("user_2").await.unwrap(),
            vec!["tok_b".to_string()]
        );
    }
}
