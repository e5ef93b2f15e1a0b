//! CSRF token issue and validation.
//!
//! Each browser gets an opaque CSRF session key (the `csrf_session` cookie);
//! at most one token is held per key at a time.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use super::{constant_time_eq, random_token};
use crate::auth::AuthResult;

/// Default CSRF token lifetime (24 hours)
pub const CSRF_TTL: Duration = Duration::hours(24);

/// A stored CSRF value and when it stops being accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfToken {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl CsrfToken {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Backing storage for CSRF tokens, keyed by CSRF session key
#[async_trait]
pub trait CsrfStore: Send + Sync {
    async fn get(&self, key: &str) -> AuthResult<Option<CsrfToken>>;

    async fn put(&self, key: &str, token: CsrfToken) -> AuthResult<()>;

    async fn remove(&self, key: &str) -> AuthResult<()>;

    /// Drop every token expired at `now`, returning how many were removed
    async fn remove_expired(&self, now: DateTime<Utc>) -> AuthResult<u64>;
}

/// In-process CSRF token store
#[derive(Clone, Default)]
pub struct MemoryCsrfStore {
    tokens: Arc<RwLock<HashMap<String, CsrfToken>>>,
}

impl MemoryCsrfStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CsrfStore for MemoryCsrfStore {
    async fn get(&self, key: &str) -> AuthResult<Option<CsrfToken>> {
        Ok(self.tokens.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, token: CsrfToken) -> AuthResult<()> {
        self.tokens.write().await.insert(key.to_string(), token);
        Ok(())
    }

    async fn remove(&self, key: &str) -> AuthResult<()> {
        self.tokens.write().await.remove(key);
        Ok(())
    }

    async fn remove_expired(&self, now: DateTime<Utc>) -> AuthResult<u64> {
        let mut tokens = self.tokens.write().await;
        let before = tokens.len();
        tokens.retain(|_, t| !t.is_expired_at(now));
        Ok((before - tokens.len()) as u64)
    }
}

/// CSRF token issuer/validator
#[derive(Clone)]
pub struct CsrfProtection {
    store: Arc<dyn CsrfStore>,
    ttl: Duration,
}

impl CsrfProtection {
    pub fn new(store: Arc<dyn CsrfStore>) -> Self {
        Self::with_ttl(store, CSRF_TTL)
    }

    pub fn with_ttl(store: Arc<dyn CsrfStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Return the current token for `key`, minting a fresh one if none is
    /// stored or the stored one has expired.
    pub async fn generate(&self, key: &str) -> AuthResult<String> {
        let now = Utc::now();
        match self.store.get(key).await? {
            Some(existing) if !existing.is_expired_at(now) => return Ok(existing.value),
            _ => {}
        }

        let token = CsrfToken {
            value: random_token(32),
            expires_at: now + self.ttl,
        };
        let value = token.value.clone();
        self.store.put(key, token).await?;
        Ok(value)
    }

    /// Check a submitted token against the one stored for `key`.
    ///
    /// An expired token is removed and never accepted.
    pub async fn validate(&self, key: &str, submitted: &str) -> AuthResult<bool> {
        let Some(stored) = self.store.get(key).await? else {
            return Ok(false);
        };

        if stored.is_expired_at(Utc::now()) {
            self.store.remove(key).await?;
            return Ok(false);
        }

        if submitted.is_empty() {
            return Ok(false);
        }

        Ok(constant_time_eq(&stored.value, submitted))
    }

    /// Forget the token for `key`
    pub async fn revoke(&self, key: &str) -> AuthResult<()> {
        self.store.remove(key).await
    }

    /// Remove every expired token
    pub async fn purge_expired(&self) -> AuthResult<u64> {
        let removed = self.store.remove_expired(Utc::now()).await?;
        if removed > 0 {
            log::debug!("Purged {removed} expired CSRF tokens");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn protection() -> CsrfProtection {
        CsrfProtection::new(Arc::new(MemoryCsrfStore::new()))
    }

    #[tokio::test]
    async fn test_generate_is_stable_until_expiry() {
        let csrf = protection();
        let first = csrf.generate("browser-a").await.unwrap();
        let second = csrf.generate("browser-a").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 43);

        let other = csrf.generate("browser-b").await.unwrap();
        assert_ne!(first, other);
    }

    #[tokio::test]
    async fn test_validate() {
        let csrf = protection();
        let token = csrf.generate("k").await.unwrap();

        assert!(csrf.validate("k", &token).await.unwrap());
        assert!(!csrf.validate("k", "wrong").await.unwrap());
        assert!(!csrf.validate("k", "").await.unwrap());
        assert!(!csrf.validate("unknown", &token).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_token_is_removed() {
        let store = Arc::new(MemoryCsrfStore::new());
        let csrf = CsrfProtection::with_ttl(store.clone(), Duration::seconds(-1));
        let token = csrf.generate("k").await.unwrap();

        assert!(!csrf.validate("k", &token).await.unwrap());
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_token_is_replaced() {
        let store = Arc::new(MemoryCsrfStore::new());
        store
            .put(
                "k",
                CsrfToken {
                    value: "stale".to_string(),
                    expires_at: Utc::now() - Duration::minutes(1),
                },
            )
            .await
            .unwrap();

        let csrf = CsrfProtection::new(store);
        let fresh = csrf.generate("k").await.unwrap();
        assert_ne!(fresh, "stale");
        assert!(csrf.validate("k", &fresh).await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = Arc::new(MemoryCsrfStore::new());
        let short = CsrfProtection::with_ttl(store.clone(), Duration::seconds(-1));
        let long = CsrfProtection::new(store.clone());

        short.generate("old").await.unwrap();
        long.generate("new").await.unwrap();

        assert_eq!(long.purge_expired().await.unwrap(), 1);
        assert!(store.get("old").await.unwrap().is_none());
        assert!(store.get("new").await.unwrap().is_some());
    }
}
