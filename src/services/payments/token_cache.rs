use crate::errors::ServiceError;
use chrono::{DateTime, Duration, Utc};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Lifetime assumed when the provider omits `expires_in`
pub const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600;

/// Source of the current time, replaceable in tests
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A token as handed out by the credential exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantedToken {
    pub token: String,
    pub expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Caches one bearer token until `expires_in - refresh_margin` has elapsed.
///
/// Concurrent callers that all find the cache stale may each refresh; the last
/// write wins and readers only ever see a whole token.
pub struct TokenCache {
    clock: Arc<dyn Clock>,
    refresh_margin: Duration,
    slot: RwLock<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new(clock: Arc<dyn Clock>, refresh_margin_secs: u64) -> Self {
        Self {
            clock,
            refresh_margin: Duration::seconds(refresh_margin_secs as i64),
            slot: RwLock::new(None),
        }
    }

    /// Returns the cached token while it is fresh
    pub async fn current(&self) -> Option<String> {
        let now = self.clock.now();
        self.slot
            .read()
            .await
            .as_ref()
            .filter(|cached| now < cached.expires_at)
            .map(|cached| cached.token.clone())
    }

    /// Returns the cached token, or runs `grant` and caches its result
    pub async fn get_or_refresh<F, Fut>(&self, grant: F) -> Result<String, ServiceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<GrantedToken, ServiceError>>,
    {
        if let Some(token) = self.current().await {
            return Ok(token);
        }

        let granted = grant().await?;
        let lifetime = Duration::seconds(
            granted.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS) as i64,
        ) - self.refresh_margin;
        let expires_at = self.clock.now() + lifetime.max(Duration::zero());
        debug!(%expires_at, "Caching gateway token");

        *self.slot.write().await = Some(CachedToken {
            token: granted.token.clone(),
            expires_at,
        });
        Ok(granted.token)
    }

    pub async fn invalidate(&self) {
        *self.slot.write().await = None;
    }
}
