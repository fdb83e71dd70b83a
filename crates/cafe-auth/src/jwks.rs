//! JWKS (JSON Web Key Set) fetching and caching
//!
//! [`KeyProviderCache`] owns the identity provider's signing keys:
//!
//! - **Snapshot reads**: the key set is an immutable snapshot behind an
//!   [`ArcSwap`]. Lookups never take a lock, and a refresh publishes a whole
//!   new set with one pointer swap, so readers see either the old or the new
//!   set and never a partial one.
//! - **Refresh on miss**: an unknown `kid` triggers one re-fetch (key
//!   rotation) before the lookup reports [`KeyLookupError::NotFound`].
//! - **TTL**: a known key in a stale snapshot is served at once while a
//!   background task refreshes the set. If that refresh fails the stale
//!   snapshot stays in place.
//! - **Single flight**: concurrent refreshes collapse into one fetch; waiters
//!   re-read the snapshot the winner published, or reuse its failure.
//! - **Rate limiting**: miss-triggered refreshes closer together than
//!   `min_refresh_interval` are skipped so a flood of random `kid`s cannot
//!   hammer the identity provider. A failed fetch is not retried within the
//!   same interval.

use arc_swap::ArcSwap;
use jsonwebtoken::DecodingKey;
use jsonwebtoken::jwk::JwkSet;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::{
    AuthSettings, DEFAULT_JWKS_TIMEOUT, DEFAULT_JWKS_TTL, DEFAULT_MIN_REFRESH_INTERVAL,
};
use crate::error::AuthConfigError;

/// Why a key lookup failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyLookupError {
    /// The key set (after the miss retry) has no key with this id.
    #[error("Key not found: {kid}")]
    NotFound {
        /// The key ID that was not found
        kid: String,
    },

    /// The key set could not be fetched or parsed.
    #[error("Key provider unavailable: {0}")]
    Unavailable(String),
}

/// Immutable key set snapshot
#[derive(Default)]
struct KeySet {
    keys: HashMap<String, Arc<DecodingKey>>,
    /// `None` until the first successful fetch
    fetched_at: Option<Instant>,
}

impl KeySet {
    fn get(&self, kid: &str) -> Option<Arc<DecodingKey>> {
        self.keys.get(kid).cloned()
    }

    fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.is_some_and(|at| at.elapsed() < ttl)
    }
}

/// Bookkeeping guarded by the refresh lock
#[derive(Default)]
struct RefreshState {
    /// Last refresh triggered by an unknown `kid`
    last_miss_refresh: Option<Instant>,
    /// Last failed fetch, cleared by a successful one
    last_failure: Option<(Instant, KeyLookupError)>,
}

impl RefreshState {
    /// A failure that happened after `since`, or within `backoff`
    fn recent_failure(&self, since: Instant, backoff: Duration) -> Option<KeyLookupError> {
        self.last_failure
            .as_ref()
            .filter(|(at, _)| *at >= since || at.elapsed() < backoff)
            .map(|(_, err)| err.clone())
    }
}

struct Inner {
    jwks_url: Url,
    http_client: reqwest::Client,
    ttl: Duration,
    min_refresh_interval: Duration,
    snapshot: ArcSwap<KeySet>,
    /// Held only while a fetch is in flight
    refresh: Arc<Mutex<RefreshState>>,
}

/// Cache of the identity provider's public signing keys.
///
/// Cloning is cheap; clones share the same snapshot.
///
/// # Example
///
/// ```rust,no_run
/// # use cafe_auth::jwks::KeyProviderCache;
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let url = url::Url::parse("https://trust.example/.well-known/jwks.json")?;
/// let cache = KeyProviderCache::builder(url).build()?;
///
/// let key = cache.get_key("key-id-123").await?;
/// # let _ = key;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct KeyProviderCache {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for KeyProviderCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.inner.snapshot.load();
        f.debug_struct("KeyProviderCache")
            .field("jwks_url", &self.inner.jwks_url.as_str())
            .field("ttl", &self.inner.ttl)
            .field("min_refresh_interval", &self.inner.min_refresh_interval)
            .field("cached_keys", &snapshot.keys.len())
            .finish()
    }
}

/// Builder for [`KeyProviderCache`]
#[derive(Debug, Clone)]
pub struct KeyProviderCacheBuilder {
    jwks_url: Url,
    ttl: Duration,
    timeout: Duration,
    min_refresh_interval: Duration,
}

impl KeyProviderCacheBuilder {
    /// Key set time-to-live (default: 10 minutes)
    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Bound on a single fetch (default: 5 seconds)
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Minimum spacing of miss-triggered refreshes (default: 5 seconds)
    #[must_use]
    pub fn min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    /// Build the cache. No network traffic happens until the first lookup or
    /// [`KeyProviderCache::refresh`].
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn build(self) -> Result<KeyProviderCache, AuthConfigError> {
        let http_client = reqwest::Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.timeout)
            .build()?;

        Ok(KeyProviderCache {
            inner: Arc::new(Inner {
                jwks_url: self.jwks_url,
                http_client,
                ttl: self.ttl,
                min_refresh_interval: self.min_refresh_interval,
                snapshot: ArcSwap::from_pointee(KeySet::default()),
                refresh: Arc::new(Mutex::new(RefreshState::default())),
            }),
        })
    }
}

impl KeyProviderCache {
    /// Start building a cache for the given JWKS endpoint
    pub fn builder(jwks_url: Url) -> KeyProviderCacheBuilder {
        KeyProviderCacheBuilder {
            jwks_url,
            ttl: DEFAULT_JWKS_TTL,
            timeout: DEFAULT_JWKS_TIMEOUT,
            min_refresh_interval: DEFAULT_MIN_REFRESH_INTERVAL,
        }
    }

    /// Build a cache from validated auth settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the JWKS URL is invalid or insecure, or the HTTP
    /// client cannot be constructed.
    pub fn from_settings(settings: &AuthSettings) -> Result<Self, AuthConfigError> {
        Self::builder(settings.jwks_url()?)
            .ttl(settings.jwks_ttl)
            .timeout(settings.jwks_timeout)
            .min_refresh_interval(settings.min_refresh_interval)
            .build()
    }

    /// Resolve a signing key by id.
    ///
    /// Known keys are served straight from the snapshot; a stale snapshot is
    /// refreshed in the background. A miss waits for (at most) one refresh.
    ///
    /// # Errors
    ///
    /// - [`KeyLookupError::NotFound`] if the key is absent after the refresh
    /// - [`KeyLookupError::Unavailable`] if the refresh failed
    pub async fn get_key(&self, kid: &str) -> Result<Arc<DecodingKey>, KeyLookupError> {
        let seen = self.inner.snapshot.load_full();

        if let Some(key) = seen.get(kid) {
            if seen.is_fresh(self.inner.ttl) {
                debug!(kid, "Signing key served from cache");
            } else {
                debug!(kid, "Signing key served from stale cache");
                self.spawn_refresh(&seen);
            }
            return Ok(key);
        }

        let current = self.refresh_after(&seen).await?;
        current.get(kid).ok_or_else(|| {
            warn!(kid, jwks_url = %self.inner.jwks_url, "Key ID not found in JWKS");
            KeyLookupError::NotFound {
                kid: kid.to_string(),
            }
        })
    }

    /// Fetch the key set now and publish it, ignoring TTL and rate limiting.
    ///
    /// Used to prime the cache at startup.
    ///
    /// # Errors
    ///
    /// Returns [`KeyLookupError::Unavailable`] if the fetch fails; the
    /// current snapshot is left untouched.
    pub async fn refresh(&self) -> Result<usize, KeyLookupError> {
        let mut state = self.inner.refresh.lock().await;
        let fresh = self.fetch_recorded(&mut state).await?;
        Ok(fresh.keys.len())
    }

    /// Key IDs in the current snapshot
    pub fn key_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.snapshot.load().keys.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// The JWKS endpoint this cache fetches from
    pub fn jwks_url(&self) -> &Url {
        &self.inner.jwks_url
    }

    /// Refresh `seen` in a detached task unless a refresh is already in
    /// flight or the last attempt failed too recently.
    fn spawn_refresh(&self, seen: &Arc<KeySet>) {
        let Ok(mut state) = Arc::clone(&self.inner.refresh).try_lock_owned() else {
            return;
        };
        if !Arc::ptr_eq(&*self.inner.snapshot.load(), seen) {
            return;
        }
        if let Some(err) = state.recent_failure(Instant::now(), self.inner.min_refresh_interval) {
            debug!(error = %err, "JWKS refresh backing off after failure");
            return;
        }

        let cache = self.clone();
        tokio::spawn(async move {
            // Failures are logged and recorded by the fetch itself
            let _ = cache.fetch_recorded(&mut state).await;
        });
    }

    /// Refresh after a miss unless another task already replaced `seen`, or
    /// the last miss refresh is too recent. Returns the snapshot to look the
    /// key up in.
    async fn refresh_after(&self, seen: &Arc<KeySet>) -> Result<Arc<KeySet>, KeyLookupError> {
        let requested_at = Instant::now();
        let mut state = self.inner.refresh.lock().await;

        let current = self.inner.snapshot.load_full();
        if !Arc::ptr_eq(&current, seen) {
            debug!("JWKS refreshed by a concurrent lookup");
            return Ok(current);
        }

        if let Some(err) = state.recent_failure(requested_at, self.inner.min_refresh_interval) {
            debug!(error = %err, "Reusing recent JWKS fetch failure");
            return Err(err);
        }

        let interval = self.inner.min_refresh_interval;
        if current.is_fresh(self.inner.ttl)
            && state
                .last_miss_refresh
                .is_some_and(|at| at.elapsed() < interval)
        {
            debug!(
                jwks_url = %self.inner.jwks_url,
                "JWKS refresh rate limited, using cache"
            );
            return Ok(current);
        }

        state.last_miss_refresh = Some(Instant::now());
        self.fetch_recorded(&mut state).await
    }

    /// Fetch and publish, recording the outcome. Caller holds the refresh
    /// guard.
    async fn fetch_recorded(
        &self,
        state: &mut RefreshState,
    ) -> Result<Arc<KeySet>, KeyLookupError> {
        let outcome = self.fetch_and_publish().await;
        state.last_failure = match &outcome {
            Ok(_) => None,
            Err(err) => Some((Instant::now(), err.clone())),
        };
        outcome
    }

    /// Fetch, parse and atomically swap in a new key set. Caller holds the
    /// refresh guard.
    async fn fetch_and_publish(&self) -> Result<Arc<KeySet>, KeyLookupError> {
        let jwks_url = &self.inner.jwks_url;
        info!(%jwks_url, "Fetching JWKS from endpoint");

        let response = self
            .inner
            .http_client
            .get(jwks_url.clone())
            .send()
            .await
            .map_err(|e| {
                error!(%jwks_url, error = %e, "Failed to fetch JWKS");
                KeyLookupError::Unavailable(format!("JWKS fetch failed: {e}"))
            })?;

        if !response.status().is_success() {
            error!(
                %jwks_url,
                status = %response.status(),
                "JWKS endpoint returned error status"
            );
            return Err(KeyLookupError::Unavailable(format!(
                "JWKS endpoint returned status {}",
                response.status()
            )));
        }

        let jwks: JwkSet = response.json().await.map_err(|e| {
            error!(%jwks_url, error = %e, "Failed to parse JWKS JSON");
            KeyLookupError::Unavailable(format!("Invalid JWKS format: {e}"))
        })?;

        let fresh = Arc::new(KeySet {
            keys: decoding_keys(&jwks),
            fetched_at: Some(Instant::now()),
        });
        self.inner.snapshot.store(Arc::clone(&fresh));

        info!(
            %jwks_url,
            key_count = fresh.keys.len(),
            "Successfully fetched JWKS"
        );
        Ok(fresh)
    }
}

/// Convert every usable JWK into a decoding key. Keys without a `kid` or with
/// unusable parameters are skipped.
fn decoding_keys(jwks: &JwkSet) -> HashMap<String, Arc<DecodingKey>> {
    jwks.keys
        .iter()
        .filter_map(|jwk| {
            let kid = jwk.common.key_id.clone()?;
            match DecodingKey::from_jwk(jwk) {
                Ok(key) => Some((kid, Arc::new(key))),
                Err(e) => {
                    warn!(kid = %kid, error = %e, "Skipping unusable JWK");
                    None
                }
            }
        })
        .collect()
}
