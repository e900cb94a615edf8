//! Query cache keyed by logical query identity
//!
//! Invalidation never drops values; it only marks matching entries stale so
//! a failed refetch can still serve the previous result (stale-while-revalidate).
//! Marking is idempotent, so two flows invalidating the same key is harmless.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

use crate::error::ChainResult;

// ============================================
// QUERY KEY
// ============================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// True when `prefix` matches the leading segments of this key
    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.0.starts_with(&prefix.0)
    }

    pub fn pairs() -> Self {
        Self::new(["pairs"])
    }

    pub fn vests(account: impl fmt::Display) -> Self {
        Self::new(["vests".to_string(), "allNfts".to_string(), account.to_string()])
    }

    pub fn rewards(account: impl fmt::Display) -> Self {
        Self::new(["vests".to_string(), "rewards".to_string(), account.to_string()])
    }

    pub fn balances(account: impl fmt::Display) -> Self {
        Self::new(["balances".to_string(), account.to_string()])
    }

    /// Parent of every account's enriched pair list
    pub fn enriched_pairs_root() -> Self {
        Self::new(["pairs", "enriched"])
    }

    pub fn enriched_pairs(account: impl fmt::Display) -> Self {
        Self::new(["pairs".to_string(), "enriched".to_string(), account.to_string()])
    }

    pub fn circulating_supply() -> Self {
        Self::new(["circulatingSupply"])
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}

// ============================================
// CACHE
// ============================================

struct Entry {
    value: Arc<dyn Any + Send + Sync>,
    stale: bool,
}

#[derive(Default)]
pub struct QueryCache {
    entries: RwLock<HashMap<QueryKey, Entry>>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached value of type `T`, fresh or stale
    pub fn get<T: Any + Send + Sync>(&self, key: &QueryKey) -> Option<Arc<T>> {
        let entries = self.entries.read().ok()?;
        let entry = entries.get(key)?;
        entry.value.clone().downcast::<T>().ok()
    }

    pub fn insert<T: Any + Send + Sync>(&self, key: QueryKey, value: T) -> Arc<T> {
        let value = Arc::new(value);
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(
                key,
                Entry {
                    value: value.clone(),
                    stale: false,
                },
            );
        }
        value
    }

    /// `None` when the key is absent
    pub fn is_stale(&self, key: &QueryKey) -> Option<bool> {
        let entries = self.entries.read().ok()?;
        entries.get(key).map(|entry| entry.stale)
    }

    /// Mark every entry under `prefix` stale; returns how many matched
    pub fn invalidate(&self, prefix: &QueryKey) -> usize {
        let Ok(mut entries) = self.entries.write() else {
            return 0;
        };
        let mut matched = 0;
        for (key, entry) in entries.iter_mut() {
            if key.starts_with(prefix) {
                entry.stale = true;
                matched += 1;
            }
        }
        debug!("Invalidated {} cached queries under {}", matched, prefix);
        matched
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serve a fresh entry, otherwise refetch.
    ///
    /// A retryable fetch failure falls back to the stale value when one
    /// exists; any other failure surfaces.
    pub async fn get_or_fetch<T, F, Fut>(&self, key: QueryKey, fetch: F) -> ChainResult<Arc<T>>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = ChainResult<T>>,
    {
        if self.is_stale(&key) == Some(false) {
            if let Some(value) = self.get::<T>(&key) {
                return Ok(value);
            }
        }

        match fetch().await {
            Ok(value) => Ok(self.insert(key, value)),
            Err(err) if err.is_retryable() => match self.get::<T>(&key) {
                Some(stale) => {
                    warn!("Refetch of {} failed ({}), serving stale data", key, err);
                    Ok(stale)
                }
                None => Err(err),
            },
            Err(err) => Err(err),
        }
    }
}
