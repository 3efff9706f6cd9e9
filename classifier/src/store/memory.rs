use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use super::ResultCache;
use crate::error::CacheError;

/// In-process cache, used when no cache server is configured and in tests.
///
/// Expired entries are dropped on every write, so the map never holds more
/// than the keys written within the last TTL.
#[derive(Clone, Default)]
pub struct MemCache {
    entries: Arc<Mutex<HashMap<String, (String, Instant)>>>,
}

impl MemCache {
    fn entries(&self) -> Result<MutexGuard<'_, HashMap<String, (String, Instant)>>, CacheError> {
        self.entries
            .lock()
            .map_err(|_| CacheError::Unavailable("cache lock poisoned".into()))
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries()
            .map(|entries| {
                let now = Instant::now();
                entries.values().filter(|(_, expiry)| *expiry > now).count()
            })
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry.
    pub fn clear(&self) -> Result<(), CacheError> {
        self.entries()?.clear();
        Ok(())
    }
}

impl ResultCache for MemCache {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, CacheError>> + Send {
        async move {
            let mut entries = self.entries()?;
            match entries.get(key) {
                Some((value, expiry)) if *expiry > Instant::now() => Ok(Some(value.clone())),
                Some(_) => {
                    entries.remove(key);
                    Ok(None)
                }
                None => Ok(None),
            }
        }
    }

    fn set(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), CacheError>> + Send {
        async move {
            let now = Instant::now();
            let mut entries = self.entries()?;
            entries.retain(|_, (_, expiry)| *expiry > now);
            entries.insert(key.to_string(), (value, now + ttl));
            Ok(())
        }
    }

    fn delete(&self, key: &str) -> impl Future<Output = Result<(), CacheError>> + Send {
        async move {
            self.entries()?.remove(key);
            Ok(())
        }
    }
}
