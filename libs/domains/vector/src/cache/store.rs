use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::clock::{Clock, SystemClock};
use crate::error::VectorResult;

/// Remote key/value store backing the cache layer
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> VectorResult<Option<String>>;

    /// Store `value` with a store-side expiry of `ttl_secs`.
    async fn set_ex(&self, key: &str, value: String, ttl_secs: u64) -> VectorResult<()>;

    /// Keys matching a glob `pattern` (`*` wildcards only).
    async fn keys(&self, pattern: &str) -> VectorResult<Vec<String>>;

    /// Returns how many keys were removed.
    async fn delete(&self, keys: &[String]) -> VectorResult<usize>;
}

/// In-process store, the default when no Redis URL is configured.
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<String, (String, DateTime<Utc>)>>,
    clock: Arc<dyn Clock>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, (String, DateTime<Utc>)>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Live entries, expired ones are purged on the way.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.lock();
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> VectorResult<Option<String>> {
        let now = self.clock.now();
        let mut entries = self.lock();
        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > now => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: String, ttl_secs: u64) -> VectorResult<()> {
        let ttl = chrono::Duration::seconds(ttl_secs.min(i64::MAX as u64) as i64);
        let expires_at = self
            .clock
            .now()
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.lock().insert(key.to_string(), (value, expires_at));
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> VectorResult<Vec<String>> {
        let now = self.clock.now();
        let mut entries = self.lock();
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        Ok(entries
            .keys()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect())
    }

    async fn delete(&self, keys: &[String]) -> VectorResult<usize> {
        let mut entries = self.lock();
        Ok(keys.iter().filter(|k| entries.remove(*k).is_some()).count())
    }
}

/// Glob match supporting `*` only.
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let mut parts = pattern.split('*');
    let Some(first) = parts.next() else {
        return text.is_empty();
    };
    let Some(mut rest) = text.strip_prefix(first) else {
        return false;
    };

    let parts: Vec<&str> = parts.collect();
    let Some((last, middle)) = parts.split_last() else {
        return rest.is_empty();
    };

    for part in middle {
        match rest.find(part) {
            Some(pos) => rest = &rest[pos + part.len()..],
            None => return false,
        }
    }
    rest.len() >= last.len() && rest.ends_with(last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::ManualClock;
    use std::time::Duration;

    #[test]
    fn test_glob_match() {
        assert!(glob_match("vc:ab:docs:*", "vc:ab:docs:search:1"));
        assert!(!glob_match("vc:ab:docs:*", "vc:ab:docs2:search:1"));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("a*c*e", "abcde"));
        assert!(!glob_match("a*c*e", "abcd"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "exactly"));
    }

    #[tokio::test]
    async fn test_memory_store_expiry() {
        let clock = Arc::new(ManualClock::default());
        let store = MemoryCacheStore::with_clock(clock.clone());

        store.set_ex("k", "v".to_string(), 10).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        clock.advance(Duration::from_secs(11));
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_memory_store_keys_and_delete() {
        let store = MemoryCacheStore::new();
        for key in ["p:a:1", "p:a:2", "p:b:1"] {
            store.set_ex(key, "x".to_string(), 60).await.unwrap();
        }

        let mut keys = store.keys("p:a:*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["p:a:1", "p:a:2"]);

        assert_eq!(store.delete(&keys).await.unwrap(), 2);
        assert_eq!(store.len(), 1);
    }
}
