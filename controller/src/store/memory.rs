use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::{StateStore, StoreError};

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    List(VecDeque<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |exp| now < exp)
    }
}

/// In-process store honouring TTLs on the tokio clock.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: Arc<RwLock<HashMap<String, Entry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn text(entry: Option<&Entry>, now: Instant) -> Option<String> {
        match entry {
            Some(Entry {
                value: Value::Text(text),
                expires_at,
            }) if expires_at.map_or(true, |exp| now < exp) => Some(text.clone()),
            _ => None,
        }
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let data = self.data.read().await;
        Ok(Self::text(data.get(key), Instant::now()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut data = self.data.write().await;
        data.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut data = self.data.write().await;
        let now = Instant::now();
        if data.get(key).is_some_and(|entry| entry.live(now)) {
            return Ok(false);
        }
        data.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn refresh_if_held(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> Result<Option<String>, StoreError> {
        let mut data = self.data.write().await;
        let now = Instant::now();
        let current = Self::text(data.get(key), now);
        if current.as_deref() == Some(expected) {
            if let Some(entry) = data.get_mut(key) {
                entry.expires_at = Some(now + ttl);
            }
        }
        Ok(current)
    }

    async fn delete_if_held(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let mut data = self.data.write().await;
        if Self::text(data.get(key), Instant::now()).as_deref() == Some(expected) {
            data.remove(key);
            return Ok(true);
        }
        Ok(false)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut data = self.data.write().await;
        let now = Instant::now();
        Ok(data.remove(key).is_some_and(|entry| entry.live(now)))
    }

    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let mut data = self.data.write().await;
        let now = Instant::now();
        let count = Self::text(data.get(key), now)
            .and_then(|raw| raw.parse::<u64>().ok())
            .unwrap_or(0)
            + 1;
        data.insert(
            key.to_string(),
            Entry {
                value: Value::Text(count.to_string()),
                expires_at: Some(now + ttl),
            },
        );
        Ok(count)
    }

    async fn push_capped(&self, key: &str, value: &str, cap: usize) -> Result<(), StoreError> {
        let mut data = self.data.write().await;
        let entry = data.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::List(VecDeque::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::List(list) => {
                list.push_front(value.to_string());
                list.truncate(cap);
                Ok(())
            }
            Value::Text(_) => Err(StoreError::Backend(format!(
                "{key} holds a value, not a list"
            ))),
        }
    }

    async fn list(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let data = self.data.read().await;
        match data.get(key) {
            Some(Entry {
                value: Value::List(list),
                ..
            }) => Ok(list.iter().cloned().collect()),
            Some(_) => Err(StoreError::Backend(format!(
                "{key} holds a value, not a list"
            ))),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn values_expire_with_their_ttl() {
        let store = MemoryStore::new();
        store
            .set("reading.pipe.TflowOut", "48.5", Some(Duration::from_secs(300)))
            .await
            .unwrap();
        assert_eq!(
            store.get("reading.pipe.TflowOut").await.unwrap().as_deref(),
            Some("48.5")
        );

        tokio::time::advance(Duration::from_secs(301)).await;
        assert_eq!(store.get("reading.pipe.TflowOut").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn set_if_absent_respects_live_keys_only() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);
        assert!(store.set_if_absent("lease.token", "a", ttl).await.unwrap());
        assert!(!store.set_if_absent("lease.token", "b", ttl).await.unwrap());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(store.set_if_absent("lease.token", "b", ttl).await.unwrap());
        assert_eq!(store.get("lease.token").await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn conditional_operations_check_the_holder() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);
        store.set("lease.token", "mine", Some(ttl)).await.unwrap();

        assert_eq!(
            store.refresh_if_held("lease.token", "theirs", ttl).await.unwrap().as_deref(),
            Some("mine")
        );
        assert!(!store.delete_if_held("lease.token", "theirs").await.unwrap());
        assert!(store.delete_if_held("lease.token", "mine").await.unwrap());
        assert_eq!(
            store.refresh_if_held("lease.token", "mine", ttl).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn capped_list_keeps_newest_first() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store
                .push_capped("history.flowOut", &i.to_string(), 3)
                .await
                .unwrap();
        }
        assert_eq!(
            store.list("history.flowOut").await.unwrap(),
            vec!["4", "3", "2"]
        );
        assert!(store.list("history.missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn counters_increment() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(3600);
        assert_eq!(store.increment("alert.streak.x", ttl).await.unwrap(), 1);
        assert_eq!(store.increment("alert.streak.x", ttl).await.unwrap(), 2);
    }
}
