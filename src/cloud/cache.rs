use crate::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheReadType {
    // Refresh once the entry has expired.
    Default,
    // Serve whatever is cached, however old.
    Unsafe,
    ForceRefresh,
}

struct CacheEntry<T> {
    data: Option<T>,
    created_at: Instant,
}

pub struct TimedCache<T> {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry<T>>>,
}

impl<T: Clone> TimedCache<T> {
    pub fn new(ttl: Duration) -> TimedCache<T> {
        TimedCache {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get<F, Fut>(&self, key: &str, read_type: CacheReadType, getter: F) -> Result<Option<T>>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        if let Some(data) = self.lookup(key, read_type) {
            return Ok(data);
        }

        let data = getter(key.to_owned()).await?;
        self.set(key, data.clone());
        Ok(data)
    }

    fn lookup(&self, key: &str, read_type: CacheReadType) -> Option<Option<T>> {
        if read_type == CacheReadType::ForceRefresh {
            return None;
        }

        let entries = self.entries.lock();
        let entry = entries.get(key)?;
        if read_type == CacheReadType::Unsafe || entry.created_at.elapsed() < self.ttl {
            return Some(entry.data.clone());
        }

        None
    }

    pub fn set(&self, key: &str, data: Option<T>) {
        self.entries.lock().insert(
            key.to_owned(),
            CacheEntry {
                data,
                created_at: Instant::now(),
            },
        );
    }

    pub fn delete(&self, key: &str) {
        self.entries.lock().remove(key);
    }
}
