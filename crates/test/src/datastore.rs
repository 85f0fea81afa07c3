use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use fraudsub_common::{Datastore, StoreError};

/// An in-memory datastore backed by an ordered map.
#[derive(Default)]
pub struct MapDatastore {
    entries: Mutex<BTreeMap<String, Bytes>>,
    fail_puts: AtomicBool,
}

impl MapDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `put` fail, for exercising persistence
    /// failure paths.
    pub fn set_fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Datastore for MapDatastore {
    async fn get(&self, key: &str) -> Result<Bytes, StoreError> {
        self.entries
            .lock()
            .get(key)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<(), StoreError> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StoreError::Other("datastore writes disabled".into()));
        }
        self.entries.lock().insert(key.to_owned(), value);
        Ok(())
    }

    async fn query(&self, prefix: &str) -> Result<Vec<(String, Bytes)>, StoreError> {
        Ok(self
            .entries
            .lock()
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }
}
