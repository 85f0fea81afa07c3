use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StoreError;

/// Key/value persistence supplied by the embedder.
///
/// The service writes proof records under `/fraud/<type>/<hex hash>`
/// keys and never closes the datastore; its lifecycle belongs to the
/// embedder.
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Fetch the value stored under `key`, or [`StoreError::NotFound`].
    async fn get(&self, key: &str) -> Result<Bytes, StoreError>;

    /// Store `value` under `key`, overwriting any previous value.
    async fn put(&self, key: &str, value: Bytes) -> Result<(), StoreError>;

    /// Enumerate all entries whose key starts with `prefix`.
    async fn query(&self, prefix: &str) -> Result<Vec<(String, Bytes)>, StoreError>;
}
