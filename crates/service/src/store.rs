use std::sync::Arc;

use bytes::Bytes;
use tracing::warn;

use fraudsub_common::{Datastore, Header, Proof, ProofRegistry, ProofType, StoreError};

/// Store partition prefix for a proof type: `/fraud/<type>`.
pub(crate) fn make_key(proof_type: &ProofType) -> String {
    format!("/fraud/{proof_type}")
}

/// Content-addressed persistence for a single proof type.
///
/// Keys within the partition are the lowercase-hex header hash, kept
/// ASCII-safe regardless of the underlying datastore. The store is a
/// dumb map: it enforces no cross-record invariants.
pub(crate) struct ProofStore {
    prefix: String,
    ds: Arc<dyn Datastore>,
}

impl ProofStore {
    pub(crate) fn new(ds: Arc<dyn Datastore>, proof_type: &ProofType) -> Self {
        Self {
            prefix: make_key(proof_type),
            ds,
        }
    }

    fn key(&self, hash: &str) -> String {
        format!("{}/{hash}", self.prefix)
    }

    /// Idempotent write: re-writing identical bytes is a no-op success.
    pub(crate) async fn put(&self, hash: &str, data: Bytes) -> Result<(), StoreError> {
        self.ds.put(&self.key(hash), data).await
    }

    pub(crate) async fn get_by_hash(&self, hash: &str) -> Result<Bytes, StoreError> {
        self.ds.get(&self.key(hash)).await
    }

    /// Decode every record in the partition through the registry.
    ///
    /// An empty partition fails with [`StoreError::NotFound`]; callers
    /// rely on the distinction between "no records" and "no store yet".
    /// Records that fail to decode are skipped with a log so a single
    /// bad entry cannot hide the rest.
    pub(crate) async fn get_all<H: Header>(
        &self,
        proof_type: &ProofType,
        registry: &ProofRegistry<H>,
    ) -> Result<Vec<Arc<dyn Proof<H>>>, StoreError> {
        let entries = self.ds.query(&self.prefix).await?;
        if entries.is_empty() {
            return Err(StoreError::NotFound);
        }

        let mut proofs = Vec::with_capacity(entries.len());
        for (key, data) in entries {
            match registry.unmarshal(proof_type, &data) {
                Ok(proof) => proofs.push(proof),
                Err(err) => {
                    warn!(%key, %err, "skipping undecodable fraud proof record");
                }
            }
        }
        Ok(proofs)
    }
}
