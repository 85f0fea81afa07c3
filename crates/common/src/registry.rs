use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ProofError;
use crate::header::Header;
use crate::proof::{Proof, ProofType};
use crate::BoxError;

/// Decodes bytes into a proof of a single type.
pub type UnmarshalFn<H> =
    Arc<dyn Fn(&[u8]) -> Result<Arc<dyn Proof<H>>, BoxError> + Send + Sync>;

/// A mapping of all registered proof types to their unmarshal functions.
///
/// The registry fixes the set of proof types the service handles:
/// topics are joined for exactly the types listed here.
pub struct ProofRegistry<H: Header> {
    unmarshalers: HashMap<ProofType, UnmarshalFn<H>>,
}

impl<H: Header> ProofRegistry<H> {
    pub fn new() -> Self {
        Self {
            unmarshalers: HashMap::new(),
        }
    }

    /// Register an unmarshal function for a proof type, replacing any
    /// previous registration for the same type.
    pub fn register(&mut self, proof_type: ProofType, unmarshal: UnmarshalFn<H>) {
        self.unmarshalers.insert(proof_type, unmarshal);
    }

    /// All supported proof types.
    pub fn list(&self) -> Vec<ProofType> {
        self.unmarshalers.keys().cloned().collect()
    }

    pub fn is_registered(&self, proof_type: &ProofType) -> bool {
        self.unmarshalers.contains_key(proof_type)
    }

    /// Decode bytes into a proof of the given type.
    pub fn unmarshal(
        &self,
        proof_type: &ProofType,
        data: &[u8],
    ) -> Result<Arc<dyn Proof<H>>, ProofError> {
        let unmarshal = self
            .unmarshalers
            .get(proof_type)
            .ok_or_else(|| ProofError::NoUnmarshaler(proof_type.clone()))?;

        unmarshal(data).map_err(|source| ProofError::Decode {
            proof_type: proof_type.clone(),
            source,
        })
    }
}

impl<H: Header> Default for ProofRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}
