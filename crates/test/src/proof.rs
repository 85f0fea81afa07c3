use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use fraudsub_common::{BoxError, Proof, ProofRegistry, ProofType};

use crate::header::DummyHeader;

pub fn dummy_proof_type() -> ProofType {
    ProofType::new("DummyProof")
}

/// A fraud proof whose validity is decided by its fields, encoded as
/// JSON so malformed bytes are easy to fabricate in tests.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DummyProof {
    pub valid: bool,
    pub panics: bool,
    pub height: u64,
    pub hash: Vec<u8>,
}

impl DummyProof {
    pub fn valid() -> Self {
        Self {
            valid: true,
            panics: false,
            height: 1,
            hash: b"hash".to_vec(),
        }
    }

    pub fn invalid() -> Self {
        Self {
            valid: false,
            ..Self::valid()
        }
    }

    pub fn panicking() -> Self {
        Self {
            panics: true,
            ..Self::valid()
        }
    }

    /// A valid proof at the given height, with a height-derived hash so
    /// proofs at different heights are distinct records.
    pub fn valid_at(height: u64) -> Self {
        Self {
            height,
            hash: format!("hash-{height}").into_bytes(),
            ..Self::valid()
        }
    }
}

impl Proof<DummyHeader> for DummyProof {
    fn proof_type(&self) -> ProofType {
        dummy_proof_type()
    }

    fn header_hash(&self) -> Bytes {
        Bytes::from(self.hash.clone())
    }

    fn height(&self) -> u64 {
        self.height
    }

    fn validate(&self, _header: &DummyHeader) -> Result<(), BoxError> {
        if self.panics {
            panic!("DummyProof: validation panicked");
        }
        if !self.valid {
            return Err("DummyProof: proof is not valid".into());
        }
        Ok(())
    }

    fn marshal_binary(&self) -> Result<Vec<u8>, BoxError> {
        Ok(serde_json::to_vec(self)?)
    }
}

fn unmarshal_dummy(data: &[u8]) -> Result<Arc<dyn Proof<DummyHeader>>, BoxError> {
    let proof: DummyProof = serde_json::from_slice(data)?;
    Ok(Arc::new(proof))
}

/// A registry with the [`DummyProof`] codec registered.
pub fn dummy_registry() -> ProofRegistry<DummyHeader> {
    let mut registry = ProofRegistry::new();
    registry.register(dummy_proof_type(), Arc::new(unmarshal_dummy));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    use fraudsub_common::ProofError;

    #[test]
    fn registry_round_trip() {
        let proof = DummyProof::valid_at(42);
        let bin = proof.marshal_binary().unwrap();

        let registry = dummy_registry();
        let decoded = registry.unmarshal(&dummy_proof_type(), &bin).unwrap();

        assert_eq!(decoded.height(), proof.height);
        assert_eq!(decoded.header_hash(), proof.header_hash());
        // Re-encoding an unmarshalled proof yields identical bytes.
        assert_eq!(decoded.marshal_binary().unwrap(), bin);
    }

    #[test]
    fn registry_list_is_tightly_packed() {
        let registry = dummy_registry();
        assert_eq!(registry.list(), vec![dummy_proof_type()]);
    }

    #[test]
    fn unknown_type_has_no_unmarshaler() {
        let registry = dummy_registry();
        let result = registry.unmarshal(&ProofType::new("NotRegistered"), b"{}");
        assert!(matches!(result, Err(ProofError::NoUnmarshaler(_))));
    }

    #[test]
    fn malformed_bytes_fail_to_decode() {
        let registry = dummy_registry();
        let result = registry.unmarshal(&dummy_proof_type(), b"not json");
        assert!(matches!(result, Err(ProofError::Decode { .. })));
    }
}
