use core::fmt;

use bytes::Bytes;

use crate::header::Header;
use crate::BoxError;

/// A unique proof type string, e.g. `"BadEncoding"`.
///
/// Equality is case-sensitive and defines topic identity: every proof
/// type maps to exactly one broadcast topic and one store partition.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProofType(String);

impl ProofType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProofType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProofType {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for ProofType {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The capability set shared by all fraud proofs in the network.
///
/// Decoding lives in the [`ProofRegistry`](crate::ProofRegistry): a proof
/// value is only ever constructed by the unmarshal function registered
/// for its type.
///
/// Implementors must encode deterministically: re-marshalling an
/// unmarshalled proof has to yield the exact input bytes, because the
/// store deduplicates on raw bytes rather than structural equality.
pub trait Proof<H: Header>: Send + Sync {
    /// The exact type of this fraud proof.
    fn proof_type(&self) -> ProofType;

    /// Hash of the block header the proof accuses. Doubles as the
    /// content address of the proof within its type's store partition.
    fn header_hash(&self) -> Bytes;

    /// Block height the proof refers to.
    fn height(&self) -> u64;

    /// Check the validity of the fraud proof against the authoritative
    /// header at [`height`](Proof::height). Must be a pure function of
    /// the proof and the header.
    fn validate(&self, header: &H) -> Result<(), BoxError>;

    /// Canonical binary encoding of the proof.
    fn marshal_binary(&self) -> Result<Vec<u8>, BoxError>;
}
