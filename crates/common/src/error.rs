use thiserror::Error;

use crate::proof::ProofType;
use crate::{BoxError, PeerId};

/// Errors produced while decoding proofs through the registry.
#[derive(Debug, Error)]
pub enum ProofError {
    /// The decode failed because no unmarshaler is registered for the
    /// type. Distinguished from [`ProofError::Decode`] because unknown
    /// types are a forward-compatibility condition, not misbehavior:
    /// the sender is not blacklisted for them.
    #[error("fraud: unmarshaler for {0} proof type is not registered")]
    NoUnmarshaler(ProofType),

    /// The registered unmarshaler rejected the bytes.
    #[error("fraud: failed to decode {proof_type} proof: {source}")]
    Decode {
        proof_type: ProofType,
        source: BoxError,
    },
}

/// Failures of the underlying broadcast transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport: topic {0} already joined")]
    TopicExists(String),

    #[error("transport: topic {0} is closed")]
    TopicClosed(String),

    #[error("transport: stream handler for {0} already registered")]
    HandlerExists(String),

    #[error("transport: peer {0} does not handle protocol {1}")]
    UnsupportedProtocol(PeerId, String),

    #[error("transport: peer {0} is not connected")]
    NotConnected(PeerId),

    #[error("transport: {0}")]
    Other(BoxError),
}

/// Datastore failures. `NotFound` is distinguished; everything else is
/// opaque to the service.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("datastore: key not found")]
    NotFound,

    #[error("datastore: {0}")]
    Other(BoxError),
}
