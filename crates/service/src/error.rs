use thiserror::Error;

use fraudsub_common::{BoxError, ProofError, ProofType, StoreError, TransportError};

/// The types of error that can be emitted by the proof service.
#[derive(Debug, Error)]
pub enum Error {
    /// A verifier or subscription was requested for a proof type the
    /// registry does not list.
    #[error("fraud: topic for {0} does not exist")]
    UnknownProofType(ProofType),

    /// A verifier is already registered for the proof type. Verifiers
    /// are single-shot for the lifetime of the service.
    #[error("fraud: verifier for {0} proof type already exists")]
    DuplicateVerifier(ProofType),

    /// A locally published proof was rejected by the validation
    /// pipeline. Never returned from `broadcast` itself; surfaces in
    /// logs and through the absence of delivery.
    #[error("fraud: proof was rejected by the validation pipeline")]
    ValidationFailed,

    /// The topic backing a subscription was closed.
    #[error("fraud: subscription is closed")]
    SubscriptionClosed,

    #[error("fraud: failed to marshal proof: {0}")]
    Marshal(BoxError),

    /// Topics that failed to close during shutdown.
    #[error("fraud: {} topic(s) failed to close during shutdown", .0.len())]
    Shutdown(Vec<TransportError>),

    #[error(transparent)]
    Proof(#[from] ProofError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
