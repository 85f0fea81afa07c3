//! Core types and interfaces for the fraudsub fraud-proof dissemination
//! service.
//!
//! A fraud proof is a compact certificate that a specific block at a
//! specific height is invalid. This crate defines the proof capability
//! ([`Proof`]), the codec registry that decodes proofs by type
//! ([`ProofRegistry`]), and the collaborator interfaces the service
//! consumes from its embedder: a broadcast [`Transport`], a [`Datastore`],
//! and header fetchers. The service itself lives in `fraudsub-service`.

use std::error::Error;

mod datastore;
mod error;
mod header;
mod proof;
mod registry;
mod transport;
mod verifier;

pub use datastore::Datastore;
pub use error::{ProofError, StoreError, TransportError};
pub use header::{Header, HeadFetcher, HeaderFetcher};
pub use proof::{Proof, ProofType};
pub use registry::{ProofRegistry, UnmarshalFn};
pub use transport::{
    ProofMessage, RawStream, StreamHandler, SyncStream, Topic, TopicSubscription, TopicValidator,
    Transport, Verdict,
};
pub use verifier::Verifier;

pub use libp2p::PeerId;

pub type BoxError = Box<dyn Error + Send + Sync + 'static>;
