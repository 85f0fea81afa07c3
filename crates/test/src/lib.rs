//! Test doubles for the fraudsub service: dummy proofs and headers, an
//! in-memory datastore and an in-memory mesh transport.

mod datastore;
mod header;
mod mocknet;
mod proof;

pub use datastore::MapDatastore;
pub use header::{DummyHeader, TestHeaders};
pub use mocknet::{MemNet, MemTopic, MemTransport};
pub use proof::{dummy_proof_type, dummy_registry, DummyProof};
