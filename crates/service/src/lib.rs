//! Validating and propagating fraud proofs.
//!
//! [`ProofService`] joins one broadcast topic per registered proof type,
//! gates re-propagation of incoming proofs on a validation pipeline,
//! persists accepted proofs in a content-addressed store, and can catch
//! up on known proofs from connected peers at startup over a
//! request/response stream protocol.

mod error;
mod metrics;
mod proto;
mod service;
mod store;
mod subscription;
mod sync;
mod topic;

pub use error::Error;
pub use metrics::Metrics;
pub use service::{Config, ProofService};
pub use subscription::Subscription;
