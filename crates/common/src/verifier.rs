use std::sync::Arc;

use futures::future::BoxFuture;

use crate::proof::Proof;
use crate::BoxError;

/// Additional verification logic executed while processing an incoming
/// fraud proof, supplementing the proof's own
/// [`validate`](crate::Proof::validate).
///
/// Returning `Ok(false)` or `Err(_)` rejects the proof.
pub type Verifier<H> =
    Arc<dyn Fn(Arc<dyn Proof<H>>) -> BoxFuture<'static, Result<bool, BoxError>> + Send + Sync>;
