use std::sync::Arc;

use futures::future::BoxFuture;

use crate::BoxError;

/// The slice of a block header the service needs: its height.
///
/// Everything else about headers is the embedder's business.
pub trait Header: Send + Sync + 'static {
    fn height(&self) -> u64;
}

/// Fetches the authoritative header at a given height.
pub type HeaderFetcher<H> =
    Arc<dyn Fn(u64) -> BoxFuture<'static, Result<Arc<H>, BoxError>> + Send + Sync>;

/// Fetches the current network head.
pub type HeadFetcher<H> =
    Arc<dyn Fn() -> BoxFuture<'static, Result<Arc<H>, BoxError>> + Send + Sync>;
