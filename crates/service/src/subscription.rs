use std::sync::Arc;

use fraudsub_common::{Header, Proof, TopicSubscription};

use crate::error::Error;

/// Yields successive verified fraud proofs of a single type, in pub/sub
/// delivery order.
pub struct Subscription<H: Header> {
    inner: TopicSubscription<H>,
}

impl<H: Header> Subscription<H> {
    pub(crate) fn new(inner: TopicSubscription<H>) -> Self {
        Self { inner }
    }

    /// The next proof accepted by the validation pipeline. Proofs
    /// handed out here are already verified; callers need not
    /// re-validate. Errors once the topic is closed.
    pub async fn proof(&mut self) -> Result<Arc<dyn Proof<H>>, Error> {
        match self.inner.next().await {
            Some(msg) => Ok(msg.proof),
            None => Err(Error::SubscriptionClosed),
        }
    }

    /// Release the underlying transport subscription.
    pub fn cancel(self) {}
}
