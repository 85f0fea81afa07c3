use core::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::header::Header;
use crate::proof::Proof;
use crate::PeerId;

/// Outcome of validating one incoming topic message, with the usual
/// gossip semantics.
///
/// `Accept` carries the decoded proof so the delivery path can hand out
/// typed values without re-decoding; the transport re-propagates the
/// message and delivers it to local subscribers. `Ignore` drops the
/// message without penalty. `Reject` drops it; any peer penalty is a
/// separate, explicit [`Transport::blacklist_peer`] call made by the
/// validator itself.
pub enum Verdict<H: Header> {
    Accept(Arc<dyn Proof<H>>),
    Ignore,
    Reject,
}

impl<H: Header> fmt::Debug for Verdict<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Accept(proof) => write!(f, "Accept({})", proof.proof_type()),
            Verdict::Ignore => f.write_str("Ignore"),
            Verdict::Reject => f.write_str("Reject"),
        }
    }
}

/// Per-topic message validator installed when the topic is joined.
///
/// Invoked by the transport for every message before re-propagation,
/// including the node's own published messages (self-delivery).
pub type TopicValidator<H> =
    Arc<dyn Fn(PeerId, Bytes) -> BoxFuture<'static, Verdict<H>> + Send + Sync>;

/// An accepted message as delivered to topic subscribers: the raw bytes
/// plus the proof decoded during validation.
pub struct ProofMessage<H: Header> {
    pub from: PeerId,
    pub data: Bytes,
    pub proof: Arc<dyn Proof<H>>,
}

impl<H: Header> Clone for ProofMessage<H> {
    fn clone(&self) -> Self {
        Self {
            from: self.from,
            data: self.data.clone(),
            proof: self.proof.clone(),
        }
    }
}

/// Consumer half of a topic subscription. Messages arrive in pub/sub
/// delivery order; dropping the subscription releases it.
pub struct TopicSubscription<H: Header> {
    rx: mpsc::UnboundedReceiver<ProofMessage<H>>,
}

impl<H: Header> TopicSubscription<H> {
    pub fn new(rx: mpsc::UnboundedReceiver<ProofMessage<H>>) -> Self {
        Self { rx }
    }

    /// The next accepted message, or `None` once the topic is closed.
    pub async fn next(&mut self) -> Option<ProofMessage<H>> {
        self.rx.recv().await
    }
}

/// A bidirectional byte stream to a peer, the shape of `libp2p::Stream`.
pub trait RawStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> RawStream for T {}

pub type SyncStream = Box<dyn RawStream>;

/// Handler invoked for every inbound stream on a registered protocol.
pub type StreamHandler =
    Arc<dyn Fn(PeerId, SyncStream) -> BoxFuture<'static, ()> + Send + Sync>;

/// A joined broadcast topic.
#[async_trait]
pub trait Topic<H: Header>: Send + Sync {
    fn name(&self) -> &str;

    /// Publish bytes to the network. The message also returns to this
    /// node through the topic validator (self-delivery), so publishing
    /// success says nothing about the message being accepted.
    async fn publish(&self, data: Bytes) -> Result<(), TransportError>;

    /// Subscribe to messages accepted on this topic.
    fn subscribe(&self) -> Result<TopicSubscription<H>, TransportError>;

    /// Leave the topic. Open subscriptions terminate.
    async fn close(&self) -> Result<(), TransportError>;
}

/// The broadcast and stream capabilities the service consumes from its
/// embedder. Discovery, connection management, authentication and
/// encryption all live behind this seam.
#[async_trait]
pub trait Transport<H: Header>: Send + Sync {
    fn local_peer(&self) -> PeerId;

    /// Join the named topic and install its message validator.
    async fn join_topic(
        &self,
        name: &str,
        validator: TopicValidator<H>,
    ) -> Result<Arc<dyn Topic<H>>, TransportError>;

    /// Penalize a peer for a malicious message. Further messages from
    /// it are dropped at the transport level.
    fn blacklist_peer(&self, peer: PeerId);

    /// Register a handler for inbound streams on `protocol`.
    fn set_stream_handler(
        &self,
        protocol: &str,
        handler: StreamHandler,
    ) -> Result<(), TransportError>;

    fn remove_stream_handler(&self, protocol: &str);

    /// Open an outbound stream to `peer` speaking `protocol`.
    async fn open_stream(
        &self,
        peer: PeerId,
        protocol: &str,
    ) -> Result<SyncStream, TransportError>;

    /// Peers currently connected to this node.
    fn connected_peers(&self) -> Vec<PeerId>;
}
