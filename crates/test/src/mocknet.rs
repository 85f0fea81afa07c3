use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::compat::TokioAsyncReadCompatExt;

use fraudsub_common::{
    Header, PeerId, ProofMessage, StreamHandler, SyncStream, Topic, TopicSubscription,
    TopicValidator, Transport, TransportError, Verdict,
};

const STREAM_BUF_SIZE: usize = 64 * 1024;

/// An in-memory mesh of transports: flood-style pub/sub with validator
/// gating, per-peer blacklisting and duplex streams. The shape of a
/// mocked libp2p network, for tests.
pub struct MemNet<H: Header> {
    inner: Arc<NetInner<H>>,
}

struct NetInner<H: Header> {
    nodes: Mutex<HashMap<PeerId, Arc<MemTransport<H>>>>,
}

impl<H: Header> Default for MemNet<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: Header> MemNet<H> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(NetInner {
                nodes: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Create a new transport attached to this network.
    pub fn transport(&self) -> Arc<MemTransport<H>> {
        let transport = Arc::new(MemTransport {
            peer_id: PeerId::random(),
            net: Arc::downgrade(&self.inner),
            topics: Mutex::new(HashMap::new()),
            handlers: Mutex::new(HashMap::new()),
            connected: Mutex::new(HashSet::new()),
            blacklist_calls: Mutex::new(Vec::new()),
        });
        self.inner
            .nodes
            .lock()
            .insert(transport.peer_id, transport.clone());
        transport
    }

    /// Connect two transports both ways.
    pub fn connect(&self, a: &MemTransport<H>, b: &MemTransport<H>) {
        a.connected.lock().insert(b.peer_id);
        b.connected.lock().insert(a.peer_id);
    }
}

pub struct MemTransport<H: Header> {
    peer_id: PeerId,
    net: Weak<NetInner<H>>,
    topics: Mutex<HashMap<String, Arc<MemTopic<H>>>>,
    handlers: Mutex<HashMap<String, StreamHandler>>,
    connected: Mutex<HashSet<PeerId>>,
    blacklist_calls: Mutex<Vec<PeerId>>,
}

impl<H: Header> MemTransport<H> {
    /// Raw handle to a joined topic, for tests that inject messages
    /// below the service API.
    pub fn topic(&self, name: &str) -> Option<Arc<MemTopic<H>>> {
        self.topics.lock().get(name).cloned()
    }

    /// Every `blacklist_peer` call made so far, in order.
    pub fn blacklist_calls(&self) -> Vec<PeerId> {
        self.blacklist_calls.lock().clone()
    }

    pub fn is_blacklisted(&self, peer: &PeerId) -> bool {
        self.blacklist_calls.lock().contains(peer)
    }

    fn node(&self, peer: &PeerId) -> Option<Arc<MemTransport<H>>> {
        self.net
            .upgrade()
            .and_then(|net| net.nodes.lock().get(peer).cloned())
    }
}

#[async_trait]
impl<H: Header> Transport<H> for MemTransport<H> {
    fn local_peer(&self) -> PeerId {
        self.peer_id
    }

    async fn join_topic(
        &self,
        name: &str,
        validator: TopicValidator<H>,
    ) -> Result<Arc<dyn Topic<H>>, TransportError> {
        let mut topics = self.topics.lock();
        if topics.contains_key(name) {
            return Err(TransportError::TopicExists(name.to_owned()));
        }

        let topic = Arc::new_cyclic(|self_ref: &Weak<MemTopic<H>>| MemTopic {
            name: name.to_owned(),
            owner: self.peer_id,
            net: self.net.clone(),
            self_ref: self_ref.clone(),
            validator,
            subscribers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        topics.insert(name.to_owned(), topic.clone());
        Ok(topic)
    }

    fn blacklist_peer(&self, peer: PeerId) {
        self.blacklist_calls.lock().push(peer);
    }

    fn set_stream_handler(
        &self,
        protocol: &str,
        handler: StreamHandler,
    ) -> Result<(), TransportError> {
        self.handlers.lock().insert(protocol.to_owned(), handler);
        Ok(())
    }

    fn remove_stream_handler(&self, protocol: &str) {
        self.handlers.lock().remove(protocol);
    }

    async fn open_stream(
        &self,
        peer: PeerId,
        protocol: &str,
    ) -> Result<SyncStream, TransportError> {
        if !self.connected.lock().contains(&peer) {
            return Err(TransportError::NotConnected(peer));
        }
        let node = self.node(&peer).ok_or(TransportError::NotConnected(peer))?;
        let handler = node
            .handlers
            .lock()
            .get(protocol)
            .cloned()
            .ok_or_else(|| TransportError::UnsupportedProtocol(peer, protocol.to_owned()))?;

        let (local, remote) = tokio::io::duplex(STREAM_BUF_SIZE);
        let from = self.peer_id;
        tokio::spawn(async move { handler(from, Box::new(remote.compat())).await });
        Ok(Box::new(local.compat()))
    }

    fn connected_peers(&self) -> Vec<PeerId> {
        self.connected.lock().iter().copied().collect()
    }
}

pub struct MemTopic<H: Header> {
    name: String,
    owner: PeerId,
    net: Weak<NetInner<H>>,
    self_ref: Weak<MemTopic<H>>,
    validator: TopicValidator<H>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ProofMessage<H>>>>,
    closed: AtomicBool,
}

impl<H: Header> MemTopic<H> {
    fn owner_transport(&self) -> Option<Arc<MemTransport<H>>> {
        self.net
            .upgrade()
            .and_then(|net| net.nodes.lock().get(&self.owner).cloned())
    }

    /// Deliver raw bytes to this topic as if received from `from`:
    /// run the validator, and on accept deliver to local subscribers
    /// and re-flood to connected peers.
    pub fn deliver_raw(self: &Arc<Self>, from: PeerId, data: Bytes) -> BoxFuture<'static, ()> {
        let this = self.clone();
        Box::pin(async move {
            if this.closed.load(Ordering::SeqCst) {
                return;
            }
            let Some(owner) = this.owner_transport() else {
                return;
            };
            // The transport drops messages from blacklisted peers.
            if from != owner.peer_id && owner.is_blacklisted(&from) {
                return;
            }

            let verdict = (this.validator)(from, data.clone()).await;
            if let Verdict::Accept(proof) = verdict {
                this.deliver(ProofMessage {
                    from,
                    data: data.clone(),
                    proof,
                });
                this.forward(&owner, from, data);
            }
        })
    }

    fn deliver(&self, msg: ProofMessage<H>) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(msg.clone()).is_ok());
    }

    // Flood to every connected peer that joined the same topic, except
    // the peer the message came from.
    fn forward(&self, owner: &Arc<MemTransport<H>>, exclude: PeerId, data: Bytes) {
        let peers: Vec<PeerId> = owner.connected.lock().iter().copied().collect();
        for peer in peers {
            if peer == exclude {
                continue;
            }
            let Some(node) = owner.node(&peer) else { continue };
            let Some(topic) = node.topic(&self.name) else {
                continue;
            };
            tokio::spawn(topic.deliver_raw(owner.peer_id, data.clone()));
        }
    }
}

#[async_trait]
impl<H: Header> Topic<H> for MemTopic<H> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, data: Bytes) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::TopicClosed(self.name.clone()));
        }
        // Published messages return through the validator before any
        // delivery (self-delivery), matching gossip semantics. The
        // publish itself succeeds regardless of the eventual verdict.
        if let Some(this) = self.self_ref.upgrade() {
            tokio::spawn(this.deliver_raw(self.owner, data));
        }
        Ok(())
    }

    fn subscribe(&self) -> Result<TopicSubscription<H>, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::TopicClosed(self.name.clone()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        Ok(TopicSubscription::new(rx))
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        self.subscribers.lock().clear();
        if let Some(owner) = self.owner_transport() {
            owner.topics.lock().remove(&self.name);
        }
        Ok(())
    }
}
