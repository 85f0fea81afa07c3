use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use libp2p::gossipsub::{MessageAcceptance, MessageId};
use libp2p::{Multiaddr, StreamProtocol};
use libp2p_stream as stream;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use fraudsub_common::{
    Header, PeerId, ProofMessage, StreamHandler, SyncStream, Topic, TopicSubscription,
    TopicValidator, Transport, TransportError, Verdict,
};

pub(crate) enum CtrlMsg {
    Subscribe {
        name: String,
        reply: oneshot::Sender<Result<(), TransportError>>,
    },
    Unsubscribe {
        name: String,
        reply: oneshot::Sender<()>,
    },
    Publish {
        name: String,
        data: Bytes,
        reply: oneshot::Sender<Result<(), TransportError>>,
    },
    Report {
        message_id: MessageId,
        propagation_source: PeerId,
        acceptance: MessageAcceptance,
    },
    Blacklist(PeerId),
    Dial {
        addr: Multiaddr,
        reply: oneshot::Sender<Result<(), TransportError>>,
    },
    Shutdown,
}

/// Per-topic state shared between the swarm task, the validation tasks
/// it spawns and the [`GossipTopic`] handle.
pub(crate) struct TopicShared<H: Header> {
    pub(crate) name: String,
    pub(crate) validator: TopicValidator<H>,
    pub(crate) subscribers: Mutex<Vec<mpsc::UnboundedSender<ProofMessage<H>>>>,
    pub(crate) closed: AtomicBool,
}

impl<H: Header> TopicShared<H> {
    pub(crate) fn deliver(&self, msg: ProofMessage<H>) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(msg.clone()).is_ok());
    }
}

pub(crate) type TopicMap<H> = Arc<RwLock<HashMap<String, Arc<TopicShared<H>>>>>;

/// A libp2p-backed [`Transport`]: gossipsub for the broadcast topics,
/// `libp2p-stream` for the sync streams. The swarm runs in a background
/// task; this handle talks to it over a control channel.
pub struct GossipTransport<H: Header> {
    pub(crate) local_peer: PeerId,
    pub(crate) tx_ctrl: mpsc::UnboundedSender<CtrlMsg>,
    pub(crate) control: Mutex<stream::Control>,
    pub(crate) topics: TopicMap<H>,
    pub(crate) handlers: Mutex<HashMap<String, JoinHandle<()>>>,
    pub(crate) connected: Arc<RwLock<HashSet<PeerId>>>,
    pub(crate) task: Mutex<Option<JoinHandle<()>>>,
}

impl<H: Header> GossipTransport<H> {
    /// Dial a peer by address.
    pub async fn dial(&self, addr: Multiaddr) -> Result<(), TransportError> {
        let (reply, rx) = oneshot::channel();
        self.send_ctrl(CtrlMsg::Dial { addr, reply })?;
        rx.await.map_err(|_| stopped())?
    }

    /// Shut the swarm down and wait for its task to finish. Every topic
    /// and stream handler dies with it.
    pub async fn shutdown(&self) {
        let _ = self.tx_ctrl.send(CtrlMsg::Shutdown);
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    fn send_ctrl(&self, msg: CtrlMsg) -> Result<(), TransportError> {
        self.tx_ctrl.send(msg).map_err(|_| stopped())
    }
}

fn stopped() -> TransportError {
    TransportError::Other("gossip task stopped".into())
}

#[async_trait]
impl<H: Header> Transport<H> for GossipTransport<H> {
    fn local_peer(&self) -> PeerId {
        self.local_peer
    }

    async fn join_topic(
        &self,
        name: &str,
        validator: TopicValidator<H>,
    ) -> Result<Arc<dyn Topic<H>>, TransportError> {
        let shared = {
            let mut topics = self.topics.write();
            if topics.contains_key(name) {
                return Err(TransportError::TopicExists(name.to_owned()));
            }
            let shared = Arc::new(TopicShared {
                name: name.to_owned(),
                validator,
                subscribers: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            });
            topics.insert(name.to_owned(), shared.clone());
            shared
        };

        let joined = async {
            let (reply, rx) = oneshot::channel();
            self.send_ctrl(CtrlMsg::Subscribe {
                name: name.to_owned(),
                reply,
            })?;
            rx.await.map_err(|_| stopped())?
        }
        .await;

        if let Err(err) = joined {
            self.topics.write().remove(name);
            return Err(err);
        }

        Ok(Arc::new(GossipTopic {
            shared,
            tx_ctrl: self.tx_ctrl.clone(),
        }))
    }

    fn blacklist_peer(&self, peer: PeerId) {
        let _ = self.tx_ctrl.send(CtrlMsg::Blacklist(peer));
    }

    fn set_stream_handler(
        &self,
        protocol: &str,
        handler: StreamHandler,
    ) -> Result<(), TransportError> {
        let proto = StreamProtocol::try_from_owned(protocol.to_owned())
            .map_err(|err| TransportError::Other(err.into()))?;

        let mut control = self.control.lock().clone();
        let incoming = control
            .accept(proto)
            .map_err(|_| TransportError::HandlerExists(protocol.to_owned()))?;

        let task = tokio::spawn(accept_streams(incoming, handler));
        if let Some(prev) = self.handlers.lock().insert(protocol.to_owned(), task) {
            prev.abort();
        }
        Ok(())
    }

    fn remove_stream_handler(&self, protocol: &str) {
        // Aborting the accept task drops the incoming stream listener,
        // which deregisters the protocol.
        if let Some(task) = self.handlers.lock().remove(protocol) {
            task.abort();
        }
    }

    async fn open_stream(
        &self,
        peer: PeerId,
        protocol: &str,
    ) -> Result<SyncStream, TransportError> {
        let proto = StreamProtocol::try_from_owned(protocol.to_owned())
            .map_err(|err| TransportError::Other(err.into()))?;

        let mut control = self.control.lock().clone();
        let stream = control.open_stream(peer, proto).await.map_err(|err| match err {
            stream::OpenStreamError::UnsupportedProtocol(_) => {
                TransportError::UnsupportedProtocol(peer, protocol.to_owned())
            }
            err => TransportError::Other(err.into()),
        })?;

        Ok(Box::new(stream))
    }

    fn connected_peers(&self) -> Vec<PeerId> {
        self.connected.read().iter().copied().collect()
    }
}

async fn accept_streams(mut incoming: stream::IncomingStreams, handler: StreamHandler) {
    while let Some((peer, stream)) = incoming.next().await {
        debug!(%peer, "accepted incoming stream");
        let handler = handler.clone();
        tokio::spawn(async move { handler(peer, Box::new(stream)).await });
    }
}

pub struct GossipTopic<H: Header> {
    shared: Arc<TopicShared<H>>,
    tx_ctrl: mpsc::UnboundedSender<CtrlMsg>,
}

#[async_trait]
impl<H: Header> Topic<H> for GossipTopic<H> {
    fn name(&self) -> &str {
        &self.shared.name
    }

    async fn publish(&self, data: Bytes) -> Result<(), TransportError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(TransportError::TopicClosed(self.shared.name.clone()));
        }

        let (reply, rx) = oneshot::channel();
        self.tx_ctrl
            .send(CtrlMsg::Publish {
                name: self.shared.name.clone(),
                data,
                reply,
            })
            .map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())?
    }

    fn subscribe(&self) -> Result<TopicSubscription<H>, TransportError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(TransportError::TopicClosed(self.shared.name.clone()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.subscribers.lock().push(tx);
        Ok(TopicSubscription::new(rx))
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.subscribers.lock().clear();

        let (reply, rx) = oneshot::channel();
        self.tx_ctrl
            .send(CtrlMsg::Unsubscribe {
                name: self.shared.name.clone(),
                reply,
            })
            .map_err(|_| stopped())?;
        let _ = rx.await;
        Ok(())
    }
}

/// Deliver an accepted message to the topic's local subscribers after
/// running its validator; report the verdict back to gossipsub.
pub(crate) fn spawn_validation<H: Header>(
    topic: Arc<TopicShared<H>>,
    tx_ctrl: mpsc::UnboundedSender<CtrlMsg>,
    message_id: MessageId,
    propagation_source: PeerId,
    data: Bytes,
) {
    tokio::spawn(async move {
        let verdict = (topic.validator)(propagation_source, data.clone()).await;

        let acceptance = match &verdict {
            Verdict::Accept(_) => MessageAcceptance::Accept,
            Verdict::Ignore => MessageAcceptance::Ignore,
            Verdict::Reject => MessageAcceptance::Reject,
        };
        let _ = tx_ctrl.send(CtrlMsg::Report {
            message_id,
            propagation_source,
            acceptance,
        });

        if let Verdict::Accept(proof) = verdict {
            topic.deliver(ProofMessage {
                from: propagation_source,
                data,
                proof,
            });
        }
    });
}

/// Synthesized self-delivery: gossipsub does not hand published
/// messages back to the publisher, so locally published data is pushed
/// through the topic validator here to keep a single validation and
/// persistence path.
pub(crate) fn spawn_self_delivery<H: Header>(
    topic: Arc<TopicShared<H>>,
    local_peer: PeerId,
    data: Bytes,
) {
    tokio::spawn(async move {
        if let Verdict::Accept(proof) = (topic.validator)(local_peer, data.clone()).await {
            topic.deliver(ProofMessage {
                from: local_peer,
                data,
                proof,
            });
        }
    });
}
