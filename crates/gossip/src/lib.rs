//! libp2p transport for the fraudsub service.
//!
//! The swarm combines gossipsub (broadcast topics), `libp2p-stream`
//! (sync streams), identify and ping, and runs in a background task;
//! [`GossipTransport`] talks to it over a control channel and implements
//! the [`Transport`](fraudsub_common::Transport) seam the service
//! consumes.

use std::collections::{HashMap, HashSet};
use std::ops::ControlFlow;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use libp2p::swarm::{self, SwarmEvent};
use libp2p::{gossipsub, identify, SwarmBuilder};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, error, error_span, Instrument};

pub use libp2p::identity::Keypair;
pub use libp2p::{Multiaddr, PeerId};

use fraudsub_common::{BoxError, Header, TransportError};

mod behaviour;
mod transport;

use behaviour::{Behaviour, NetworkEvent};
use transport::{spawn_self_delivery, spawn_validation, CtrlMsg, TopicMap};

pub use transport::{GossipTopic, GossipTransport};

const PROTOCOL_VERSION: &str = "fraudsub/v0.0.1";

#[derive(Clone, Debug)]
pub struct Config {
    idle_connection_timeout: Duration,
}

impl Config {
    fn apply(self, cfg: swarm::Config) -> swarm::Config {
        cfg.with_idle_connection_timeout(self.idle_connection_timeout)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            idle_connection_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
pub enum Event {
    Listening(Multiaddr),
    PeerConnected(PeerId),
    PeerDisconnected(PeerId),
    PeerSubscribed { peer: PeerId, topic: String },
}

/// Informational events from the swarm task.
pub struct Events {
    rx: mpsc::Receiver<Event>,
}

impl Events {
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

/// Start a swarm listening on `addr` and return a transport handle for
/// it together with its event stream.
pub async fn spawn<H: Header>(
    keypair: Keypair,
    addr: Multiaddr,
    config: Config,
) -> Result<(Arc<GossipTransport<H>>, Events), BoxError> {
    let mut swarm = SwarmBuilder::with_existing_identity(keypair)
        .with_tokio()
        .with_quic()
        .with_behaviour(Behaviour::new)?
        .with_swarm_config(|cfg| config.apply(cfg))
        .build();

    swarm.listen_on(addr)?;

    let local_peer = *swarm.local_peer_id();
    let control = swarm.behaviour_mut().stream.new_control();

    let (tx_event, rx_event) = mpsc::channel(32);
    let (tx_ctrl, rx_ctrl) = mpsc::unbounded_channel();

    let topics: TopicMap<H> = Arc::new(RwLock::new(HashMap::new()));
    let connected = Arc::new(RwLock::new(HashSet::new()));

    let span = error_span!("gossip", peer = %local_peer);
    let task = tokio::task::spawn(
        run(
            swarm,
            topics.clone(),
            connected.clone(),
            rx_ctrl,
            tx_ctrl.clone(),
            tx_event,
            local_peer,
        )
        .instrument(span),
    );

    let transport = Arc::new(GossipTransport {
        local_peer,
        tx_ctrl,
        control: Mutex::new(control),
        topics,
        handlers: Mutex::new(HashMap::new()),
        connected,
        task: Mutex::new(Some(task)),
    });

    Ok((transport, Events { rx: rx_event }))
}

async fn run<H: Header>(
    mut swarm: swarm::Swarm<Behaviour>,
    topics: TopicMap<H>,
    connected: Arc<RwLock<HashSet<PeerId>>>,
    mut rx_ctrl: mpsc::UnboundedReceiver<CtrlMsg>,
    tx_ctrl: mpsc::UnboundedSender<CtrlMsg>,
    tx_event: mpsc::Sender<Event>,
    local_peer: PeerId,
) {
    loop {
        let result = tokio::select! {
            event = swarm.select_next_some() => {
                handle_swarm_event(event, &topics, &connected, &tx_ctrl, &tx_event).await
            }

            Some(ctrl) = rx_ctrl.recv() => {
                handle_ctrl_msg(ctrl, &mut swarm, &topics, local_peer).await
            }
        };

        match result {
            ControlFlow::Continue(()) => continue,
            ControlFlow::Break(()) => break,
        }
    }
}

async fn handle_ctrl_msg<H: Header>(
    msg: CtrlMsg,
    swarm: &mut swarm::Swarm<Behaviour>,
    topics: &TopicMap<H>,
    local_peer: PeerId,
) -> ControlFlow<()> {
    match msg {
        CtrlMsg::Subscribe { name, reply } => {
            let topic = gossipsub::IdentTopic::new(&name);
            let result = swarm
                .behaviour_mut()
                .gossipsub
                .subscribe(&topic)
                .map(|_| ())
                .map_err(|err| TransportError::Other(err.into()));
            let _ = reply.send(result);
        }

        CtrlMsg::Unsubscribe { name, reply } => {
            let topic = gossipsub::IdentTopic::new(&name);
            let _ = swarm.behaviour_mut().gossipsub.unsubscribe(&topic);
            topics.write().remove(&name);
            let _ = reply.send(());
        }

        CtrlMsg::Publish { name, data, reply } => {
            let topic = gossipsub::IdentTopic::new(&name);
            let result = match swarm
                .behaviour_mut()
                .gossipsub
                .publish(topic, data.to_vec())
            {
                Ok(message_id) => {
                    debug!(topic = %name, %message_id, "published message");
                    Ok(())
                }
                // No subscribed peers yet; the message still reaches
                // this node through self-delivery below.
                Err(gossipsub::PublishError::InsufficientPeers) => {
                    debug!(topic = %name, "no peers to publish to");
                    Ok(())
                }
                Err(err) => {
                    error!(topic = %name, %err, "error publishing message");
                    Err(TransportError::Other(err.into()))
                }
            };

            if result.is_ok() {
                let topic = topics.read().get(&name).cloned();
                if let Some(topic) = topic {
                    spawn_self_delivery(topic, local_peer, data);
                }
            }
            let _ = reply.send(result);
        }

        CtrlMsg::Report {
            message_id,
            propagation_source,
            acceptance,
        } => {
            let _ = swarm.behaviour_mut().gossipsub.report_message_validation_result(
                &message_id,
                &propagation_source,
                acceptance,
            );
        }

        CtrlMsg::Blacklist(peer) => {
            swarm.behaviour_mut().gossipsub.blacklist_peer(&peer);
        }

        CtrlMsg::Dial { addr, reply } => {
            let result = swarm
                .dial(addr)
                .map_err(|err| TransportError::Other(err.into()));
            let _ = reply.send(result);
        }

        CtrlMsg::Shutdown => return ControlFlow::Break(()),
    }

    ControlFlow::Continue(())
}

async fn handle_swarm_event<H: Header>(
    event: SwarmEvent<NetworkEvent>,
    topics: &TopicMap<H>,
    connected: &Arc<RwLock<HashSet<PeerId>>>,
    tx_ctrl: &mpsc::UnboundedSender<CtrlMsg>,
    tx_event: &mpsc::Sender<Event>,
) -> ControlFlow<()> {
    match event {
        SwarmEvent::NewListenAddr { address, .. } => {
            debug!("node is listening on {address}");
            let _ = tx_event.send(Event::Listening(address)).await;
        }

        SwarmEvent::ConnectionEstablished { peer_id, .. } => {
            debug!("connected to {peer_id}");
            connected.write().insert(peer_id);
            let _ = tx_event.send(Event::PeerConnected(peer_id)).await;
        }

        SwarmEvent::ConnectionClosed {
            peer_id,
            num_established,
            ..
        } => {
            if num_established == 0 {
                debug!("disconnected from {peer_id}");
                connected.write().remove(&peer_id);
                let _ = tx_event.send(Event::PeerDisconnected(peer_id)).await;
            }
        }

        SwarmEvent::Behaviour(NetworkEvent::Identify(identify::Event::Sent {
            peer_id, ..
        })) => {
            debug!("sent identity to {peer_id}");
        }

        SwarmEvent::Behaviour(NetworkEvent::Identify(identify::Event::Received {
            peer_id,
            ..
        })) => {
            debug!("received identity from {peer_id}");
        }

        SwarmEvent::Behaviour(NetworkEvent::GossipSub(gossipsub::Event::Subscribed {
            peer_id,
            topic,
        })) => {
            debug!("peer {peer_id} subscribed to {topic}");
            let _ = tx_event
                .send(Event::PeerSubscribed {
                    peer: peer_id,
                    topic: topic.to_string(),
                })
                .await;
        }

        SwarmEvent::Behaviour(NetworkEvent::GossipSub(gossipsub::Event::Message {
            propagation_source,
            message_id,
            message,
        })) => {
            let topic = topics.read().get(message.topic.as_str()).cloned();
            let Some(topic) = topic else {
                debug!(topic = %message.topic, "message on unknown topic");
                return ControlFlow::Continue(());
            };
            if topic.closed.load(Ordering::SeqCst) {
                return ControlFlow::Continue(());
            }

            debug!(
                topic = %message.topic,
                "received message from {propagation_source} of {} bytes",
                message.data.len()
            );

            spawn_validation(
                topic,
                tx_ctrl.clone(),
                message_id,
                propagation_source,
                Bytes::from(message.data),
            );
        }

        _ => {}
    }

    ControlFlow::Continue(())
}
