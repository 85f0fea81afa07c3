//! Pull-based catch-up for fraud proofs.
//!
//! At start, a node with sync enabled asks a random subset of connected
//! peers for every proof it holds; peers answer over a dedicated stream
//! protocol. Returned proofs are republished into the regular topics so
//! they traverse the full validation, persistence and delivery path.

use std::sync::Arc;
use std::time::Duration;

use asynchronous_codec::Framed;
use bytes::Bytes;
use futures::future::join_all;
use futures::{SinkExt, StreamExt};
use prost::Message;
use rand::seq::IteratorRandom;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, warn};
use unsigned_varint::codec::UviBytes;

use fraudsub_common::{Header, PeerId, ProofType, StoreError, SyncStream, TransportError};

use crate::proto::{FraudMessageRequest, FraudMessageResponse, ProofResponse};
use crate::service::{Inner, FRAUD_REQUESTS};
use crate::topic::protocol_id;

// Upper bound on one framed sync message; matches the gossip transmit
// limit.
const MAX_SYNC_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

// How long one peer gets to answer a catch-up request.
const SYNC_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
enum SyncError {
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("decode: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("stream closed before a full response arrived")]
    UnexpectedEof,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

fn codec() -> UviBytes {
    let mut codec = UviBytes::default();
    codec.set_max_len(MAX_SYNC_MESSAGE_SIZE);
    codec
}

impl<H: Header> Inner<H> {
    /// One round of catch-up over up to [`FRAUD_REQUESTS`] randomly
    /// selected connected peers. Per-peer failures are logged and never
    /// fail the service; continuous catch-up is the job of pub/sub.
    pub(crate) async fn sync_fraud_proofs(self: &Arc<Self>) {
        debug!("start fetching fraud proofs");

        let protocol = protocol_id(&self.config.network_id);
        let peers = self
            .transport
            .connected_peers()
            .into_iter()
            .choose_multiple(&mut rand::thread_rng(), FRAUD_REQUESTS);

        if peers.is_empty() {
            debug!("no connected peers to fetch fraud proofs from");
            return;
        }

        let requests: Vec<_> = peers
            .into_iter()
            .map(|peer| {
                let inner = self.clone();
                let protocol = protocol.clone();
                tokio::spawn(async move {
                    match timeout(SYNC_REQUEST_TIMEOUT, inner.request_proofs(peer, &protocol)).await
                    {
                        Ok(Ok(())) => debug!(%peer, "fetched fraud proofs from peer"),
                        Ok(Err(err)) => warn!(%peer, %err, "failed to fetch fraud proofs from peer"),
                        Err(_) => warn!(%peer, "fraud proof request timed out"),
                    }
                })
            })
            .collect();

        for request in requests {
            let _ = request.await;
        }
    }

    async fn request_proofs(
        self: &Arc<Self>,
        peer: PeerId,
        protocol: &str,
    ) -> Result<(), SyncError> {
        let stream = self.transport.open_stream(peer, protocol).await?;
        let mut framed = Framed::new(stream, codec());

        let request = FraudMessageRequest {
            requested_proof_type: self
                .registry
                .list()
                .iter()
                .map(ToString::to_string)
                .collect(),
        };
        framed.send(Bytes::from(request.encode_to_vec())).await?;

        let frame = match framed.next().await {
            Some(frame) => frame?,
            None => return Err(SyncError::UnexpectedEof),
        };
        let response = FraudMessageResponse::decode(&frame[..])?;

        for entry in response.proofs {
            let proof_type = ProofType::from(entry.proof_type);
            let Ok(topic) = self.topic(&proof_type) else {
                warn!(%proof_type, "topic for synced proof type does not exist");
                continue;
            };

            // Republishing routes each proof through the validation
            // pipeline and on to local subscribers, exactly as if it
            // had arrived over pub/sub.
            for proof in entry.proofs {
                if let Err(err) = topic.publish(Bytes::from(proof)).await {
                    warn!(%err, %proof_type, "failed to republish synced fraud proof");
                }
            }
        }

        Ok(())
    }

    /// Server side of the sync protocol: answer a request with every
    /// stored proof of each requested type.
    pub(crate) async fn handle_sync_request(self: Arc<Self>, peer: PeerId, stream: SyncStream) {
        debug!(%peer, "handling fraud proof request");

        let mut framed = Framed::new(stream, codec());

        let request = match framed.next().await {
            Some(Ok(frame)) => match FraudMessageRequest::decode(&frame[..]) {
                Ok(request) => request,
                Err(err) => {
                    warn!(%peer, %err, "failed to decode fraud proof request");
                    return;
                }
            },
            Some(Err(err)) => {
                warn!(%peer, %err, "failed to read fraud proof request");
                return;
            }
            None => {
                warn!(%peer, "fraud proof stream closed before a request arrived");
                return;
            }
        };

        let responses = join_all(
            request
                .requested_proof_type
                .iter()
                .map(|tp| self.collect_proofs(ProofType::from(tp.as_str()))),
        )
        .await;

        let response = FraudMessageResponse { proofs: responses };
        if let Err(err) = framed.send(Bytes::from(response.encode_to_vec())).await {
            warn!(%peer, %err, "failed to write fraud proof response");
            return;
        }
        if let Err(err) = framed.close().await {
            debug!(%peer, %err, "failed to close fraud proof stream");
        }
    }

    async fn collect_proofs(&self, proof_type: ProofType) -> ProofResponse {
        let mut response = ProofResponse {
            proof_type: proof_type.to_string(),
            proofs: Vec::new(),
        };

        let store = self.store(&proof_type);
        match store.get_all(&proof_type, &self.registry).await {
            Ok(proofs) => {
                for proof in proofs {
                    match proof.marshal_binary() {
                        Ok(bin) => response.proofs.push(bin),
                        Err(err) => {
                            warn!(%err, %proof_type, "failed to marshal stored fraud proof")
                        }
                    }
                }
            }
            Err(StoreError::NotFound) => {}
            Err(err) => warn!(%err, %proof_type, "failed to read fraud proofs from store"),
        }

        response
    }
}
