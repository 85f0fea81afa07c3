use std::any::Any;
use std::collections::HashMap;
use std::mem;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bytes::Bytes;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use prometheus_client::registry::Registry;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use fraudsub_common::{
    Datastore, HeadFetcher, Header, HeaderFetcher, PeerId, Proof, ProofError, ProofRegistry,
    ProofType, StoreError, Topic, TopicValidator, Transport, Verdict, Verifier,
};

use crate::error::Error;
use crate::metrics::Metrics;
use crate::store::ProofStore;
use crate::subscription::Subscription;
use crate::topic::{join, protocol_id};

// The number of peers the catch-up task requests fraud proofs from.
pub(crate) const FRAUD_REQUESTS: usize = 5;

// Maximum allowable height of a proof relative to the network head for
// it to be verified.
const HEAD_THRESHOLD: u64 = 20;

#[derive(Clone, Debug)]
pub struct Config {
    /// Embedder-chosen short string scoping topic names and the sync
    /// protocol id.
    pub network_id: String,

    /// Whether to catch up on known fraud proofs from connected peers
    /// at start.
    pub sync_enabled: bool,
}

/// Validates, persists and propagates fraud proofs.
///
/// One broadcast topic is joined per proof type in the registry; every
/// incoming message runs through the validation pipeline before it is
/// re-propagated, delivered to [`subscribe`](ProofService::subscribe)rs
/// and stored. Locally [`broadcast`](ProofService::broadcast) proofs
/// return through the same pipeline via transport self-delivery, so
/// there is a single code path for verifier gating and persistence.
pub struct ProofService<H: Header> {
    inner: Arc<Inner<H>>,
}

impl<H: Header> Clone for ProofService<H> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

pub(crate) struct Inner<H: Header> {
    pub(crate) config: Config,
    pub(crate) transport: Arc<dyn Transport<H>>,
    pub(crate) registry: ProofRegistry<H>,
    header_fetcher: HeaderFetcher<H>,
    head_fetcher: HeadFetcher<H>,
    ds: Arc<dyn Datastore>,
    topics: RwLock<HashMap<ProofType, Arc<dyn Topic<H>>>>,
    stores: Mutex<HashMap<ProofType, Arc<ProofStore>>>,
    verifiers: RwLock<HashMap<ProofType, Verifier<H>>>,
    metrics: Metrics,
    pub(crate) cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<H: Header> ProofService<H> {
    pub fn new(
        transport: Arc<dyn Transport<H>>,
        header_fetcher: HeaderFetcher<H>,
        head_fetcher: HeadFetcher<H>,
        registry: ProofRegistry<H>,
        ds: Arc<dyn Datastore>,
        config: Config,
    ) -> Self {
        Self::build(
            transport,
            header_fetcher,
            head_fetcher,
            registry,
            ds,
            config,
            Metrics::default(),
        )
    }

    pub fn new_with_metrics(
        transport: Arc<dyn Transport<H>>,
        header_fetcher: HeaderFetcher<H>,
        head_fetcher: HeadFetcher<H>,
        registry: ProofRegistry<H>,
        ds: Arc<dyn Datastore>,
        config: Config,
        metrics_registry: &mut Registry,
    ) -> Self {
        Self::build(
            transport,
            header_fetcher,
            head_fetcher,
            registry,
            ds,
            config,
            Metrics::new(metrics_registry),
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        transport: Arc<dyn Transport<H>>,
        header_fetcher: HeaderFetcher<H>,
        head_fetcher: HeadFetcher<H>,
        registry: ProofRegistry<H>,
        ds: Arc<dyn Datastore>,
        config: Config,
        metrics: Metrics,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                registry,
                header_fetcher,
                head_fetcher,
                ds,
                topics: RwLock::new(HashMap::new()),
                stores: Mutex::new(HashMap::new()),
                verifiers: RwLock::new(HashMap::new()),
                metrics,
                cancel: CancellationToken::new(),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Join the fraud proof topics, install the sync stream handler and,
    /// if enabled, spawn the one-shot catch-up task.
    ///
    /// Fails fast on the first topic that cannot be joined. Restarting
    /// after [`stop`](ProofService::stop) is undefined.
    pub async fn start(&self) -> Result<(), Error> {
        for proof_type in self.inner.registry.list() {
            let validator = self.validator_for(&proof_type);
            let topic = join(
                self.inner.transport.as_ref(),
                &proof_type,
                &self.inner.config.network_id,
                validator,
            )
            .await?;
            self.inner.topics.write().insert(proof_type, topic);
        }

        let protocol = protocol_id(&self.inner.config.network_id);
        info!(protocol = %protocol, "starting fraud proof service");

        let inner = self.inner.clone();
        self.inner.transport.set_stream_handler(
            &protocol,
            Arc::new(move |peer, stream| {
                let inner = inner.clone();
                Box::pin(async move { inner.handle_sync_request(peer, stream).await })
            }),
        )?;

        if self.inner.config.sync_enabled {
            let inner = self.inner.clone();
            let task = tokio::spawn(async move {
                tokio::select! {
                    _ = inner.cancel.cancelled() => {}
                    _ = inner.sync_fraud_proofs() => {}
                }
            });
            self.inner.tasks.lock().push(task);
        }

        Ok(())
    }

    /// Remove the stream handler, close every topic and wait for
    /// background tasks to drain. Topic close failures are collected
    /// into a single [`Error::Shutdown`].
    pub async fn stop(&self) -> Result<(), Error> {
        self.inner
            .transport
            .remove_stream_handler(&protocol_id(&self.inner.config.network_id));

        let topics: Vec<_> = self.inner.topics.write().drain().collect();
        let mut failed = Vec::new();
        for (proof_type, topic) in topics {
            if let Err(err) = topic.close().await {
                warn!(%proof_type, %err, "failed to close fraud proof topic");
                failed.push(err);
            }
        }

        self.inner.cancel.cancel();
        let tasks = mem::take(&mut *self.inner.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(Error::Shutdown(failed))
        }
    }

    /// Subscribe to verified fraud proofs of the given type.
    pub fn subscribe(&self, proof_type: &ProofType) -> Result<Subscription<H>, Error> {
        let topic = self.inner.topic(proof_type)?;
        Ok(Subscription::new(topic.subscribe()?))
    }

    /// Marshal the proof and publish it to its topic.
    ///
    /// The message re-enters this node through the validation pipeline
    /// via transport self-delivery, so a successful broadcast does not
    /// imply acceptance: an invalid proof is simply never delivered to
    /// subscribers nor persisted.
    pub async fn broadcast(&self, proof: &dyn Proof<H>) -> Result<(), Error> {
        let data = proof.marshal_binary().map_err(Error::Marshal)?;
        let topic = self.inner.topic(&proof.proof_type())?;
        topic.publish(Bytes::from(data)).await?;
        Ok(())
    }

    /// Supply additional verification logic for a proof type, run as
    /// part of processing incoming proofs of that type. At most one
    /// verifier per type, for the lifetime of the service.
    pub fn add_verifier(&self, proof_type: ProofType, verifier: Verifier<H>) -> Result<(), Error> {
        if !self.inner.registry.is_registered(&proof_type) {
            return Err(Error::UnknownProofType(proof_type));
        }

        let mut verifiers = self.inner.verifiers.write();
        if verifiers.contains_key(&proof_type) {
            return Err(Error::DuplicateVerifier(proof_type));
        }
        verifiers.insert(proof_type, verifier);
        Ok(())
    }

    /// Fetch all stored fraud proofs of the given type.
    pub async fn get(&self, proof_type: &ProofType) -> Result<Vec<Arc<dyn Proof<H>>>, Error> {
        let store = self.inner.store(proof_type);
        Ok(store.get_all(proof_type, &self.inner.registry).await?)
    }

    fn validator_for(&self, proof_type: &ProofType) -> TopicValidator<H> {
        let inner = self.inner.clone();
        let proof_type = proof_type.clone();
        Arc::new(move |from, data| {
            let inner = inner.clone();
            let proof_type = proof_type.clone();
            Box::pin(async move { inner.process_incoming(proof_type, from, data).await })
        })
    }
}

impl<H: Header> Inner<H> {
    pub(crate) fn topic(&self, proof_type: &ProofType) -> Result<Arc<dyn Topic<H>>, Error> {
        self.topics
            .read()
            .get(proof_type)
            .cloned()
            .ok_or_else(|| Error::UnknownProofType(proof_type.clone()))
    }

    pub(crate) fn store(&self, proof_type: &ProofType) -> Arc<ProofStore> {
        let mut stores = self.stores.lock();
        stores
            .entry(proof_type.clone())
            .or_insert_with(|| Arc::new(ProofStore::new(self.ds.clone(), proof_type)))
            .clone()
    }

    /// The validation pipeline, invoked by the transport once per
    /// incoming message. Never propagates errors: every failure is
    /// converted into a verdict, and panics tripped by malformed proofs
    /// are caught so they cannot take down the transport's workers.
    pub(crate) async fn process_incoming(
        &self,
        proof_type: ProofType,
        from: PeerId,
        data: Bytes,
    ) -> Verdict<H> {
        let result = AssertUnwindSafe(self.validate_incoming(&proof_type, from, &data))
            .catch_unwind()
            .await;

        let verdict = match result {
            Ok(verdict) => verdict,
            Err(panic) => {
                error!(
                    %proof_type,
                    panic = panic_message(panic.as_ref()),
                    "panic while processing a fraud proof"
                );
                Verdict::Reject
            }
        };

        if matches!(verdict, Verdict::Reject) && from == self.transport.local_peer() {
            warn!(%proof_type, "{}", Error::ValidationFailed);
        }

        verdict
    }

    async fn validate_incoming(
        &self,
        proof_type: &ProofType,
        from: PeerId,
        data: &Bytes,
    ) -> Verdict<H> {
        // The sender is blacklisted for bytes its own codec rejects,
        // but not for a type we simply do not know.
        let proof = match self.registry.unmarshal(proof_type, data) {
            Ok(proof) => proof,
            Err(err @ ProofError::NoUnmarshaler(_)) => {
                error!(%err, "unmarshalling failed");
                return Verdict::Reject;
            }
            Err(err) => {
                error!(%err, peer = %from, "unmarshalling failed");
                self.transport.blacklist_peer(from);
                return Verdict::Reject;
            }
        };

        let hash = hex::encode(proof.header_hash());
        if self.verify_local(proof_type, &hash, data).await {
            debug!(
                %proof_type,
                height = proof.height(),
                hash = %hash,
                peer = %from,
                "received known fraud proof"
            );
            return Verdict::Ignore;
        }

        let head = match (self.head_fetcher)().await {
            Ok(head) => head,
            Err(err) => {
                error!(
                    %err, %proof_type, height = proof.height(),
                    "failed to fetch current network head to verify a fraud proof"
                );
                return Verdict::Ignore;
            }
        };

        if head.height() + HEAD_THRESHOLD < proof.height() {
            error!(
                max_height = head.height() + HEAD_THRESHOLD,
                proof_height = proof.height(),
                %proof_type,
                "received proof above the max threshold"
            );
            return Verdict::Reject;
        }

        let header = match (self.header_fetcher)(proof.height()).await {
            Ok(header) => header,
            Err(err) => {
                error!(
                    %err, %proof_type, height = proof.height(),
                    "failed to fetch header to verify a fraud proof"
                );
                return Verdict::Ignore;
            }
        };

        let verifier = self.verifiers.read().get(proof_type).cloned();
        if let Some(verifier) = verifier {
            match verifier(proof.clone()).await {
                Ok(true) => {}
                Ok(false) => {
                    error!(%proof_type, "invalid fraud proof");
                    return Verdict::Reject;
                }
                Err(err) => {
                    error!(%err, %proof_type, "failed to run the verifier");
                    return Verdict::Reject;
                }
            }
        }

        // The proof decoded but does not hold up against its header:
        // that is malicious, so the sender is blacklisted.
        if let Err(err) = proof.validate(&header) {
            error!(
                %err, %proof_type, height = proof.height(), peer = %from,
                "proof validation failed"
            );
            self.transport.blacklist_peer(from);
            return Verdict::Reject;
        }

        // Re-broadcast matters more than local durability: a failed
        // write is logged but the proof is still accepted.
        if let Err(err) = self.store(proof_type).put(&hash, data.clone()).await {
            error!(%err, "failed to store fraud proof");
        } else {
            self.metrics.observe_stored(proof_type);
        }

        Verdict::Accept(proof)
    }

    async fn verify_local(&self, proof_type: &ProofType, hash: &str, data: &Bytes) -> bool {
        let store = self.stores.lock().get(proof_type).cloned();
        let Some(store) = store else {
            return false;
        };

        match store.get_by_hash(hash).await {
            Ok(stored) => stored == *data,
            Err(StoreError::NotFound) => false,
            Err(err) => {
                error!(%err, "failed to read fraud proof store");
                false
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}
