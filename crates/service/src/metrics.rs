use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;

use fraudsub_common::ProofType;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ProofTypeLabels {
    proof_type: String,
}

/// Counters for fraud proofs accepted and persisted by this node,
/// partitioned by proof type.
#[derive(Clone, Default)]
pub struct Metrics {
    stored_proofs: Family<ProofTypeLabels, Counter>,
}

impl Metrics {
    pub fn new(registry: &mut Registry) -> Self {
        let metrics = Self::default();

        registry.register(
            "stored_fraud_proofs",
            "Fraud proofs accepted and persisted by this node",
            metrics.stored_proofs.clone(),
        );

        metrics
    }

    pub(crate) fn observe_stored(&self, proof_type: &ProofType) {
        self.stored_proofs
            .get_or_create(&ProofTypeLabels {
                proof_type: proof_type.to_string(),
            })
            .inc();
    }
}
