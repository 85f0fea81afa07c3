use std::sync::Arc;

use fraudsub_common::{Header, ProofType, Topic, TopicValidator, Transport, TransportError};

/// Gossip topic name for a proof type: `/fraud-sub/<network_id>/<type>`.
pub(crate) fn topic_name(proof_type: &ProofType, network_id: &str) -> String {
    format!("/fraud-sub/{network_id}/{proof_type}")
}

/// Stream protocol id for the sync protocol:
/// `/fraud/sync/<network_id>/v0.0.1`.
pub(crate) fn protocol_id(network_id: &str) -> String {
    format!("/fraud/sync/{network_id}/v0.0.1")
}

/// Join the broadcast topic for a proof type, installing the validation
/// pipeline as its message validator.
pub(crate) async fn join<H: Header>(
    transport: &dyn Transport<H>,
    proof_type: &ProofType,
    network_id: &str,
    validator: TopicValidator<H>,
) -> Result<Arc<dyn Topic<H>>, TransportError> {
    transport
        .join_topic(&topic_name(proof_type, network_id), validator)
        .await
}
