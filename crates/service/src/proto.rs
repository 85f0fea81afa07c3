//! Wire messages for the fraud proof sync protocol.
//!
//! Hand-written prost structs; the envelope is protobuf so fields can
//! be added without breaking deployed peers. Each message travels as a
//! single unsigned-varint length-prefixed frame on the stream.

/// Asks a peer for all fraud proofs it holds for the listed types.
#[derive(Clone, PartialEq, ::prost::Message)]
pub(crate) struct FraudMessageRequest {
    #[prost(string, repeated, tag = "1")]
    pub requested_proof_type: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

/// The marshalled proofs a responder holds for one proof type.
#[derive(Clone, PartialEq, ::prost::Message)]
pub(crate) struct ProofResponse {
    #[prost(string, tag = "1")]
    pub proof_type: ::prost::alloc::string::String,

    #[prost(bytes = "vec", repeated, tag = "2")]
    pub proofs: ::prost::alloc::vec::Vec<::prost::alloc::vec::Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub(crate) struct FraudMessageResponse {
    #[prost(message, repeated, tag = "1")]
    pub proofs: ::prost::alloc::vec::Vec<ProofResponse>,
}
