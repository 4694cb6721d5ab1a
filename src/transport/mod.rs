//! Delivery transport between agent and collector
//!
//! The agent depends only on [`MetricSender`]; the HTTP binding
//! ([`http::HttpSender`]) and the RPC binding (`grpc::GrpcSender`, behind
//! the `grpc` feature) are interchangeable implementations.

pub mod envelope;
#[cfg(feature = "grpc")]
pub mod grpc;
pub mod http;

use std::fmt;

use async_trait::async_trait;

use crate::metric::Metric;
use envelope::EnvelopeError;

#[derive(Debug)]
pub enum TransportError {
    /// The outbound body could not be built
    Envelope(EnvelopeError),

    /// Connection, timeout or protocol failure
    Request(reqwest::Error),

    /// The collector answered with a non-success HTTP status
    Status(u16),

    /// The RPC call itself failed
    #[cfg(feature = "grpc")]
    Rpc(tonic::Status),

    /// The RPC response carried a nonzero status field
    #[cfg(feature = "grpc")]
    RpcStatus(i32),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Envelope(err) => write!(f, "envelope error: {err}"),
            TransportError::Request(err) => write!(f, "request failed: {err}"),
            TransportError::Status(code) => write!(f, "unexpected status code {code}"),
            #[cfg(feature = "grpc")]
            TransportError::Rpc(status) => write!(f, "rpc failed: {status}"),
            #[cfg(feature = "grpc")]
            TransportError::RpcStatus(code) => write!(f, "unexpected rpc status {code}"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::Envelope(err) => Some(err),
            TransportError::Request(err) => Some(err),
            _ => None,
        }
    }
}

impl From<EnvelopeError> for TransportError {
    fn from(err: EnvelopeError) -> Self {
        TransportError::Envelope(err)
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError::Request(err)
    }
}

/// Capability to deliver one metric to the collector
#[async_trait]
pub trait MetricSender: Send + Sync {
    async fn send(&self, metric: &Metric) -> Result<(), TransportError>;
}
