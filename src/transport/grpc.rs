//! RPC binding over `metrics.v1.MetricService/Update`
//!
//! Carries a structured message; compression and signing are HTTP-only.
//! A zero `status` in the response means success.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, Server};
use tonic::{Request, Response, Status};
use tracing::{error, info, instrument};

use super::{MetricSender, TransportError};
use crate::collector::MetricService;
use crate::metric::{Metric, MetricError, MetricValue};

pub mod proto {
    tonic::include_proto!("metrics.v1");
}

use proto::metric::MType;
use proto::metric_service_client::MetricServiceClient;
use proto::metric_service_server::{MetricService as MetricRpc, MetricServiceServer};

pub const STATUS_OK: i32 = 0;

/// Reported when the collector could not store the metric
pub const STATUS_INTERNAL: i32 = 13;

impl From<&Metric> for proto::Metric {
    fn from(metric: &Metric) -> Self {
        let (mtype, delta, value) = match metric.value {
            MetricValue::Gauge(value) => (MType::Gauge, 0, value),
            MetricValue::Counter(delta) => (MType::Counter, delta, 0.0),
        };

        proto::Metric {
            id: metric.id.clone(),
            r#type: mtype as i32,
            delta,
            value,
        }
    }
}

impl TryFrom<proto::Metric> for Metric {
    type Error = MetricError;

    fn try_from(metric: proto::Metric) -> Result<Self, Self::Error> {
        let mtype = MType::try_from(metric.r#type)
            .map_err(|_| MetricError::InvalidMetricKind(metric.r#type.to_string()))?;

        Ok(match mtype {
            MType::Gauge => Metric::gauge(metric.id, metric.value),
            MType::Counter => Metric::counter(metric.id, metric.delta),
        })
    }
}

/// Agent-side sender using the RPC binding
pub struct GrpcSender {
    client: MetricServiceClient<Channel>,
}

impl GrpcSender {
    /// The connection is established on first use
    pub fn connect_lazy(address: &str) -> Result<Self, TransportError> {
        let uri = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{address}")
        };

        let channel = Channel::from_shared(uri)
            .map_err(|e| TransportError::Rpc(Status::invalid_argument(e.to_string())))?
            .connect_lazy();

        Ok(Self {
            client: MetricServiceClient::new(channel),
        })
    }
}

#[async_trait]
impl MetricSender for GrpcSender {
    #[instrument(skip_all, fields(metric = %metric.key()))]
    async fn send(&self, metric: &Metric) -> Result<(), TransportError> {
        let response = self
            .client
            .clone()
            .update(proto::Metric::from(metric))
            .await
            .map_err(TransportError::Rpc)?;

        match response.into_inner().status {
            STATUS_OK => Ok(()),
            code => Err(TransportError::RpcStatus(code)),
        }
    }
}

/// Collector-side RPC handler
pub struct MetricRpcService {
    service: Arc<MetricService>,
}

impl MetricRpcService {
    pub fn new(service: Arc<MetricService>) -> Self {
        Self { service }
    }
}

#[tonic::async_trait]
impl MetricRpc for MetricRpcService {
    async fn update(
        &self,
        request: Request<proto::Metric>,
    ) -> Result<Response<proto::MetricResponse>, Status> {
        let metric = Metric::try_from(request.into_inner())
            .map_err(|e| Status::invalid_argument(e.to_string()))?;

        let status = match self.service.set_metric(metric).await {
            Ok(_) => STATUS_OK,
            Err(e) => {
                error!("failed to store metric: {e}");
                STATUS_INTERNAL
            }
        };

        Ok(Response::new(proto::MetricResponse { status }))
    }
}

/// Serve the RPC binding until `shutdown` is cancelled
pub async fn serve(
    addr: SocketAddr,
    service: Arc<MetricService>,
    shutdown: CancellationToken,
) -> Result<(), tonic::transport::Error> {
    info!("gRPC server listening on {addr}");

    Server::builder()
        .add_service(MetricServiceServer::new(MetricRpcService::new(service)))
        .serve_with_shutdown(addr, shutdown.cancelled_owned())
        .await
}
