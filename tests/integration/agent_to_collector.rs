//! Agent reporting to a collector over real HTTP
//!
//! These tests verify that:
//! - Sealed and signed metrics are merged by the collector
//! - The running PollCount reaches the collector
//! - A collector with a different secret rejects everything

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use metrics_relay::agent::Agent;
use metrics_relay::api::{self, ApiState};
use metrics_relay::collector::MetricService;
use metrics_relay::metric::{Metric, MetricKey, MetricKind, MetricValue};
use metrics_relay::retry::RetryPolicy;
use metrics_relay::transport::envelope::{Envelope, EnvelopeOpener};
use metrics_relay::transport::http::HttpSender;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::helpers::{FixedSampler, fast_agent_config, memory_service};

const SECRET: &str = "integration-secret";

async fn spawn_collector(
    service: Arc<MetricService>,
    opener: EnvelopeOpener,
    shutdown: CancellationToken,
) -> (SocketAddr, JoinHandle<std::io::Result<()>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(api::serve(
        listener,
        ApiState::new(service, opener),
        shutdown,
    ));
    (addr, handle)
}

#[tokio::test]
async fn test_agent_reports_to_collector() {
    let service = memory_service();
    let server_shutdown = CancellationToken::new();
    let (addr, server) = spawn_collector(
        service.clone(),
        EnvelopeOpener::new(Some(SECRET.to_string()), None),
        server_shutdown.clone(),
    )
    .await;

    let config = fast_agent_config(addr, Some(SECRET));
    let sender = HttpSender::new(&config.address, Envelope::new(config.key.clone(), None)).unwrap();
    let agent = Agent::new(&config, FixedSampler, Arc::new(sender))
        .with_retry(RetryPolicy::new(1, vec![Duration::ZERO]));

    let agent_shutdown = CancellationToken::new();
    let run = tokio::spawn(agent.run(agent_shutdown.clone()));

    tokio::time::sleep(Duration::from_millis(400)).await;
    agent_shutdown.cancel();
    run.await.unwrap().unwrap();

    server_shutdown.cancel();
    server.await.unwrap().unwrap();

    let alloc = service
        .get_metric(&MetricKey::new(MetricKind::Gauge, "Alloc"))
        .await
        .unwrap();
    assert_eq!(alloc, Metric::gauge("Alloc", 1.5));

    let polls = service
        .get_metric(&MetricKey::new(MetricKind::Counter, "PollCount"))
        .await
        .unwrap();
    assert!(matches!(polls.value, MetricValue::Counter(n) if n > 0));
}

#[tokio::test]
async fn test_wrong_secret_is_rejected() {
    let service = memory_service();
    let server_shutdown = CancellationToken::new();
    let (addr, server) = spawn_collector(
        service.clone(),
        EnvelopeOpener::new(Some(SECRET.to_string()), None),
        server_shutdown.clone(),
    )
    .await;

    let mut config = fast_agent_config(addr, Some("not-the-secret"));
    config.cancel_on_send_failure = true;
    let sender = HttpSender::new(&config.address, Envelope::new(config.key.clone(), None)).unwrap();
    let agent = Agent::new(&config, FixedSampler, Arc::new(sender))
        .with_retry(RetryPolicy::new(1, vec![Duration::ZERO]));

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        agent.run(CancellationToken::new()),
    )
    .await
    .expect("pipeline should abort on its own");
    assert!(result.is_err());

    server_shutdown.cancel();
    server.await.unwrap().unwrap();

    assert!(service.list_all().await.unwrap().is_empty());
}
