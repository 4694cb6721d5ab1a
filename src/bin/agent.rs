use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use metrics_relay::{
    agent::{Agent, sampler::SystemSampler},
    config::{AgentArgs, AgentConfig},
    transport::{
        MetricSender,
        envelope::{Envelope, load_public_key},
        http::HttpSender,
    },
    util::{cancel_on_signal, init_tracing},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

fn build_sender(config: &AgentConfig) -> anyhow::Result<Arc<dyn MetricSender>> {
    if config.use_grpc {
        #[cfg(feature = "grpc")]
        {
            use metrics_relay::transport::grpc::GrpcSender;

            info!("reporting to {} over gRPC", config.address);
            return Ok(Arc::new(GrpcSender::connect_lazy(&config.address)?));
        }

        #[cfg(not(feature = "grpc"))]
        anyhow::bail!("gRPC transport requested but this build lacks the `grpc` feature");
    }

    let public_key = config
        .crypto_key
        .as_ref()
        .map(load_public_key)
        .transpose()
        .context("failed to load public key")?;
    let envelope = Envelope::new(config.key.clone(), public_key);
    let sender = HttpSender::new(&config.address, envelope)?;

    info!("reporting to {}", sender.endpoint());
    Ok(Arc::new(sender))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let config = AgentConfig::resolve(AgentArgs::parse())?;
    init_tracing("relay_agent", &config.log_level)?;
    info!(
        "polling every {:?}, reporting every {:?} with {} workers",
        config.poll_interval, config.report_interval, config.rate_limit
    );

    let sender = build_sender(&config)?;
    let agent = Agent::new(&config, SystemSampler::new(), sender);

    let shutdown = CancellationToken::new();
    let signals = tokio::spawn(cancel_on_signal(shutdown.clone()));

    let result = agent.run(shutdown.clone()).await;
    shutdown.cancel();
    if let Err(e) = signals.await? {
        error!("signal handler failed: {e}");
    }

    result
}
