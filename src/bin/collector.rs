use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use metrics_relay::{
    api::{self, ApiState},
    collector::{MetricService, spawn_checkpointer},
    config::{CollectorArgs, CollectorConfig, StorageConfig},
    storage::open_backend,
    transport::envelope::{EnvelopeOpener, load_private_key},
    util::{cancel_on_signal, init_tracing},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let config = CollectorConfig::resolve(CollectorArgs::parse())?;
    init_tracing("relay_collector", &config.log_level)?;

    #[cfg(not(feature = "grpc"))]
    {
        if config.use_grpc {
            anyhow::bail!("gRPC server requested but this build lacks the `grpc` feature");
        }
    }

    let private_key = config
        .crypto_key
        .as_ref()
        .map(load_private_key)
        .transpose()
        .context("failed to load private key")?;
    let opener = EnvelopeOpener::new(config.key.clone(), private_key);

    let storage = open_backend(&config.storage)
        .await
        .context("failed to open storage")?;
    let service = Arc::new(MetricService::new(
        storage,
        config.storage.checkpoint_path().map(Path::to_path_buf),
    ));

    if config.restore {
        service
            .restore()
            .await
            .context("failed to restore checkpoint")?;
    }

    let shutdown = CancellationToken::new();
    let signals = tokio::spawn(cancel_on_signal(shutdown.clone()));

    let checkpointer = match &config.storage {
        StorageConfig::File { store_interval, .. } if *store_interval > 0 => Some(
            spawn_checkpointer(
                service.clone(),
                Duration::from_secs(*store_interval),
                shutdown.clone(),
            ),
        ),
        _ => None,
    };

    #[cfg(feature = "grpc")]
    let rpc = config.use_grpc.then(|| {
        tokio::spawn(metrics_relay::transport::grpc::serve(
            config.grpc_address,
            service.clone(),
            shutdown.clone(),
        ))
    });

    let listener = TcpListener::bind(config.address)
        .await
        .with_context(|| format!("failed to bind {}", config.address))?;
    let served = api::serve(
        listener,
        ApiState::new(service.clone(), opener),
        shutdown.clone(),
    )
    .await;
    shutdown.cancel();
    info!("shutting down");

    if let Some(handle) = checkpointer {
        handle.await?;
    }

    #[cfg(feature = "grpc")]
    {
        if let Some(handle) = rpc {
            if let Err(e) = handle.await? {
                error!("gRPC server failed: {e}");
            }
        }
    }

    service
        .shutdown()
        .await
        .context("failed to write final checkpoint")?;

    if let Err(e) = signals.await? {
        error!("signal handler failed: {e}");
    }

    served.context("HTTP server failed")
}
