//! Process glue shared by the binaries

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

const LIB_TARGET: &str = "metrics_relay";

fn parse_level(level: &str) -> anyhow::Result<LevelFilter> {
    level
        .parse::<LevelFilter>()
        .with_context(|| format!("invalid log level {level:?}"))
}

/// Install the stderr subscriber for the library and `binary` targets
pub fn init_tracing(binary: &'static str, level: &str) -> anyhow::Result<()> {
    let level = parse_level(level)?;
    let filter = filter::Targets::new().with_targets(vec![(LIB_TARGET, level), (binary, level)]);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .try_init()
        .context("failed to install tracing subscriber")
}

/// Cancel `token` on SIGINT, SIGTERM or SIGQUIT
pub async fn cancel_on_signal(token: CancellationToken) -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut terminate = signal(SignalKind::terminate())?;
        let mut quit = signal(SignalKind::quit())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = terminate.recv() => {}
            _ = quit.recv() => {}
            _ = token.cancelled() => return Ok(()),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = token.cancelled() => return Ok(()),
        }
    }

    info!("shutdown signal received");
    token.cancel();
    Ok(())
}
