use crate::app_config::AppConfig;
use crate::handler::LoggingMessageHandler;
use anyhow::Context;
use kafka_worker::auth::{CredentialRefresher, HttpCredentialProvider, TokenStore};
use kafka_worker::consumer::KafkaBrokerClientFactory;
use kafka_worker::consumption::ConsumptionLoop;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub async fn run_until_stopped(config: AppConfig) -> Result<(), anyhow::Error> {
    let settings = config.consumer_settings().context("While reading kafka settings")?;
    let auth = config.auth_endpoint().context("While reading auth settings")?;
    let lead_time = config.lead_time().context("While reading refresh settings")?;
    let loop_settings = config
        .consumption_loop_settings()
        .context("While reading consumption settings")?;

    let http_client = reqwest::Client::builder()
        .build()
        .context("While building http client")?;

    let refresher = CredentialRefresher::new(
        Arc::new(HttpCredentialProvider::new(http_client)),
        TokenStore::new(),
        auth,
        config.refresh.retry.to_policy(),
        lead_time,
        Handle::current(),
    );

    let consumption = ConsumptionLoop::new(
        Arc::new(settings),
        loop_settings,
        Arc::new(KafkaBrokerClientFactory),
        refresher,
        Arc::new(LoggingMessageHandler),
    );

    let cancellation_token = CancellationToken::new();
    tokio::spawn(cancel_on_shutdown_signal(cancellation_token.clone()));

    info!(topic = %config.kafka.topic, "Starting consumption");
    let counters = consumption
        .run(cancellation_token)
        .await
        .context("While consuming messages")?;

    info!(?counters, "Stopped");

    Ok(())
}

async fn cancel_on_shutdown_signal(cancellation_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Could not listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Could not listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = cancellation_token.cancelled() => return,
    }

    info!("Shutdown signal received, stopping consumption");
    cancellation_token.cancel();
}
