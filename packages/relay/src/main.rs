use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use common::provider::http::{HttpEmailProvider, WebhookProvider};
use common::provider::{DeliveryProvider, Providers};
use tracing::info;

use relay::config::{AppConfig, ProviderConfig};
use relay::database;
use relay::supervisor::Supervisor;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let config = AppConfig::load().context("Failed to load config")?;

    let db = database::init_db(&config.database.url)
        .await
        .context("Failed to initialize database")?;

    let providers =
        build_providers(&config.provider).context("Failed to build delivery providers")?;

    info!(
        operator = %config.alerts.operator_email,
        poll_interval_secs = config.pipeline.poll_interval_secs,
        failover = config.provider.webhook_url.is_some(),
        "Notification relay starting"
    );

    let supervisor = Supervisor::start(db, providers, &config);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    supervisor.shutdown().await;

    Ok(())
}

fn build_providers(config: &ProviderConfig) -> anyhow::Result<Providers> {
    let timeout = Duration::from_secs(config.request_timeout_secs);

    let primary = Arc::new(HttpEmailProvider::new(
        config.email_endpoint.clone(),
        config.email_api_key.clone(),
        timeout,
    )?);

    let fallback = match &config.webhook_url {
        Some(url) => {
            Some(Arc::new(WebhookProvider::new(url.clone(), timeout)?)
                as Arc<dyn DeliveryProvider>)
        }
        None => None,
    };

    Ok(Providers { primary, fallback })
}
