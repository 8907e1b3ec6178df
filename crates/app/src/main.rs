mod catalog;
mod dispatcher;
mod feed;
mod flights;
mod maintenance;
mod operations;
mod problem;
mod router;
mod telemetry;
#[cfg(test)]
mod testing;

use std::{net::SocketAddr, sync::Arc};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use fis_core::types::Partner;
use fis_partners::{NotifierSet, PartnerClient};
use fis_storage::Database;
use fis_util::{load_env_file, AppConfig, PartnerConfig};

use crate::dispatcher::{DispatchSettings, OutboxDispatcher};
use crate::feed::FlightFeed;
use crate::maintenance::MaintenanceWorker;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    let database = Database::connect(&config.database_url).await?;
    database.run_migrations().await?;

    let clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync> = Arc::new(Utc::now);

    let notifiers = build_notifiers(&config.partners)?;
    if notifiers.is_empty() {
        warn!(stage = "app", "no partner endpoints configured; notifications stay local");
    }
    let partners: Vec<Partner> = notifiers.partners().collect();

    let (dispatcher, worker) = OutboxDispatcher::new(
        database.clone(),
        notifiers,
        clock.clone(),
        DispatchSettings::new(
            config.outbox.interval,
            config.outbox.max_attempts,
            config.partners.timeout,
        ),
    );
    worker.spawn();
    MaintenanceWorker::new(database.clone(), clock.clone(), config.outbox.retention).spawn();

    let state = router::AppState::new(
        metrics,
        database,
        partners,
        dispatcher,
        FlightFeed::new(),
        clock,
    );

    let addr: SocketAddr = config.bind_addr;
    info!(stage = "app", %addr, env = %config.environment.as_str(), "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router::app_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| err.into())
}

fn build_notifiers(config: &PartnerConfig) -> Result<NotifierSet, reqwest::Error> {
    let http = reqwest::Client::builder().timeout(config.timeout).build()?;
    let endpoints = [
        (Partner::PassengerMessaging, &config.passenger_messaging_url),
        (Partner::BaggageHandling, &config.baggage_handling_url),
    ];

    let mut notifiers = NotifierSet::new();
    for (partner, url) in endpoints {
        let Some(url) = url else {
            continue;
        };
        let mut client = PartnerClient::new(partner, url.clone(), http.clone());
        if let Some(secret) = &config.signing_secret {
            client = client.with_signing_secret(secret.as_bytes());
        }
        info!(stage = "partners", partner = partner.as_str(), %url, "partner endpoint configured");
        notifiers = notifiers.with(Arc::new(client));
    }
    Ok(notifiers)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(stage = "app", error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!(stage = "app", "shutdown signal received");
}
