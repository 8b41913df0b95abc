//! Club Billing service
//!
//! Serves the HTTP surface and runs the periodic host billing evaluation:
//! - Membership joins, checkouts and payment enforcement
//! - Payment gateway webhooks
//! - `evaluateAllClubBilling` on `billing.evaluation_cron` (default 03:00 UTC daily)

use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use club_billing::adapters::http::{app, BillingAppState};
use club_billing::adapters::{
    HttpAnalyticsSink, InMemoryDocumentStore, NoopAnalyticsSink, PostgresDocumentStore,
    StripeGateway,
};
use club_billing::application::{
    EvaluateAllClubBillingCommand, EvaluateAllClubBillingHandler, EvaluationSummary,
};
use club_billing::config::{AppConfig, DatabaseConfig, StoreBackend};
use club_billing::ports::{AnalyticsSink, DocumentStore, PaymentGateway};

/// Build the document store selected by configuration
async fn create_store(config: &DatabaseConfig) -> anyhow::Result<Arc<dyn DocumentStore>> {
    match config.backend {
        StoreBackend::Memory => {
            info!("Using in-memory document store; state is not persisted");
            Ok(Arc::new(InMemoryDocumentStore::new()))
        }
        StoreBackend::Postgres => {
            let pool = PgPoolOptions::new()
                .min_connections(config.min_connections)
                .max_connections(config.max_connections)
                .acquire_timeout(config.acquire_timeout())
                .idle_timeout(config.idle_timeout())
                .max_lifetime(config.max_lifetime())
                .connect(&config.url)
                .await
                .context("connecting to PostgreSQL")?;
            info!("Database pool created");

            let store = PostgresDocumentStore::new(pool);
            if config.run_migrations {
                store.migrate().await.context("running migrations")?;
                info!("Migrations applied");
            }
            Ok(Arc::new(store))
        }
    }
}

/// Log results of one evaluation pass
fn log_summary(summary: &EvaluationSummary) {
    info!(
        clubs = summary.clubs_evaluated,
        upgrades_scheduled = summary.upgrades_scheduled,
        downgrades_scheduled = summary.downgrades_scheduled,
        upgrades_executed = summary.upgrades_executed,
        downgrades_executed = summary.downgrades_executed,
        failures = summary.failures.len(),
        "Billing evaluation cycle complete"
    );
    for failure in &summary.failures {
        error!(club_id = %failure.club_id, error = %failure.message, "Club evaluation failed");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("loading configuration")?;
    config.logging.init();
    config.validate().context("validating configuration")?;

    info!(environment = ?config.server.environment, "Starting club billing service");

    let store = create_store(&config.database).await?;
    let gateway: Arc<dyn PaymentGateway> =
        Arc::new(StripeGateway::new(config.payment.stripe_config()));
    let sink: Arc<dyn AnalyticsSink> = match config.analytics.sink_config() {
        Some(sink_config) => Arc::new(HttpAnalyticsSink::new(sink_config)),
        None => {
            info!("Analytics mirroring disabled");
            Arc::new(NoopAnalyticsSink)
        }
    };
    let settings = Arc::new(config.billing_settings());

    // Scheduled evaluation
    let scheduler = JobScheduler::new().await?;
    let evaluator = Arc::new(EvaluateAllClubBillingHandler::new(
        store.clone(),
        gateway.clone(),
        settings.clone(),
    ));
    scheduler
        .add(Job::new_async(
            config.billing.evaluation_cron.as_str(),
            move |_uuid, _l| {
                let evaluator = evaluator.clone();
                Box::pin(async move {
                    info!("Running scheduled club billing evaluation");
                    match evaluator.handle(EvaluateAllClubBillingCommand::now()).await {
                        Ok(summary) => log_summary(&summary),
                        Err(e) => error!(error = %e, "Club billing evaluation aborted"),
                    }
                })
            },
        )?)
        .await?;
    scheduler.start().await?;
    info!(cron = %config.billing.evaluation_cron, "Scheduled: club billing evaluation");

    // HTTP surface
    let state = BillingAppState {
        store,
        gateway,
        sink,
        settings,
    };
    let router = app(state, config.server.request_timeout());
    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await?;

    info!("Shutting down");
    Ok(())
}
