use kameo::prelude::*;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use restaurant_orders::actors::{
    CoordinatorActor, GetDlqStats, GetPublisherStats, GetSystemHealth, PipelineParts, Shutdown,
};
use restaurant_orders::config::{AppConfig, BrokerBackend, StorageBackend};
use restaurant_orders::domain::order::{LineItem, OrderService, OrderStatus};
use restaurant_orders::messaging::{EventBus, InMemoryBroker, RedpandaClient};
use restaurant_orders::metrics::Metrics;
use restaurant_orders::outbox::{OutboxPublisher, ReconciliationSweeper};
use restaurant_orders::store::{InMemoryStore, OrderStore, OutboxLedger, PgStore};
use restaurant_orders::utils::{retry_with_backoff, RetryConfig, RetryResult};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with environment-based filtering
    // Default to INFO level, can be overridden with RUST_LOG env var
    // Example: RUST_LOG=debug cargo run
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,restaurant_orders=debug")),
        )
        .init();

    tracing::info!("🚀 Starting restaurant order pipeline (transactional outbox)");

    let config = AppConfig::from_env_or_default();
    tracing::debug!(?config, "Configuration loaded");

    // === 1. Prometheus metrics ===
    let metrics = Arc::new(Metrics::new()?);
    tracing::info!("📊 Metrics registry created with {} metrics", metrics.registry().gather().len());

    // === 2. Order store + outbox ledger ===
    let (store, ledger) = open_store(&config.storage).await?;

    // === 3. Event bus ===
    let bus: Arc<dyn EventBus> = match &config.broker {
        BrokerBackend::Kafka { brokers } => {
            tracing::info!(brokers = %brokers, "Connecting to Kafka/Redpanda");
            Arc::new(RedpandaClient::new(brokers, config.publisher.ack_timeout)?)
        }
        BrokerBackend::Memory => {
            tracing::warn!("Using the in-memory broker; events stay in this process");
            Arc::new(InMemoryBroker::new())
        }
    };

    // === 4. Pipeline components ===
    let service = OrderService::new(store).with_metrics(metrics.clone());
    let publisher = Arc::new(
        OutboxPublisher::new(ledger.clone(), bus.clone(), config.publisher.clone())
            .with_metrics(metrics.clone()),
    );
    let sweeper = Arc::new(
        ReconciliationSweeper::new(ledger.clone(), config.sweeper.clone()).with_metrics(metrics.clone()),
    );

    // === 5. Coordinator and its supervised actors ===
    tracing::info!("Starting coordinator actor");
    let coordinator = CoordinatorActor::spawn(PipelineParts {
        ledger,
        bus,
        publisher,
        sweeper,
        metrics: Some(metrics.clone()),
        publisher_workers: config.publisher_workers,
        health_check_interval: config.health_check_interval,
    });

    if config.demo {
        if let Err(e) = run_demo(&service).await {
            tracing::error!(error = %e, "Demo order failed");
        }
        tokio::time::sleep(config.publisher.poll_interval * 4).await;

        if let Ok(stats) = coordinator.ask(GetPublisherStats).await {
            tracing::info!(delivered = stats.delivered, failed = stats.failed, "📤 Publisher stats after demo");
        }
    }

    tracing::info!("✅ Pipeline running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    if let (Ok(health), Ok(dlq)) = (
        coordinator.ask(GetSystemHealth).await,
        coordinator.ask(GetDlqStats).await,
    ) {
        tracing::info!(
            status = ?health.overall_status,
            dead_letters = dlq.total_messages,
            "Final pipeline state"
        );
    }

    coordinator
        .ask(Shutdown)
        .await
        .map_err(|e| anyhow::anyhow!("coordinator did not shut down cleanly: {e:?}"))?;
    Ok(())
}

async fn open_store(
    storage: &StorageBackend,
) -> anyhow::Result<(Arc<dyn OrderStore>, Arc<dyn OutboxLedger>)> {
    match storage {
        StorageBackend::Postgres { database_url, max_connections } => {
            tracing::info!("Connecting to PostgreSQL...");
            let store = match retry_with_backoff(RetryConfig::startup(), |_| {
                PgStore::connect(database_url, *max_connections)
            })
            .await
            {
                RetryResult::Success(store) => store,
                RetryResult::Failed(e) => return Err(e.into()),
            };
            store.migrate().await?;
            tracing::info!("✅ PostgreSQL schema ready");

            let store = Arc::new(store);
            Ok((store.clone(), store))
        }
        StorageBackend::Memory => {
            tracing::warn!("Using the in-memory store; nothing survives a restart");
            let store = Arc::new(InMemoryStore::new());
            Ok((store.clone(), store))
        }
    }
}

/// Walks one order from placement to collection
async fn run_demo(service: &OrderService) -> anyhow::Result<()> {
    tracing::info!("📝 Demonstrating order lifecycle with outbox pattern");

    let order = service
        .place_order(
            "table-12",
            vec![
                LineItem::new("margherita", 2, Decimal::new(1150, 2)),
                LineItem::new("tiramisu", 1, Decimal::new(650, 2)),
            ],
        )
        .await?;
    tracing::info!(order_id = %order.id, total = %order.total(), "✅ Order placed");

    let mut version = order.version;
    for target in [
        OrderStatus::Accepted,
        OrderStatus::InPreparation,
        OrderStatus::Ready,
        OrderStatus::Completed,
    ] {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let updated = service.transition(order.id, target, version).await?;
        version = updated.version;
        tracing::info!(order_id = %order.id, status = target.as_str(), "✅ Order moved");
    }

    tracing::info!("🎉 Demo order complete, events are on their way through the outbox");
    Ok(())
}
