use kameo::prelude::*;
use kameo::Actor;
use kameo::message::{Context, Message};
use kameo::actor::ActorRef;
use kameo::error::{Infallible, SendError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use chrono::Utc;

use super::dlq::{DlqActor, DlqStats, GetDlqMessages, GetDlqStats, ReplayDeadLetter};
use super::health_monitor::{GetSystemHealth, HealthMonitorActor, SystemHealth, UpdateHealth};
use super::publisher::{GetPublisherStats, PublishNow, PublisherActor, PublisherStats};
use super::sweeper::{Sweep, SweeperActor};
use crate::actors::core::HealthStatus;
use crate::messaging::EventBus;
use crate::metrics::Metrics;
use crate::outbox::{OutboxEntry, OutboxPublisher, PublishReport, ReconciliationSweeper, SweepReport};
use crate::store::{OutboxLedger, StoreError};

// ============================================================================
// Coordinator Actor - Orchestrates all pipeline actors
// ============================================================================
//
// Responsibilities:
// - Starts the child actors and wires them together
// - Logs system health periodically
// - Single entry point for operator requests
// - Coordinates graceful shutdown
//
// Actor Hierarchy:
//   CoordinatorActor (Supervisor)
//   ├── HealthMonitorActor
//   ├── DlqActor
//   ├── PublisherActor  (N polling workers)
//   └── SweeperActor
//
// ============================================================================

/// Everything the coordinator needs to start the pipeline
pub struct PipelineParts {
    pub ledger: Arc<dyn OutboxLedger>,
    pub bus: Arc<dyn EventBus>,
    pub publisher: Arc<OutboxPublisher>,
    pub sweeper: Arc<ReconciliationSweeper>,
    pub metrics: Option<Arc<Metrics>>,
    pub publisher_workers: usize,
    pub health_check_interval: Duration,
}

struct Children {
    health_monitor: ActorRef<HealthMonitorActor>,
    dlq: ActorRef<DlqActor>,
    publisher: ActorRef<PublisherActor>,
    sweeper: ActorRef<SweeperActor>,
}

pub struct CoordinatorActor {
    children: Children,
}

impl CoordinatorActor {
    fn start_child_actors(parts: PipelineParts) -> Children {
        tracing::info!("Starting supervised child actors");

        let mut monitor = HealthMonitorActor::new(parts.health_check_interval)
            .watching_bus(parts.bus.clone());
        if let Some(metrics) = &parts.metrics {
            monitor = monitor.with_metrics(metrics.clone());
        }
        let health_monitor = HealthMonitorActor::spawn(monitor);

        let dlq = DlqActor::spawn(DlqActor::new(parts.ledger.clone()));

        let publisher = PublisherActor::spawn(
            PublisherActor::new(parts.publisher, parts.publisher_workers)
                .reporting_to(health_monitor.clone()),
        );

        let sweeper = SweeperActor::spawn(
            SweeperActor::new(parts.sweeper)
                .alerting(dlq.clone())
                .reporting_to(health_monitor.clone()),
        );

        tracing::info!("✅ All supervised actors started successfully");

        Children {
            health_monitor,
            dlq,
            publisher,
            sweeper,
        }
    }
}

impl Actor for CoordinatorActor {
    type Args = PipelineParts;
    type Error = Infallible;

    async fn on_start(parts: Self::Args, actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        tracing::info!("🎯 CoordinatorActor started - transactional outbox pipeline");

        let health_check_interval = parts.health_check_interval;
        let children = Self::start_child_actors(parts);

        let _ = children
            .health_monitor
            .tell(UpdateHealth {
                component: "dlq".to_string(),
                status: HealthStatus::Healthy,
                details: Some("DLQ actor started".to_string()),
            })
            .send()
            .await;

        // Schedule periodic health checks
        let health_monitor = children.health_monitor.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(health_check_interval * 3);
            loop {
                interval.tick().await;
                if !actor_ref.is_alive() {
                    break;
                }
                match health_monitor.ask(GetSystemHealth).await {
                    Ok(health) => match health.overall_status {
                        HealthStatus::Healthy => {
                            tracing::debug!("System health check: Healthy");
                        }
                        HealthStatus::Degraded(ref msg) => {
                            tracing::warn!("System health check: Degraded - {}", msg);
                        }
                        HealthStatus::Unhealthy(ref msg) => {
                            tracing::error!("System health check: Unhealthy - {}", msg);
                        }
                    },
                    Err(_) => {
                        tracing::error!("Failed to get system health");
                        break;
                    }
                }
            }
        });

        Ok(Self { children })
    }
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug)]
pub struct Shutdown;

fn unavailable<M, E>(actor: &str, err: SendError<M, E>) -> StoreError
where
    E: Into<StoreError>,
{
    match err {
        SendError::HandlerError(e) => e.into(),
        _ => StoreError::Unavailable(format!("{actor} actor is not running")),
    }
}

impl Message<Shutdown> for CoordinatorActor {
    type Reply = ();

    async fn handle(&mut self, _msg: Shutdown, ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        tracing::info!("🛑 Shutting down pipeline actors");

        // publisher first so nothing new is claimed while the rest stop
        let _ = self.children.publisher.stop_gracefully().await;
        let _ = self.children.sweeper.stop_gracefully().await;
        let _ = self.children.dlq.stop_gracefully().await;
        let _ = self.children.health_monitor.stop_gracefully().await;

        let _ = ctx.actor_ref().stop_gracefully().await;
        tracing::info!("👋 Pipeline stopped");
    }
}

impl Message<GetSystemHealth> for CoordinatorActor {
    type Reply = SystemHealth;

    async fn handle(&mut self, msg: GetSystemHealth, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        match self.children.health_monitor.ask(msg).await {
            Ok(health) => health,
            Err(_) => SystemHealth {
                overall_status: HealthStatus::Unhealthy("health monitor not running".to_string()),
                components: HashMap::new(),
                check_time: Utc::now(),
            },
        }
    }
}

impl Message<Sweep> for CoordinatorActor {
    type Reply = Result<SweepReport, StoreError>;

    async fn handle(&mut self, msg: Sweep, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.children
            .sweeper
            .ask(msg)
            .await
            .map_err(|e| unavailable("sweeper", e))
    }
}

impl Message<PublishNow> for CoordinatorActor {
    type Reply = Result<PublishReport, StoreError>;

    async fn handle(&mut self, msg: PublishNow, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.children
            .publisher
            .ask(msg)
            .await
            .map_err(|e| unavailable("publisher", e))
    }
}

impl Message<GetPublisherStats> for CoordinatorActor {
    type Reply = PublisherStats;

    async fn handle(&mut self, msg: GetPublisherStats, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.children.publisher.ask(msg).await.unwrap_or_default()
    }
}

impl Message<GetDlqMessages> for CoordinatorActor {
    type Reply = Result<Vec<OutboxEntry>, StoreError>;

    async fn handle(&mut self, msg: GetDlqMessages, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.children.dlq.ask(msg).await.map_err(|e| unavailable("dlq", e))
    }
}

impl Message<GetDlqStats> for CoordinatorActor {
    type Reply = DlqStats;

    async fn handle(&mut self, msg: GetDlqStats, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.children.dlq.ask(msg).await.unwrap_or_default()
    }
}

/// Operator replay, by entry id
impl Message<ReplayDeadLetter> for CoordinatorActor {
    type Reply = Result<bool, StoreError>;

    async fn handle(&mut self, msg: ReplayDeadLetter, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        tracing::info!(entry_id = %msg.entry_id, "Forwarding dead-letter replay");
        self.children.dlq.ask(msg).await.map_err(|e| unavailable("dlq", e))
    }
}
