use kameo::Actor;
use kameo::message::{Context, Message};
use kameo::actor::ActorRef;
use kameo::error::Infallible;
use kameo::reply::{Reply, ReplyError};
use std::sync::Arc;

use super::health_monitor::{HealthMonitorActor, UpdateHealth};
use crate::actors::core::{ComponentHealth, HealthCheckable, HealthStatus};
use crate::outbox::{OutboxPublisher, PublishReport};
use crate::store::StoreError;

// ============================================================================
// Publisher Actor - owns the outbox polling workers
// ============================================================================
//
// Spawns `workers` polling loops over one shared `OutboxPublisher`. The
// ledger claim keeps the workers from ever getting the same entry. Each
// loop reports its outcome back here; the actor keeps the counters and
// feeds the health monitor.
//
// ============================================================================

pub struct PublisherActor {
    publisher: Arc<OutboxPublisher>,
    workers: usize,
    health: Option<ActorRef<HealthMonitorActor>>,
    stats: PublisherStats,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublisherStats {
    pub polls: u64,
    pub delivered: u64,
    pub failed: u64,
    pub released: u64,
    pub consecutive_ledger_errors: u32,
}

impl Reply for PublisherStats {
    type Ok = Self;
    type Error = Infallible;
    type Value = Self;

    fn to_result(self) -> Result<Self, Infallible> {
        Ok(self)
    }

    fn into_any_err(self) -> Option<Box<dyn ReplyError>> {
        None
    }

    fn into_value(self) -> Self::Value {
        self
    }
}

impl PublisherActor {
    pub fn new(publisher: Arc<OutboxPublisher>, workers: usize) -> Self {
        Self {
            publisher,
            workers: workers.max(1),
            health: None,
            stats: PublisherStats::default(),
        }
    }

    pub fn reporting_to(mut self, health: ActorRef<HealthMonitorActor>) -> Self {
        self.health = Some(health);
        self
    }

    fn record(&mut self, outcome: &Result<PublishReport, String>) {
        self.stats.polls += 1;
        match outcome {
            Ok(report) => {
                self.stats.delivered += report.delivered as u64;
                self.stats.failed += report.failed as u64;
                self.stats.released += report.released as u64;
                self.stats.consecutive_ledger_errors = 0;
            }
            Err(_) => self.stats.consecutive_ledger_errors += 1,
        }
    }

    async fn report_health(&self) {
        if let Some(health) = &self.health {
            let _ = health.tell(UpdateHealth::from(self.check_health())).send().await;
        }
    }
}

impl HealthCheckable for PublisherActor {
    fn check_health(&self) -> ComponentHealth {
        let status = match self.stats.consecutive_ledger_errors {
            0 => HealthStatus::Healthy,
            1..=2 => HealthStatus::Degraded("ledger errors while polling".to_string()),
            n => HealthStatus::Unhealthy(format!("{n} consecutive ledger errors")),
        };
        ComponentHealth::new(self.component_name(), status).with_details(format!(
            "delivered={} failed={}",
            self.stats.delivered, self.stats.failed
        ))
    }

    fn component_name(&self) -> &str {
        "publisher"
    }
}

impl Actor for PublisherActor {
    type Args = Self;
    type Error = Infallible;

    async fn on_start(state: Self::Args, actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        tracing::info!(workers = state.workers, "📤 PublisherActor started");

        for worker in 0..state.workers {
            let publisher = state.publisher.clone();
            let actor_ref = actor_ref.clone();
            tokio::spawn(async move {
                poll_loop(worker, publisher, actor_ref).await;
            });
        }

        Ok(state)
    }
}

async fn poll_loop(worker: usize, publisher: Arc<OutboxPublisher>, actor_ref: ActorRef<PublisherActor>) {
    let poll_interval = publisher.config().poll_interval;
    let batch_size = publisher.config().batch_size;

    while actor_ref.is_alive() {
        let outcome = publisher.run_once().await.map_err(|e| e.to_string());
        let full_batch = filled_batch(&outcome, batch_size);

        if let Err(e) = &outcome {
            tracing::error!(worker, error = %e, "Publisher poll failed");
        }

        if actor_ref.tell(PollCompleted { outcome }).send().await.is_err() {
            break;
        }

        if !full_batch {
            tokio::time::sleep(poll_interval).await;
        }
    }

    tracing::debug!(worker, "Publisher worker stopped");
}

/// A full batch means more is probably waiting
fn filled_batch(outcome: &Result<PublishReport, String>, batch_size: usize) -> bool {
    matches!(outcome, Ok(report) if report.claimed > 0 && report.claimed >= batch_size)
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug)]
struct PollCompleted {
    outcome: Result<PublishReport, String>,
}

/// Run one poll right away, outside the worker schedule
#[derive(Debug)]
pub struct PublishNow;

#[derive(Debug)]
pub struct GetPublisherStats;

// ============================================================================
// Handlers
// ============================================================================

impl Message<PollCompleted> for PublisherActor {
    type Reply = ();

    async fn handle(&mut self, msg: PollCompleted, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        let was_healthy = self.stats.consecutive_ledger_errors == 0;
        self.record(&msg.outcome);

        let changed = was_healthy != (self.stats.consecutive_ledger_errors == 0);
        let worked = matches!(&msg.outcome, Ok(report) if report.claimed > 0);
        if changed || worked || msg.outcome.is_err() {
            self.report_health().await;
        }
    }
}

impl Message<PublishNow> for PublisherActor {
    type Reply = Result<PublishReport, StoreError>;

    async fn handle(&mut self, _msg: PublishNow, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        let result = self.publisher.run_once().await;
        self.record(&result.as_ref().map(|r| *r).map_err(|e| e.to_string()));
        self.report_health().await;
        result
    }
}

impl Message<GetPublisherStats> for PublisherActor {
    type Reply = PublisherStats;

    async fn handle(&mut self, _msg: GetPublisherStats, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claimed(n: usize) -> Result<PublishReport, String> {
        Ok(PublishReport {
            claimed: n,
            ..Default::default()
        })
    }

    #[test]
    fn test_only_a_non_empty_full_batch_skips_the_sleep() {
        assert!(filled_batch(&claimed(10), 10));
        assert!(!filled_batch(&claimed(3), 10));
        assert!(!filled_batch(&claimed(0), 0));
        assert!(!filled_batch(&Err("ledger down".to_string()), 10));
    }
}
