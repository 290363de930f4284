use kameo::Actor;
use kameo::message::{Context, Message};
use kameo::actor::ActorRef;
use kameo::error::{Infallible, SendError};
use std::sync::Arc;

use super::dlq::{AddToDlq, DlqActor};
use super::health_monitor::{HealthMonitorActor, UpdateHealth};
use crate::actors::core::HealthStatus;
use crate::outbox::{ReconciliationSweeper, SweepReport};
use crate::store::StoreError;

// ============================================================================
// Sweeper Actor - runs reconciliation passes on a timer
// ============================================================================
//
// Passes run inside the actor, so two sweeps never overlap. Dead letters go
// to the DLQ actor; divergence and dead letters degrade the sweeper's
// reported health until a clean pass.
//
// ============================================================================

pub struct SweeperActor {
    sweeper: Arc<ReconciliationSweeper>,
    dlq: Option<ActorRef<DlqActor>>,
    health: Option<ActorRef<HealthMonitorActor>>,
}

impl SweeperActor {
    pub fn new(sweeper: Arc<ReconciliationSweeper>) -> Self {
        Self {
            sweeper,
            dlq: None,
            health: None,
        }
    }

    pub fn alerting(mut self, dlq: ActorRef<DlqActor>) -> Self {
        self.dlq = Some(dlq);
        self
    }

    pub fn reporting_to(mut self, health: ActorRef<HealthMonitorActor>) -> Self {
        self.health = Some(health);
        self
    }

    async fn report_health(&self, result: &Result<SweepReport, StoreError>) {
        let Some(health) = &self.health else {
            return;
        };

        let status = match result {
            Err(e) => HealthStatus::Unhealthy(format!("sweep failed: {e}")),
            Ok(report) if !report.divergences.is_empty() => HealthStatus::Degraded(format!(
                "{} store/ledger divergences",
                report.divergences.len()
            )),
            Ok(report) if !report.dead_lettered.is_empty() => HealthStatus::Degraded(format!(
                "{} entries dead-lettered",
                report.dead_lettered.len()
            )),
            Ok(_) => HealthStatus::Healthy,
        };

        let _ = health
            .tell(UpdateHealth {
                component: "sweeper".to_string(),
                status,
                details: None,
            })
            .send()
            .await;
    }
}

impl Actor for SweeperActor {
    type Args = Self;
    type Error = Infallible;

    async fn on_start(state: Self::Args, actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        let interval = state.sweeper.config().interval;
        tracing::info!(interval_secs = interval.as_secs(), "🧹 SweeperActor started");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !actor_ref.is_alive() {
                    break;
                }
                // ask, not tell: a failed pass must not stop the actor
                match actor_ref.ask(Sweep).await {
                    Ok(_) => {}
                    Err(SendError::HandlerError(e)) => {
                        tracing::error!(error = %e, "Reconciliation sweep failed");
                    }
                    Err(_) => break,
                }
            }
        });

        Ok(state)
    }
}

// ============================================================================
// Messages
// ============================================================================

/// Run one reconciliation pass now
#[derive(Debug)]
pub struct Sweep;

impl Message<Sweep> for SweeperActor {
    type Reply = Result<SweepReport, StoreError>;

    async fn handle(&mut self, _msg: Sweep, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        let result = self.sweeper.sweep_once().await;

        if let (Ok(report), Some(dlq)) = (&result, &self.dlq) {
            if !report.dead_lettered.is_empty() {
                let _ = dlq
                    .tell(AddToDlq {
                        entries: report.dead_lettered.clone(),
                    })
                    .send()
                    .await;
            }
        }

        self.report_health(&result).await;
        result
    }
}
