use kameo::Actor;
use kameo::message::{Context, Message};
use kameo::actor::ActorRef;
use kameo::error::Infallible;
use kameo::reply::{Reply, ReplyError};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::outbox::OutboxEntry;
use crate::store::{OutboxLedger, StoreError};

// ============================================================================
// Dead Letter Queue Actor
// ============================================================================
//
// Dead-lettered entries stay in the ledger; this actor is the operator's
// window onto them:
// - alerts when the sweeper gives up on an entry
// - lists dead letters for manual intervention
// - replays a dead letter once its cause is fixed
// - keeps counts of what has been dead-lettered since start-up
//
// ============================================================================

pub struct DlqActor {
    ledger: Arc<dyn OutboxLedger>,
    total_alerts: i64,
    by_event_type: HashMap<String, i64>,
}

impl DlqActor {
    pub fn new(ledger: Arc<dyn OutboxLedger>) -> Self {
        Self {
            ledger,
            total_alerts: 0,
            by_event_type: HashMap::new(),
        }
    }
}

impl Actor for DlqActor {
    type Args = Self;
    type Error = Infallible;

    async fn on_start(state: Self::Args, _actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        tracing::info!("DlqActor started - Dead Letter Queue ready");
        Ok(state)
    }
}

// ============================================================================
// Messages
// ============================================================================

/// Entries the sweeper just dead-lettered
#[derive(Debug, Clone)]
pub struct AddToDlq {
    pub entries: Vec<OutboxEntry>,
}

#[derive(Debug)]
pub struct GetDlqMessages {
    pub limit: usize,
}

#[derive(Debug)]
pub struct GetDlqStats;

/// Operator replay of one dead letter
#[derive(Debug)]
pub struct ReplayDeadLetter {
    pub entry_id: Uuid,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DlqStats {
    /// Dead letters still in the ledger
    pub total_messages: i64,
    /// Alerts raised since start-up, by event type
    pub by_event_type: HashMap<String, i64>,
    pub alerts_since_start: i64,
}

impl Reply for DlqStats {
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

// ============================================================================
// Handlers
// ============================================================================

impl Message<AddToDlq> for DlqActor {
    type Reply = ();

    async fn handle(&mut self, msg: AddToDlq, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        for entry in msg.entries {
            tracing::error!(
                event_id = %entry.id,
                event_type = %entry.event_type,
                aggregate_id = %entry.aggregate_id,
                error = entry.last_error.as_deref().unwrap_or_default(),
                failure_count = entry.attempts,
                "💀 Outbox entry moved to Dead Letter Queue, operator action required"
            );

            self.total_alerts += 1;
            *self.by_event_type.entry(entry.event_type).or_default() += 1;
        }
    }
}

impl Message<GetDlqMessages> for DlqActor {
    type Reply = Result<Vec<OutboxEntry>, StoreError>;

    async fn handle(&mut self, msg: GetDlqMessages, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.ledger.dead_letters(msg.limit).await
    }
}

impl Message<GetDlqStats> for DlqActor {
    type Reply = DlqStats;

    async fn handle(&mut self, _msg: GetDlqStats, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        let total_messages = match self.ledger.status_counts().await {
            Ok(counts) => counts
                .get(&crate::outbox::DeliveryStatus::DeadLettered)
                .copied()
                .unwrap_or(0),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to count dead letters");
                0
            }
        };

        DlqStats {
            total_messages,
            by_event_type: self.by_event_type.clone(),
            alerts_since_start: self.total_alerts,
        }
    }
}

impl Message<ReplayDeadLetter> for DlqActor {
    type Reply = Result<bool, StoreError>;

    async fn handle(&mut self, msg: ReplayDeadLetter, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        let replayed = self.ledger.requeue_dead_letter(msg.entry_id).await?;
        if replayed {
            tracing::info!(entry_id = %msg.entry_id, "♻️ Dead letter requeued by operator");
        } else {
            tracing::warn!(entry_id = %msg.entry_id, "Replay requested for an entry that is not dead-lettered");
        }
        Ok(replayed)
    }
}
