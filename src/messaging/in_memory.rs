use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use super::{EventBus, PublishError};

// ============================================================================
// In-Memory Broker
// ============================================================================
//
// Append-only log with per-key subscribers. Faults can be scripted to
// reject sends, hang past the ack timeout, or store a message but lose the
// acknowledgement (the duplicate-delivery case consumers must absorb).
//
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub offset: u64,
    pub topic: String,
    pub key: String,
    pub event_type: String,
    pub payload: String,
}

#[derive(Default)]
struct Inner {
    log: Vec<PublishedMessage>,
    subscribers: Vec<mpsc::UnboundedSender<PublishedMessage>>,
    reject_next: u32,
    hang_next: u32,
    lose_ack_next: u32,
    poisoned_keys: HashSet<String>,
    unavailable: bool,
}

enum Outcome {
    Ack,
    Reject(String),
    Hang,
    LostAck,
}

#[derive(Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<PublishedMessage> {
        self.inner.lock().map(|i| i.log.clone()).unwrap_or_default()
    }

    pub fn messages_for_key(&self, key: &str) -> Vec<PublishedMessage> {
        self.messages().into_iter().filter(|m| m.key == key).collect()
    }

    /// Receive every message appended from now on
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<PublishedMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut inner) = self.inner.lock() {
            inner.subscribers.push(tx);
        }
        rx
    }

    pub fn reject_next(&self, count: u32) {
        self.with_inner(|i| i.reject_next = count);
    }

    /// Next `count` sends never complete
    pub fn hang_next(&self, count: u32) {
        self.with_inner(|i| i.hang_next = count);
    }

    /// Next `count` sends are stored but reported as failed
    pub fn lose_ack_next(&self, count: u32) {
        self.with_inner(|i| i.lose_ack_next = count);
    }

    /// Reject every message for `key` until cleared
    pub fn poison_key(&self, key: &str) {
        self.with_inner(|i| {
            i.poisoned_keys.insert(key.to_string());
        });
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.with_inner(|i| i.unavailable = unavailable);
    }

    fn with_inner(&self, f: impl FnOnce(&mut Inner)) {
        if let Ok(mut inner) = self.inner.lock() {
            f(&mut inner);
        }
    }

    fn decide(inner: &mut Inner, key: &str) -> Outcome {
        if inner.unavailable {
            return Outcome::Reject("broker unavailable".to_string());
        }
        if inner.poisoned_keys.contains(key) {
            return Outcome::Reject(format!("message for key {key} rejected"));
        }
        if inner.reject_next > 0 {
            inner.reject_next -= 1;
            return Outcome::Reject("injected rejection".to_string());
        }
        if inner.hang_next > 0 {
            inner.hang_next -= 1;
            return Outcome::Hang;
        }
        if inner.lose_ack_next > 0 {
            inner.lose_ack_next -= 1;
            return Outcome::LostAck;
        }
        Outcome::Ack
    }

    fn append(inner: &mut Inner, topic: &str, key: &str, event_type: &str, payload: &str) {
        let message = PublishedMessage {
            offset: inner.log.len() as u64,
            topic: topic.to_string(),
            key: key.to_string(),
            event_type: event_type.to_string(),
            payload: payload.to_string(),
        };
        inner.subscribers.retain(|tx| tx.send(message.clone()).is_ok());
        inner.log.push(message);
    }
}

#[async_trait]
impl EventBus for InMemoryBroker {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        event_type: &str,
        payload: &str,
    ) -> Result<(), PublishError> {
        let outcome = {
            let mut inner = self
                .inner
                .lock()
                .map_err(|_| PublishError::Broker("broker lock poisoned".to_string()))?;
            let outcome = Self::decide(&mut inner, key);
            if matches!(outcome, Outcome::Ack | Outcome::LostAck) {
                Self::append(&mut inner, topic, key, event_type, payload);
            }
            outcome
        };

        match outcome {
            Outcome::Ack => Ok(()),
            Outcome::Reject(reason) => Err(PublishError::Broker(reason)),
            Outcome::LostAck => Err(PublishError::Broker("acknowledgement lost".to_string())),
            Outcome::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}
