//! Restaurant order pipeline built on the transactional outbox pattern.
//!
//! Order mutations and their events are committed together by the
//! [`store::OrderStore`]; the [`outbox::OutboxPublisher`] relays committed
//! events to the broker and the [`outbox::ReconciliationSweeper`] repairs
//! whatever a crash or a broker outage left behind.

pub mod actors;
pub mod config;
pub mod domain;
pub mod messaging;
pub mod metrics;
pub mod outbox;
pub mod store;
pub mod utils;
