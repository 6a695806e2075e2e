//! Contracts a `node` worker loop depends on. The durable bus that backs
//! these traits — decoding wire frames off a queue, redelivering the
//! outbox with at-least-once semantics, deduplicating by message id — is
//! out of scope per §1; only the shapes it must expose are described here,
//! the same way `ledger-storage::Ledger` describes a persistence backend
//! without committing to one.

use async_trait::async_trait;
use ledger_signals::Signal;
use thiserror::Error;

use crate::inbound::InboundMessage;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus unavailable: {0}")]
    Unavailable(String),
    #[error("message rejected: {0}")]
    Rejected(String),
}

pub type BusResult<T> = Result<T, BusError>;

/// Source of the six inbound calls. An implementation durably dequeues one
/// message at a time and only removes it from the queue once the caller
/// acknowledges successful processing, so that a crash between receive and
/// ack results in redelivery rather than loss.
#[async_trait]
pub trait InboundBus: Send + Sync {
    /// Fetch the next undelivered message, if any is queued.
    async fn receive(&self) -> BusResult<Option<InboundMessage>>;

    /// Acknowledge that a previously received message was processed and
    /// may be removed from the queue.
    async fn ack(&self, message: &InboundMessage) -> BusResult<()>;
}

/// Sink for the outbox rows a transaction accumulates. An implementation
/// ships signals to subscribers at least once; the caller is responsible
/// for not calling `publish` again for signals already durably committed.
#[async_trait]
pub trait OutboundBus: Send + Sync {
    async fn publish(&self, signals: &[Signal]) -> BusResult<()>;
}
