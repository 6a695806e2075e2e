//! Wire contracts for the engine's inbound calls and outbound signals, §6.
//! The durable message bus itself (the transport that decodes these off a
//! queue and redelivers the outbox) is out of scope per §1; this crate only
//! describes the shapes and the traits a `node` worker loop depends on.

pub mod dispatch;
pub mod inbound;
pub mod traits;
pub mod validate;

pub use dispatch::{dispatch, DispatchConfig};
pub use inbound::*;
pub use traits::{InboundBus, OutboundBus};
pub use validate::ValidationError;
