//! Cross-node invalidation over pub/sub.

mod bus;
mod message;

pub use bus::{BusHandle, BusState, InvalidationBus, MessageOutcome};
pub use message::{Channels, InstanceIdentity, InvalidationCommand, InvalidationMessage};
