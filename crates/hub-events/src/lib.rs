//! # hub-events
//!
//! In-memory distribution of execution progress events.
//!
//! [`EventBus`] keeps, per execution id, a bounded ring of recent events for
//! reconnect replay and a set of bounded subscriber queues for live delivery.
//! Publishers never block: a subscriber that falls behind loses events rather
//! than stalling the producer. Consumers treat sequences as non-contiguous
//! and possibly repeated, and negative sequences as control signals.

#![deny(unsafe_code)]

mod bus;
mod subscription;

pub use bus::{EventBus, EventBusConfig};
pub use subscription::{EventStream, Unsubscribe};
