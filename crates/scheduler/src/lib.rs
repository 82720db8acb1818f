//! Scheduling for graphsync provider instances.
//!
//! Every instance gets its own slot and timer. A failing instance backs off
//! on its own; it never delays or cancels another instance's ticks.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod backoff;
pub mod health;
pub mod scheduler;
pub mod slot;

pub use backoff::calculate_backoff;
pub use health::{DisableReason, InstanceHealth, SlotState};
pub use scheduler::Scheduler;
pub use slot::{InstanceSlot, SlotCommand};
