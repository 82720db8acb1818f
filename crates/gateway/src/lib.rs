//! Apply gateway for graphsync.
//!
//! The gateway is the only way mutations reach the graph store. Each
//! [`MutationSet`](graphsync_core::MutationSet) is applied atomically, and
//! selector queries read committed state.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod gateway;
pub mod memory;

pub use gateway::{ApplyGateway, TracingGateway};
pub use memory::InMemoryGateway;
