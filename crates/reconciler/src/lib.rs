//! Reconciliation core for graphsync.
//!
//! Each tick of a provider instance flows through the same steps:
//!
//! - **Discover**: the provider reports the entities and relations it sees
//! - **Resolve**: deferred field selectors become concrete relation keys
//! - **Reconcile**: the resolved state is diffed against the instance's
//!   applied snapshot, respecting cross-instance ownership
//! - **Apply**: the mutation set is committed atomically through the gateway
//! - **Advance**: the snapshot and ownership index move forward
//!
//! Any failure before a successful apply leaves the snapshot untouched.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod ownership;
pub mod pipeline;
pub mod reconciler;
pub mod resolver;
pub mod types;

pub use ownership::{Identity, OwnershipIndex, SharedOwnership};
pub use pipeline::{ReconcilePipeline, TickOutcome};
pub use reconciler::{claimed_identities, reconcile};
pub use resolver::{ReadContext, RelationResolver};
pub use types::{OwnershipConflict, ReconcileOutcome, ResolvedState, TickReport};
