//! Router → capability nodes → aggregator.
//!
//! A turn enters at the [`IntentRouter`], fans out to every capability named
//! by the router's label set (always one today) and is merged by the
//! aggregator into a single response.

pub mod dispatch;
pub mod router;
pub mod state;

pub use dispatch::{DispatchGraph, EMPTY_RESPONSE};
pub use router::IntentRouter;
pub use state::TurnState;
