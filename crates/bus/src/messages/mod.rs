//! Compute grid message types.
//!
//! - **Payloads** (`compute`): typed bodies carried inside [`CanonicalEvent`](crate::CanonicalEvent)s
//! - **Topic constants** (`topics`): canonical event types used for routing

pub mod compute;
pub mod topics;

pub use compute::*;
