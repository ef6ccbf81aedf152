//! Canonical event types for the compute grid.
//!
//! Types follow `{service}:{action}:v{version}:{state}` and double as
//! PUB/SUB topics, so a subscription to `compute:dispatch:` receives every
//! dispatch lifecycle event.

// ── Worker → coordinator ──────────────────────────────────────────────────

/// A worker announces (or re-announces) its execution profile.
pub const CAPABILITIES_UPDATE: &str = "compute:capabilities:v1:update";

// ── Dispatch lifecycle ────────────────────────────────────────────────────

/// A client (or the scheduler) asks for one envelope to be dispatched.
pub const DISPATCH_REQUESTED: &str = "compute:dispatch:v1:requested";

/// Broadcast: the coordinator picked a worker.
pub const DISPATCH_ACCEPTED: &str = "compute:dispatch:v1:accepted";

/// Targeted: the full envelope, routed to the chosen worker only.
pub const DISPATCH_ASSIGNED: &str = "compute:dispatch:v1:assigned";

/// A worker finished one chunk.
pub const DISPATCH_SUCCESS: &str = "compute:dispatch:v1:success";

/// The request was rejected or no worker could take it.
pub const DISPATCH_FAILED: &str = "compute:dispatch:v1:failed";

/// Reserved; nothing in the engine emits or consumes it.
pub const DISPATCH_CANCELLED: &str = "compute:dispatch:v1:cancelled";

/// Reserved; nothing in the engine emits or consumes it.
pub const DISPATCH_PROGRESS: &str = "compute:dispatch:v1:progress";

// ── Task lifecycle ────────────────────────────────────────────────────────

/// A client submits a whole task for chunking.
pub const TASK_REQUESTED: &str = "compute:task:v1:requested";

/// Every chunk of a task completed; carries the aggregated result URIs.
pub const TASK_SUCCESS: &str = "compute:task:v1:success";
