//! The Perch ingestion engine.
//!
//! Everything with real coordination concerns lives here: the process-wide
//! rate limiter, the rotating identity pool, the dispatch surface that outer
//! layers call, the SQLite ingest store with its idempotent upsert contract,
//! and the three long-running ingestion loops. The remote service itself is
//! only reachable through the [`perch_social::Capability`] facade, so the
//! whole engine runs unchanged against a scripted facade in tests.

pub mod agents;
pub mod dispatch;
pub mod priority;
pub mod rate;
pub mod store;
pub mod supervise;
pub mod sweep;

#[cfg(test)]
pub(crate) mod testsupport;

pub use agents::{AgentPool, BootstrapError, PoolError};
pub use dispatch::{Attributed, DispatchError, Dispatcher};
pub use priority::{priority_channel, run_priority_pipeline, PriorityFeed, PriorityOptions};
pub use rate::{Cancelled, RateLimiter, RatePolicy};
pub use store::IngestStore;
pub use supervise::supervise;
pub use sweep::{run_content_sweep, run_profile_sweep, SweepOptions};
