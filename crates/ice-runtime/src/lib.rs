//! Tokio-backed reactor glue: ACM idle/heartbeat timers and a spawn
//! facade shared by every connection and object adapter in `ice-rpc`
//! (spec.md §2 "Runtime" row, §4.5).
//!
//! The original design abstracts over multiple async runtimes via an
//! adapter-per-runtime layer; this workspace targets `tokio` directly.
//! Tokio is already the de facto standard async runtime for this class of
//! system and the multi-runtime adapter crates in the source repo this
//! was grounded on carried no implementation beyond their `Cargo.toml`, so
//! there was nothing to generalize from.

mod acm;
mod reactor;

pub use acm::{AcmAction, AcmTimer};
pub use reactor::{run_periodic, TaskGroup};
