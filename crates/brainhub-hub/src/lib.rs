//! Brain Hub — the coordination core.
//!
//! The hub maintains long-lived bidirectional sessions with remote workers
//! and orchestrates group operations over them:
//!
//! - **Broadcast**: parallel fan-out of one message to every registered
//!   client, with dead-session eviction.
//! - **Benchmark rounds**: fan out a request, collect typed timing reports,
//!   resolve with an aggregate summary on drain or timeout.
//! - **Map-reduce**: distribute opaque task payloads round-robin across the
//!   worker pool, reassign on departure, reduce completed results.
//! - **KV + objects**: a TTL key-value store and a filename-addressed
//!   object store shared by all workers (see `brainhub-storage`).
//!
//! All worker-initiated traffic enters through [`Hub::handle_command`], the
//! textual command router. Sessions deliver hub→worker messages through a
//! single-writer channel per worker; delivery never raises, it classifies
//! (see [`brainhub_core::Delivery`]).

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod benchmark;
pub mod hub;
pub mod mapreduce;
mod payload;
pub mod registry;
pub mod router;
pub mod session;

pub use benchmark::{BenchmarkArgs, DEFAULT_ITERATIONS, DEFAULT_TIMEOUT_MS};
pub use hub::{Hub, HubConfig};
pub use mapreduce::{Reducer, DEFAULT_MAPREDUCE_TIMEOUT_MS};
pub use registry::{Registry, RegistryEntry};
pub use session::{Session, SessionId};
