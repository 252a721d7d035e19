//! Brain Hub Storage — TTL key-value store and object store.
//!
//! Two independent stores back the hub:
//!
//! # Key-value with TTL ([`KvStore`])
//!
//! String keys carrying JSON payloads of the shape
//! `{"value": V, "expiresAt": T | null}`. Expiry is enforced twice over:
//! lazily on read, and by a single consolidated alarm that sweeps expired
//! entries and reschedules itself to the earliest remaining deadline. The
//! store is generic over a [`KvBacking`] so the backing medium stays an
//! external collaborator; [`MemoryBacking`] is the bundled implementation.
//!
//! # Objects ([`ObjectStore`])
//!
//! Opaque binary assets addressed by filename, with suffix-based
//! content-type inference. [`MemoryObjectStore`] is the bundled
//! implementation; production backends implement the same trait.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod backing;
pub mod error;
pub mod kv;
pub mod object;

pub use backing::{KvBacking, MemoryBacking};
pub use error::{StorageError, StorageResult};
pub use kv::{GetOutcome, KvStore, Listing, LIST_LIMIT};
pub use object::{content_type_for, MemoryObjectStore, ObjectBody, ObjectInfo, ObjectStore};
