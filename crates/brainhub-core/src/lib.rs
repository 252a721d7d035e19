//! Brain Hub Core - Foundation types for the coordination hub.
//!
//! This crate provides:
//! - Client descriptors and their validation rules
//! - The nearest-neighbour distance function
//! - Hub→worker wire envelopes (type-tagged JSON)
//! - The delivery-outcome classification used by the broadcast engine
//! - Error types shared across the workspace
//!
//! It performs no I/O and holds no state; everything here is plain data.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod delivery;
pub mod descriptor;
pub mod envelope;
pub mod error;

pub use delivery::Delivery;
pub use descriptor::{ClientDescriptor, distance};
pub use envelope::{Envelope, NearestMatch};
pub use error::{HubError, HubResult};
