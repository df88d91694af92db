//! Client for the game coordinator's TCP-framed binary protocol.
//!
//! This crate speaks the directory side of the ecosystem: it fetches the
//! public server listing and resolves invite codes into a directly-reachable
//! address or a relay ticket. Sessions are short-lived and deadline-bounded;
//! the only process-wide state is the NewGRF lookup table and the server-list
//! cache.
//!
//! ## Architecture
//!
//! ```text
//! ServerListCache (TTL + single-flight)
//!         ↓
//! CoordinatorClient (one TCP session per flow)
//!         ↓
//! wire (length-prefixed frames) + listing (versioned record decode)
//! ```

pub mod cache;
pub mod client;
pub mod error;
pub mod listing;
pub mod types;
pub mod wire;

pub use cache::{ListingSource, ServerListCache, DEFAULT_TTL};
pub use client::{CoordinatorClient, DEFAULT_COORDINATOR_ADDR};
pub use error::{Error, Result};
pub use types::{InviteResolution, Landscape, NewGrfEntry, NewGrfLookup, ServerRecord};
