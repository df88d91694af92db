//! Gateway bridging browser WebSocket clients to the game's TCP backends.
//!
//! One listener multiplexes the HTTP directory API and WebSocket relay
//! upgrades:
//!
//! ```text
//! GET /servers, /resolve/{code}, /health   → coordinator crate (cached)
//! GET /connect/{host}/{port}  (upgrade)    → relay session (WS ⇄ TCP)
//! ```
//!
//! The relay is byte-transparent in both directions and enforces the
//! destination allow-list before any outbound socket is opened.

pub mod api;
pub mod config;
pub mod error;
pub mod relay;

pub use api::{create_router, AppState};
pub use config::Config;
pub use error::ApiError;
