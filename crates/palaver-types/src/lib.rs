//! Shared building blocks for the Palaver RPC system.
//!
//! - Identifiers: [`PeerId`], [`RoutingId`], [`CallId`]
//! - Configuration: [`PeerConfig`]
//! - The error taxonomy: [`PalaverError`]

pub mod config;
pub mod error;
pub mod id;

pub use config::{PeerConfig, DEFAULT_CALL_TIMEOUT};
pub use error::{format_remote_traceback, PalaverError, PalaverResult};
pub use id::{CallId, PeerId, RoutingId};
