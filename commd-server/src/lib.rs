//! # commd-server
//!
//! TCP server for commd.
//!
//! This crate provides:
//! - The connection acceptor and service lifecycle state machine
//! - Per-connection protocol sessions with timeout/retry policy
//! - The live connection registry backing the full-drain shutdown barrier
//! - The host-manager custom command hook

pub mod config;
pub mod error;
pub mod registry;
pub mod server;
pub mod session;

pub use config::ServerConfig;
pub use error::ServerError;
pub use registry::{ConnectionGuard, ConnectionId, ConnectionRegistry};
pub use server::{CommServer, LifecycleState};
pub use session::Session;
