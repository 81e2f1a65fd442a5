//! # commd-client
//!
//! Client library for commd.
//!
//! This crate provides:
//! - Async TCP client speaking the fixed-format command protocol
//! - The status exchange: one Status request, then Ack until the
//!   server terminates the conversation

pub mod client;
pub mod error;

pub use client::{Client, ClientConfig};
pub use error::ClientError;
