//! The commodity plumbing around the index: the TCP accept loop,
//! per-connection buffering, the dispatcher that wires [`protocol`]
//! commands onto [`store::Table`] operations, and the configuration
//! surface that picks the server's runtime knobs.
//!
//! ```text
//! TcpListener ──► Connection (read/write buffers + Aggregator)
//!                      │
//!                      ▼
//!                 dispatch::dispatch ──► store::Table
//! ```

pub mod config;
pub mod connection;
mod dispatch;
pub mod error;
pub mod server;

pub use config::{Cli, ServerConfig};
pub use error::DaemonError;
pub use server::{bind_listener, run, serve};
