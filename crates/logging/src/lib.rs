//! Structured logging setup for `kvsrvd`.
//!
//! Everything here is a thin wrapper over [`tracing`]: `init` installs a
//! subscriber scaled to a `-v` count, and the handful of `on_*` functions
//! give call sites a single, consistent place to log each kind of server
//! event instead of reaching for `tracing::info!` ad hoc throughout the
//! daemon.

use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

/// Verbosity level, typically derived from counting `-v` flags on the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
    Debug,
}

impl Verbosity {
    pub fn from_count(count: u8) -> Self {
        match count {
            0 => Verbosity::Normal,
            1 => Verbosity::Verbose,
            _ => Verbosity::Debug,
        }
    }

    fn filter_directive(self) -> &'static str {
        match self {
            Verbosity::Quiet => "error",
            Verbosity::Normal => "info",
            Verbosity::Verbose => "debug",
            Verbosity::Debug => "trace",
        }
    }
}

/// Installs a global `tracing` subscriber writing to stderr.
///
/// # Panics
///
/// Panics if a global subscriber has already been installed — this is only
/// meant to be called once, at process startup.
pub fn init(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.filter_directive()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

pub fn on_listening(addr: SocketAddr) {
    tracing::info!(%addr, "listening");
}

pub fn on_connection_accepted(addr: SocketAddr, connection_id: u64) {
    tracing::debug!(%addr, connection_id, "connection accepted");
}

pub fn on_connection_closed(connection_id: u64, reason: &str) {
    tracing::debug!(connection_id, reason, "connection closed");
}

pub fn on_protocol_error(connection_id: u64, token: &str) {
    tracing::warn!(connection_id, error = token, "protocol error");
}

pub fn on_internal_error(connection_id: u64, detail: &str) {
    tracing::error!(connection_id, detail, "internal error, closing connection");
}

pub fn on_resize(old_capacity: usize, new_capacity: usize) {
    tracing::info!(old_capacity, new_capacity, "table grown");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_escalates_with_flag_count() {
        assert_eq!(Verbosity::from_count(0), Verbosity::Normal);
        assert_eq!(Verbosity::from_count(1), Verbosity::Verbose);
        assert_eq!(Verbosity::from_count(5), Verbosity::Debug);
    }

    #[test]
    fn filter_directives_are_stable() {
        assert_eq!(Verbosity::Quiet.filter_directive(), "error");
        assert_eq!(Verbosity::Debug.filter_directive(), "trace");
    }
}
