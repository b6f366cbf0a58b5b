//! The configuration surface: CLI flags via `clap`, an optional TOML config
//! file, and the resolved [`ServerConfig`] the rest of the daemon runs on.
//!
//! Precedence is CLI flag > config file > built-in default. The hash seed
//! and the load-factor threshold are fixed compile-time constants in
//! `store::Table` — deterministic across runs by design — and are
//! deliberately not exposed here as settable fields.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;

use crate::error::DaemonError;

/// Hard ceiling on `value_size_max`, independent of configuration: just
/// under 1 GiB.
pub const HARD_VALUE_SIZE_MAX: usize = (1 << 30) - 1;
/// Hard ceiling on `array_size_max`: bounded by the aggregator's fixed-size
/// element array (`protocol::MAX_COMMAND_ARITY`).
pub const HARD_ARRAY_SIZE_MAX: usize = protocol::MAX_COMMAND_ARITY;
/// Hard ceiling on the per-connection read buffer, independent of
/// configuration.
pub const HARD_READ_BUFFER_MAX: usize = 1 << 30;

const DEFAULT_PORT: u16 = 6379;
const DEFAULT_BACKLOG: u32 = 1024;
const DEFAULT_INITIAL_CAPACITY: usize = 1024;
const DEFAULT_VALUE_SIZE_MAX: usize = 512 * 1024 * 1024;
const DEFAULT_ARRAY_SIZE_MAX: usize = 50;
const DEFAULT_READ_BUFFER_MAX: usize = HARD_READ_BUFFER_MAX;

/// Command-line surface. Every field is optional so that an unset flag
/// falls through to the config file, then to the built-in default.
#[derive(Parser, Debug, Clone)]
#[command(name = "kvsrvd", about = "In-memory key/value server")]
pub struct Cli {
    /// TCP port to bind.
    #[arg(long)]
    pub port: Option<u16>,

    /// Address to bind the listening socket to.
    #[arg(long)]
    pub bind: Option<IpAddr>,

    /// Listen backlog.
    #[arg(long)]
    pub backlog: Option<u32>,

    /// Initial index capacity; rounded up to the next power of two.
    #[arg(long)]
    pub initial_capacity: Option<usize>,

    /// Hard bulk-string byte cap.
    #[arg(long)]
    pub value_size_max: Option<usize>,

    /// Hard command-arity cap.
    #[arg(long)]
    pub array_size_max: Option<usize>,

    /// Hard cap, in bytes, on a single connection's read buffer before it
    /// is closed.
    #[arg(long)]
    pub read_buffer_max: Option<usize>,

    /// Path to a TOML config file providing any of the above as an
    /// alternative to flags.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Repeat for more verbose logging (-v, -vv, -vvv).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// The subset of [`Cli`] that may also come from a config file. `serde`
/// gives every field `#[serde(default)]` semantics via `Option`, so a file
/// naming only `port = 7000` is valid.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    port: Option<u16>,
    bind: Option<IpAddr>,
    backlog: Option<u32>,
    initial_capacity: Option<usize>,
    value_size_max: Option<usize>,
    array_size_max: Option<usize>,
    read_buffer_max: Option<usize>,
}

/// Fully resolved configuration the daemon actually runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    pub bind: IpAddr,
    pub backlog: u32,
    pub initial_capacity: usize,
    pub value_size_max: usize,
    pub array_size_max: usize,
    pub read_buffer_max: usize,
}

impl ServerConfig {
    /// Resolves CLI flags (and the config file they may reference) into a
    /// [`ServerConfig`], applying defaults and validating the hard
    /// ceilings.
    pub fn resolve(cli: &Cli) -> Result<Self, DaemonError> {
        let file = match &cli.config {
            Some(path) => load_file_config(path)?,
            None => FileConfig::default(),
        };

        let config = ServerConfig {
            port: cli.port.or(file.port).unwrap_or(DEFAULT_PORT),
            bind: cli.bind.or(file.bind).unwrap_or_else(|| IpAddr::from([0, 0, 0, 0])),
            backlog: cli.backlog.or(file.backlog).unwrap_or(DEFAULT_BACKLOG),
            initial_capacity: cli
                .initial_capacity
                .or(file.initial_capacity)
                .unwrap_or(DEFAULT_INITIAL_CAPACITY),
            value_size_max: cli.value_size_max.or(file.value_size_max).unwrap_or(DEFAULT_VALUE_SIZE_MAX),
            array_size_max: cli.array_size_max.or(file.array_size_max).unwrap_or(DEFAULT_ARRAY_SIZE_MAX),
            read_buffer_max: cli.read_buffer_max.or(file.read_buffer_max).unwrap_or(DEFAULT_READ_BUFFER_MAX),
        };
        config.validate()
    }

    fn validate(self) -> Result<Self, DaemonError> {
        if self.value_size_max == 0 || self.value_size_max >= HARD_VALUE_SIZE_MAX {
            return Err(DaemonError::Config(format!(
                "value_size_max must be in 1..{HARD_VALUE_SIZE_MAX}, got {}",
                self.value_size_max
            )));
        }
        if self.array_size_max == 0 || self.array_size_max >= HARD_ARRAY_SIZE_MAX {
            return Err(DaemonError::Config(format!(
                "array_size_max must be in 1..{HARD_ARRAY_SIZE_MAX}, got {}",
                self.array_size_max
            )));
        }
        if self.read_buffer_max == 0 || self.read_buffer_max > HARD_READ_BUFFER_MAX {
            return Err(DaemonError::Config(format!(
                "read_buffer_max must be in 1..={HARD_READ_BUFFER_MAX}, got {}",
                self.read_buffer_max
            )));
        }
        if self.initial_capacity == 0 {
            return Err(DaemonError::Config("initial_capacity must be at least 1".to_string()));
        }
        Ok(self)
    }

    /// The wire-parsing limits derived from this config, handed to every
    /// [`protocol::Lexer`]/[`protocol::Aggregator`] call.
    pub fn limits(&self) -> protocol::Limits {
        protocol::Limits { value_size_max: self.value_size_max, array_size_max: self.array_size_max }
    }

    pub fn socket_addr(&self) -> std::net::SocketAddr {
        std::net::SocketAddr::new(self.bind, self.port)
    }
}

fn load_file_config(path: &Path) -> Result<FileConfig, DaemonError> {
    let text = std::fs::read_to_string(path)
        .map_err(|source| DaemonError::ConfigFileRead { path: path.to_path_buf(), source })?;
    toml::from_str(&text).map_err(|source| DaemonError::ConfigFileParse { path: path.to_path_buf(), source })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_cli() -> Cli {
        Cli {
            port: None,
            bind: None,
            backlog: None,
            initial_capacity: None,
            value_size_max: None,
            array_size_max: None,
            read_buffer_max: None,
            config: None,
            verbose: 0,
        }
    }

    #[test]
    fn defaults_match_spec() {
        let config = ServerConfig::resolve(&bare_cli()).unwrap();
        assert_eq!(config.port, 6379);
        assert_eq!(config.array_size_max, 50);
        assert_eq!(config.value_size_max, 512 * 1024 * 1024);
    }

    #[test]
    fn cli_flag_overrides_default() {
        let mut cli = bare_cli();
        cli.port = Some(7000);
        let config = ServerConfig::resolve(&cli).unwrap();
        assert_eq!(config.port, 7000);
    }

    #[test]
    fn config_file_is_used_when_no_cli_flag_given() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kvsrvd.toml");
        std::fs::write(&path, "port = 9000\narray_size_max = 20\n").unwrap();
        let mut cli = bare_cli();
        cli.config = Some(path);
        let config = ServerConfig::resolve(&cli).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.array_size_max, 20);
    }

    #[test]
    fn cli_flag_wins_over_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kvsrvd.toml");
        std::fs::write(&path, "port = 9000\n").unwrap();
        let mut cli = bare_cli();
        cli.config = Some(path);
        cli.port = Some(1234);
        let config = ServerConfig::resolve(&cli).unwrap();
        assert_eq!(config.port, 1234);
    }

    #[test]
    fn array_size_max_at_the_hard_ceiling_is_rejected() {
        let mut cli = bare_cli();
        cli.array_size_max = Some(HARD_ARRAY_SIZE_MAX);
        assert!(ServerConfig::resolve(&cli).is_err());
    }

    #[test]
    fn value_size_max_at_the_hard_ceiling_is_rejected() {
        let mut cli = bare_cli();
        cli.value_size_max = Some(HARD_VALUE_SIZE_MAX);
        assert!(ServerConfig::resolve(&cli).is_err());
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let mut cli = bare_cli();
        cli.config = Some(PathBuf::from("/nonexistent/kvsrvd.toml"));
        assert!(matches!(ServerConfig::resolve(&cli), Err(DaemonError::ConfigFileRead { .. })));
    }
}
