//! Configuration for Flare
//!
//! CLI arguments and environment variable handling using clap, plus the
//! plain config structs the library is constructed from.

use clap::{Parser, Subcommand, ValueEnum};

use crate::flare::ResolvePolicy;

/// Default collection holding flare documents
pub const DEFAULT_COLLECTION: &str = "flares";

/// Flare - SOS broadcast and ally response coordination
#[derive(Parser, Debug, Clone)]
#[command(name = "flare")]
#[command(about = "SOS flare broadcast and ally response coordination")]
pub struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "text")]
    pub log_format: LogFormat,

    /// Store collection holding flares
    #[arg(long, env = "FLARE_COLLECTION", default_value = DEFAULT_COLLECTION)]
    pub collection: String,

    /// Allow resolving an Active flare without a prior claim
    #[arg(long, env = "FLARE_ALLOW_DIRECT_RESOLVE", default_value = "false")]
    pub allow_direct_resolve: bool,

    /// Capacity of the store change broadcast channel
    #[arg(long, env = "FLARE_CHANGE_BUFFER", default_value = "1000")]
    pub change_buffer: usize,

    /// Snapshots queued per subscription before the store waits
    #[arg(long, env = "FLARE_SNAPSHOT_BUFFER", default_value = "16")]
    pub snapshot_buffer: usize,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run a scripted victim/ally scenario against an in-memory store
    Demo {
        /// Number of allies racing to claim the flare
        #[arg(long, default_value = "3")]
        allies: usize,
    },
    /// Interactive line-oriented shell
    Shell {
        /// User id to act as
        #[arg(long, env = "FLARE_USER", default_value = "anonymous")]
        user: String,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.collection.trim().is_empty() {
            return Err("collection name must not be empty".to_string());
        }
        if self.change_buffer == 0 {
            return Err("change buffer must be at least 1".to_string());
        }
        if self.snapshot_buffer == 0 {
            return Err("snapshot buffer must be at least 1".to_string());
        }
        if let Command::Demo { allies } = self.command {
            if allies == 0 {
                return Err("demo needs at least one ally".to_string());
            }
        }
        Ok(())
    }

    pub fn flare_config(&self) -> FlareConfig {
        FlareConfig {
            collection: self.collection.clone(),
            resolve_policy: if self.allow_direct_resolve {
                ResolvePolicy::AllowDirect
            } else {
                ResolvePolicy::RequireClaim
            },
        }
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            change_buffer: self.change_buffer,
            snapshot_buffer: self.snapshot_buffer,
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlareConfig {
    /// Collection holding flare documents
    pub collection: String,

    /// Whether resolve requires a prior claim
    pub resolve_policy: ResolvePolicy,
}

impl Default for FlareConfig {
    fn default() -> Self {
        Self {
            collection: DEFAULT_COLLECTION.to_string(),
            resolve_policy: ResolvePolicy::RequireClaim,
        }
    }
}

/// In-memory store configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Capacity of the change broadcast channel
    pub change_buffer: usize,

    /// Snapshots queued per subscription
    pub snapshot_buffer: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            change_buffer: 1000,
            snapshot_buffer: 16,
        }
    }
}
