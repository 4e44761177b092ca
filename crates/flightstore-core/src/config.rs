//! Configuration for the store and the transfer layer.
//!
//! Configuration is merged from a TOML file and environment variables
//! prefixed with `FLIGHTSTORE_` (double underscore separates nesting, e.g.
//! `FLIGHTSTORE_RING__CAPACITY=1048576`). Every field has a default so an
//! absent file yields a usable configuration.

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;
use crate::transfer::wire::CHUNK_CAP;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Ring buffer geometry.
    #[serde(default)]
    pub ring: RingConfig,
    /// Transfer state machine settings.
    #[serde(default)]
    pub transfer: TransferConfig,
}

/// Geometry of the reserved flash region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RingConfig {
    /// Absolute address where the reserved region starts.
    #[serde(default)]
    pub flash_start: usize,
    /// Size of the reserved region in bytes.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Erase-block size of the medium, in bytes.
    #[serde(default = "default_erase_block")]
    pub erase_block_size: usize,
}

/// Settings for the chunked-transfer clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Bytes of data per request or response, at most the protocol cap.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Node id of this end of the bus.
    #[serde(default = "default_local_node")]
    pub local_node_id: u8,
    /// Node id of the peer the clients talk to.
    #[serde(default = "default_remote_node")]
    pub remote_node_id: u8,
    /// Scheduler period for the state machines, in milliseconds.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
}

fn default_capacity() -> usize {
    4 * 1024 * 1024
}

fn default_erase_block() -> usize {
    1
}

fn default_chunk_size() -> usize {
    CHUNK_CAP
}

fn default_local_node() -> u8 {
    11
}

fn default_remote_node() -> u8 {
    96
}

fn default_tick_interval() -> u64 {
    10
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            flash_start: 0,
            capacity: default_capacity(),
            erase_block_size: default_erase_block(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            local_node_id: default_local_node(),
            remote_node_id: default_remote_node(),
            tick_interval_ms: default_tick_interval(),
        }
    }
}

impl StoreConfig {
    /// Loads configuration from `flightstore.toml` and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("flightstore.toml")
    }

    /// Loads configuration from a specific TOML file and the environment.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("FLIGHTSTORE_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Renders the effective configuration as TOML, for logging and
    /// ground-station dumps.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Checks field values against the geometry and protocol limits.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ring.capacity == 0 {
            return Err(ConfigError::Invalid("ring.capacity must be non-zero".into()));
        }
        if self.ring.erase_block_size == 0 {
            return Err(ConfigError::Invalid(
                "ring.erase_block_size must be non-zero".into(),
            ));
        }
        if self.ring.capacity % self.ring.erase_block_size != 0 {
            return Err(ConfigError::Invalid(format!(
                "ring.capacity {} is not a multiple of erase_block_size {}",
                self.ring.capacity, self.ring.erase_block_size
            )));
        }
        if self.transfer.chunk_size == 0 || self.transfer.chunk_size > CHUNK_CAP {
            return Err(ConfigError::Invalid(format!(
                "transfer.chunk_size {} outside 1..={CHUNK_CAP}",
                self.transfer.chunk_size
            )));
        }
        if self.transfer.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "transfer.tick_interval_ms must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
