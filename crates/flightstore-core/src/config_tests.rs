//! Tests for configuration loading and validation.

use std::io::Write;

use crate::config::StoreConfig;
use crate::error::ConfigError;

#[test]
fn defaults_validate() {
    let config = StoreConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.ring.capacity, 4 * 1024 * 1024);
    assert_eq!(config.transfer.chunk_size, 256);
}

#[test]
fn missing_file_yields_defaults() {
    let config = StoreConfig::load_from("/nonexistent/flightstore.toml").unwrap();
    assert_eq!(config.ring.flash_start, 0);
    assert_eq!(config.transfer.tick_interval_ms, 10);
}

#[test]
fn toml_overrides_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "[ring]\ncapacity = 2048\nerase_block_size = 256\n\n[transfer]\nchunk_size = 64\n"
    )
    .unwrap();

    let config = StoreConfig::load_from(file.path()).unwrap();
    assert_eq!(config.ring.capacity, 2048);
    assert_eq!(config.ring.erase_block_size, 256);
    assert_eq!(config.transfer.chunk_size, 64);
    // untouched fields keep their defaults
    assert_eq!(config.transfer.remote_node_id, 96);
}

#[test]
fn rendered_config_loads_back_identically() {
    let mut config = StoreConfig::default();
    config.ring.capacity = 8192;
    config.transfer.chunk_size = 128;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{}", config.to_toml().unwrap()).unwrap();

    let reloaded = StoreConfig::load_from(file.path()).unwrap();
    assert_eq!(reloaded.ring.capacity, 8192);
    assert_eq!(reloaded.transfer.chunk_size, 128);
    assert_eq!(reloaded.transfer.local_node_id, config.transfer.local_node_id);
}

#[test]
fn capacity_must_be_block_multiple() {
    let mut config = StoreConfig::default();
    config.ring.capacity = 1000;
    config.ring.erase_block_size = 256;
    match config.validate() {
        Err(ConfigError::Invalid(msg)) => assert!(msg.contains("multiple")),
        other => panic!("expected Invalid, got {other:?}"),
    }
}

#[test]
fn chunk_size_is_capped_at_protocol_limit() {
    let mut config = StoreConfig::default();
    config.transfer.chunk_size = 257;
    assert!(config.validate().is_err());

    config.transfer.chunk_size = 0;
    assert!(config.validate().is_err());
}

#[test]
fn oversized_chunk_in_file_is_rejected() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[transfer]\nchunk_size = 4096\n").unwrap();
    assert!(StoreConfig::load_from(file.path()).is_err());
}
