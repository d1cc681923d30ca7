//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads the server's TOML file, falls back to
//! defaults when it does not exist yet, and can write a fresh default file
//! for `owlink-server --init-config`.

pub mod config;
