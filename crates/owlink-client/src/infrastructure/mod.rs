//! Infrastructure layer for the client.
//!
//! Contains the OS-facing pieces: the TCP tunnel, the UDP probe and the
//! configuration file.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `owlink_core`, but MUST NOT be imported by the `application` layer.

pub mod config;
pub mod network;
