//! Infrastructure layer for the tunnel server.
//!
//! Contains the OS-facing pieces: TCP and UDP sockets, threads, and the
//! configuration file.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `owlink_core`, but MUST NOT be imported by the `application` layer.

pub mod network;
pub mod storage;
