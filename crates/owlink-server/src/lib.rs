//! owlink-server library entry point.
//!
//! Exposes a local 1-Wire adapter to remote `owlink-client`s over an
//! authenticated TCP tunnel.  The binary in `main.rs` and the integration
//! tests in `tests/` share this module tree.
//!
//! ```text
//! TunnelServer (accept loop)
//!  └─ Session per connection   -- handshake, request loop, exclusivity release
//!       └─ dispatch::handle_request
//!            └─ Arc<dyn BusAdapter>   -- usually LocalAdapter<SimulatedBus>
//! ```

pub mod application;
pub mod infrastructure;

pub use infrastructure::network::server::{ServerError, ServerHandle, ServerOptions, TunnelServer};
pub use infrastructure::storage::config::{ConfigError, ServerConfig};
