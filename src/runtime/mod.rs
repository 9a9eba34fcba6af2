//! Runtime host: configuration, the router boundary, and the HTTP server.

mod config;
mod router;
mod server;

pub use config::GatewayConfig;
pub use router::{BuildError, Router};
pub use server::GatewayServer;
