//! jwtproxy library
//!
//! A reverse proxy that only lets requests through when they carry a valid
//! RS256 bearer token from a trusted issuer.
//!
//! # Features
//!
//! - **Multi-issuer trust store**: one RSA public key per issuer
//! - **Pinned algorithm**: RS256 only, no negotiation
//! - **Injectable clock**: expiry checks are deterministic under test
//! - **Path rewriting**: strip a prefix before forwarding
//! - **Access log**: one JSON line per request
//!
//! # Example
//!
//! ```no_run
//! use jwtproxy::{config::{Cli, Config}, server::Server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(&Cli::default())?;
//!     let server = Server::from_config(&config).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod metrics;
pub mod pipeline;
pub mod server;

// Re-export commonly used types
pub use config::Config;
pub use pipeline::Pipeline;
pub use server::Server;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
