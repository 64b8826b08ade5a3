//! Balancer runtime initialization and lifecycle management.
//!
//! Builds every component from an [`AppConfig`](crate::config::AppConfig),
//! starts the background tasks and coordinates their shutdown.
//!
//! # Example
//!
//! ```no_run
//! use balancer_core::{config::AppConfig, runtime::BalancerRuntime};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AppConfig::load()?;
//!
//!     let runtime = BalancerRuntime::builder().with_config(config).build().await?;
//!
//!     // Access components for HTTP server
//!     let proxy = runtime.proxy_engine();
//!
//!     // ... set up HTTP routes ...
//!
//!     runtime.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod components;
pub mod lifecycle;

pub use builder::{BalancerRuntimeBuilder, RuntimeError};
pub use components::BalancerComponents;
pub use lifecycle::{BalancerRuntime, SHUTDOWN_GRACE_PERIOD};
