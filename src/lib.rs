//! redirector - Geo-aware HTTP redirector for mirror networks
//!
//! For every incoming request the redirector picks the best mirror for the
//! requesting client, based on geographic distance, per-mirror weight,
//! protocol support, and optional policy rules, and answers with a redirect
//! to that mirror. A background sweep keeps probing every mirror so
//! unavailable ones are never selected.
//!
//! # Architecture
//!
//! - [`config`] - YAML configuration loading
//! - [`geo`] - geo-IP provider trait, MaxMind backend, haversine distance
//! - [`rules`] - per-mirror eligibility rules over the request fact set
//! - [`mirrors`] - the mirror catalog, its indices, and the selection engine
//! - [`checks`] - HTTP, TLS, and version health probes plus the sweep driver
//! - [`dlmap`] - download path-remap table loaders
//! - [`metrics`] - Prometheus counters
//! - [`server`] - application state, reload coordination, HTTP surface
//!
//! # Example
//!
//! ```no_run
//! use redirector::server::{self, Redirector};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let app = Redirector::new("dlrouter.yaml".into()).await?;
//!     app.start_health_loop();
//!     server::serve(app).await?;
//!     Ok(())
//! }
//! ```

pub mod checks;
pub mod config;
pub mod dlmap;
pub mod error;
pub mod geo;
pub mod metrics;
pub mod mirrors;
pub mod rules;
pub mod server;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::geo::{distance, Provider};
    pub use crate::mirrors::{Catalog, Mirror, Selector};
    pub use crate::server::Redirector;
}

pub use error::{Error, Result};
