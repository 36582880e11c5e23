//! Application state, reload coordination, and the HTTP surface
//!
//! [`Redirector`] owns everything the handlers share: the catalog, the geo
//! handles, the decision cache, the download map, and the health checker.
//! Reload rebuilds all of it from the configuration file and publishes each
//! piece atomically; readers never see a partially reconstructed catalog.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

use crate::checks::{HealthChecker, SWEEP_INTERVAL};
use crate::config::{random_sequence, Config};
use crate::dlmap;
use crate::error::{Error, Result};
use crate::geo::{MaxmindProvider, Provider};
use crate::mirrors::{Catalog, CatalogBuilder, Selector};

pub mod assets;
pub mod handlers;
pub mod middleware;

/// Shared application state
pub struct Redirector {
    config_path: PathBuf,
    config: RwLock<Config>,
    geo: RwLock<Arc<dyn Provider>>,
    catalog: RwLock<Arc<Catalog>>,
    selector: Selector,
    dl_map: RwLock<Option<Arc<HashMap<String, String>>>>,
    checker: RwLock<Arc<HealthChecker>>,
}

impl Redirector {
    /// Load the configuration file and perform the startup reload.
    ///
    /// Startup errors are returned to the caller and are fatal there;
    /// runtime reload errors keep the previous state serving.
    pub async fn new(config_path: PathBuf) -> Result<Arc<Self>> {
        let mut config = Config::load(&config_path)?;

        if config.reload_token.is_empty() {
            config.reload_token = random_sequence(32);
            tracing::debug!(token = %config.reload_token, "Generated reload token");
        }

        let geo: Arc<dyn Provider> = Arc::new(MaxmindProvider::open(
            &config.geodb,
            config.asndb.as_deref(),
        )?);

        let checker = Arc::new(HealthChecker::new(&config)?);

        let selector = Selector::new(config.cache_size, config.top_choices, config.max_deviation);

        let app = Arc::new(Self {
            config_path,
            config: RwLock::new(config.clone()),
            geo: RwLock::new(geo.clone()),
            catalog: RwLock::new(Arc::new(Catalog::empty())),
            selector,
            dl_map: RwLock::new(None),
            checker: RwLock::new(checker),
        });

        app.apply(config, geo).await?;

        Ok(app)
    }

    /// Re-read the configuration file and reconcile all state against it.
    ///
    /// Geo database open failures abort the reload before anything is
    /// mutated; mirror entries that fail to resolve are skipped with a
    /// warning rather than failing the whole reload.
    pub async fn reload(self: &Arc<Self>) -> Result<()> {
        let mut config = Config::load(&self.config_path)?;

        if config.reload_token.is_empty() {
            // A token configured only by generation survives reloads
            config.reload_token = self.config.read().await.reload_token.clone();
        }

        let geo: Arc<dyn Provider> = Arc::new(MaxmindProvider::open(
            &config.geodb,
            config.asndb.as_deref(),
        )?);

        self.apply(config, geo).await
    }

    /// Publish freshly opened geo handles and rebuild everything else from
    /// the new configuration. Shared by startup and reload.
    async fn apply(self: &Arc<Self>, config: Config, geo: Arc<dyn Provider>) -> Result<()> {
        // Parse the download map before mutating anything, so a bad file
        // fails the reload with the previous state intact
        let dl_map = match &config.dl_map {
            Some(path) => Some(Arc::new(
                dlmap::load(path).map_err(|e| Error::reload(e.to_string()))?,
            )),
            None => None,
        };

        let checker = Arc::new(HealthChecker::new(&config)?);

        *self.geo.write().await = geo.clone();

        self.selector.resize(config.cache_size);

        *self.dl_map.write().await = dl_map;

        // Reconcile the mirror set, preserving counters for existing hosts
        let previous = self.catalog.read().await.clone();
        let mut builder = CatalogBuilder::new(previous.as_ref());

        for entry in &config.servers {
            if let Err(e) = builder.add_or_update(entry, geo.as_ref()).await {
                tracing::warn!(server = %entry.server, error = %e, "Skipping mirror entry");
            }
        }

        let catalog = Arc::new(builder.finish());

        self.selector
            .set_top_choices(config.top_choices, catalog.len());
        self.selector.set_max_deviation(config.max_deviation);

        *self.catalog.write().await = catalog.clone();
        *self.checker.write().await = checker;
        *self.config.write().await = config;

        tracing::info!(mirrors = catalog.len(), "Catalog reloaded");

        // Kick off a full sweep so fresh state converges quickly
        self.spawn_sweep();

        Ok(())
    }

    /// Run one health sweep over the current catalog
    pub async fn sweep_once(&self) {
        let catalog = self.catalog.read().await.clone();
        let checker = self.checker.read().await.clone();

        checker.sweep(catalog.mirrors(), &self.selector).await;
    }

    /// Spawn a one-shot sweep in the background
    pub fn spawn_sweep(self: &Arc<Self>) {
        let app = self.clone();

        tokio::spawn(async move {
            app.sweep_once().await;
        });
    }

    /// Start the periodic sweep driver
    pub fn start_health_loop(self: &Arc<Self>) {
        let app = self.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);

            // The startup sweep already ran; the first tick is immediate
            interval.tick().await;

            loop {
                interval.tick().await;
                app.sweep_once().await;
            }
        });
    }

    pub async fn catalog(&self) -> Arc<Catalog> {
        self.catalog.read().await.clone()
    }

    pub async fn geo(&self) -> Arc<dyn Provider> {
        self.geo.read().await.clone()
    }

    pub async fn dl_map(&self) -> Option<Arc<HashMap<String, String>>> {
        self.dl_map.read().await.clone()
    }

    pub async fn config(&self) -> Config {
        self.config.read().await.clone()
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }
}

/// Build the router with all routes and layers
pub fn router(app: Arc<Redirector>) -> Router {
    Router::new()
        .route("/status", get(handlers::status))
        .route("/mirrors", get(handlers::legacy_mirrors))
        .route("/mirrors.json", get(handlers::mirrors))
        .route("/mirrors/:badge", get(handlers::mirror_status))
        .route("/reload", post(handlers::reload))
        .route("/dl_map", get(handlers::dl_map))
        .route("/geoip", get(handlers::geoip))
        .route("/metrics", get(handlers::metrics))
        .fallback(handlers::redirect)
        .layer(axum::middleware::from_fn(middleware::real_ip))
        .layer(TraceLayer::new_for_http())
        .with_state(app)
}

/// Bind and serve until the process exits
pub async fn serve(app: Arc<Redirector>) -> Result<()> {
    let bind = app.config.read().await.bind_address();

    let listener = tokio::net::TcpListener::bind(&bind).await?;

    tracing::info!(bind = %bind, "Listening");

    axum::serve(
        listener,
        router(app).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Request-path errors become an HTTP status plus a short body
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, self.to_string()).into_response()
    }
}
