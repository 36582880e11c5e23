//! Prometheus metrics for the redirector
//!
//! Two static counters cover the request path; per-mirror redirect counters
//! are registered dynamically as mirrors enter the catalog and unregistered
//! when they leave, keeping the historical per-host metric names.

use lazy_static::lazy_static;
use prometheus::{register_counter, Counter, Encoder, Opts, TextEncoder};

lazy_static! {
    /// Total redirects served
    pub static ref REDIRECTS_SERVED: Counter = register_counter!(
        "armbian_router_redirects",
        "The total number of processed redirects"
    )
    .unwrap();

    /// Total requests resolved through the download map
    pub static ref DOWNLOADS_MAPPED: Counter = register_counter!(
        "armbian_router_download_maps",
        "The total number of mapped download paths"
    )
    .unwrap();
}

/// Replace characters that are invalid in a metric name
pub fn sanitize_host(host: &str) -> String {
    host.replace(['.', '-'], "_")
}

/// Create and register the redirect counter for a mirror host.
///
/// Registration failures (a host re-entering the catalog within one process
/// lifetime without a clean unregister) are logged and the counter is still
/// returned usable.
pub fn mirror_redirect_counter(host: &str) -> Counter {
    let opts = Opts::new(
        format!("armbian_router_redirects_{}", sanitize_host(host)),
        format!("The number of redirects for mirror {host}"),
    );

    let counter = Counter::with_opts(opts).unwrap();

    if let Err(e) = prometheus::default_registry().register(Box::new(counter.clone())) {
        tracing::warn!(host = %host, error = %e, "Unable to register mirror counter");
    }

    counter
}

/// Drop a mirror's counter from the registry when the mirror is removed
pub fn unregister_mirror_counter(counter: &Counter) {
    let _ = prometheus::default_registry().unregister(Box::new(counter.clone()));
}

/// Render all registered metrics in the text exposition format
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::default_registry().gather();

    let mut buf = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buf) {
        tracing::error!(error = %e, "Unable to encode metrics");
    }

    String::from_utf8(buf).unwrap_or_default()
}
