//! HTTP endpoint handlers
//!
//! Every named route lives here, along with the fallback redirect handler
//! that is the actual product: it translates the request into a
//! (scheme, client address, path) triple and answers with a 302 to the
//! selected mirror.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};

use super::assets;
use super::middleware::{is_private_or_loopback, ClientInfo};
use super::Redirector;
use crate::error::Error;
use crate::metrics;
use crate::mirrors::selection::weighted_random;
use crate::mirrors::MirrorInfo;

/// Fallback client address for requests from the local network, so local
/// testing still geolocates somewhere real
const FALLBACK_OVERRIDE_IP: IpAddr = IpAddr::V4(std::net::Ipv4Addr::new(1, 1, 1, 1));

/// `GET /status`
pub async fn status() -> &'static str {
    "OK"
}

/// `GET /mirrors`: region code to full mirror URLs, the legacy shape
pub async fn legacy_mirrors(
    State(app): State<Arc<Redirector>>,
    Extension(client): Extension<ClientInfo>,
) -> Json<HashMap<String, Vec<String>>> {
    let catalog = app.catalog().await;
    let scheme = client.scheme.unwrap_or_else(|| "https".to_string());

    let mut output = HashMap::new();

    for (region, mirrors) in catalog.regions() {
        let urls = mirrors
            .iter()
            .map(|m| format!("{scheme}://{}/{}", m.host, m.path.trim_start_matches('/')))
            .collect();

        output.insert(region.clone(), urls);
    }

    Json(output)
}

/// `GET /mirrors.json`: full mirror records
pub async fn mirrors(State(app): State<Arc<Redirector>>) -> Json<Vec<MirrorInfo>> {
    let catalog = app.catalog().await;

    Json(catalog.mirrors().iter().map(|m| m.snapshot()).collect())
}

/// `GET /mirrors/{host}.svg`: status badge, with `_` standing in for `.`
pub async fn mirror_status(
    State(app): State<Arc<Redirector>>,
    Path(badge): Path<String>,
    headers: HeaderMap,
) -> Response {
    let svg_headers = [
        (header::CONTENT_TYPE, "image/svg+xml;charset=utf-8"),
        (header::CACHE_CONTROL, "max-age=120"),
    ];

    let host = match badge.strip_suffix(".svg") {
        Some(stem) if !stem.is_empty() => stem.replace('_', "."),
        _ => return (svg_headers, assets::STATUS_UNKNOWN).into_response(),
    };

    let catalog = app.catalog().await;

    let mirror = match catalog.host(&host) {
        Some(mirror) => mirror,
        None => return (svg_headers, assets::STATUS_UNKNOWN).into_response(),
    };

    let key = if mirror.is_available() {
        "online"
    } else {
        "offline"
    };

    let etag = format!("\"{key}\"");

    if let Some(candidate) = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
    {
        if candidate.trim_matches('"') == key {
            return StatusCode::NOT_MODIFIED.into_response();
        }
    }

    let body = if mirror.is_available() {
        assets::STATUS_UP
    } else {
        assets::STATUS_DOWN
    };

    (svg_headers, [(header::ETAG, etag)], body).into_response()
}

/// `POST /reload`: bearer-token gated configuration reload
pub async fn reload(
    State(app): State<Arc<Redirector>>,
    headers: HeaderMap,
) -> Result<&'static str, Error> {
    let token = bearer_token(&headers).ok_or(Error::Unauthorized)?;

    if token != app.config().await.reload_token {
        return Err(Error::Unauthorized);
    }

    app.reload().await?;

    Ok("OK")
}

/// `GET /dl_map`: the active remap table, or 404 when none is loaded
pub async fn dl_map(State(app): State<Arc<Redirector>>) -> Response {
    match app.dl_map().await {
        Some(map) => Json(map.as_ref().clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// `GET /geoip`: the caller's own city record
pub async fn geoip(
    State(app): State<Arc<Redirector>>,
    Extension(client): Extension<ClientInfo>,
) -> Result<Response, Error> {
    let city = app.geo().await.city(client.ip)?;

    Ok(Json(city).into_response())
}

/// `GET /metrics`: Prometheus text exposition
pub async fn metrics() -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather(),
    )
        .into_response()
}

/// The fallback handler: redirect to the best mirror.
///
/// `/region/<code>/…` paths bypass geo selection and draw a weighted random
/// mirror from that region instead.
pub async fn redirect(
    State(app): State<Arc<Redirector>>,
    Extension(client): Extension<ClientInfo>,
    uri: Uri,
) -> Result<Response, Error> {
    let catalog = app.catalog().await;
    let config = app.config().await;

    let mut request_path = uri.path().to_string();
    let mut chosen = None;

    if let Some(rest) = request_path.strip_prefix("/region") {
        let mut parts = rest.trim_start_matches('/').splitn(2, '/');

        let code = match parts.next() {
            Some(code) if !code.is_empty() => code.to_string(),
            _ => {
                return Err(Error::InputInvalid(
                    "missing region code in path".to_string(),
                ))
            }
        };

        if let Some(mirrors) = catalog.region(&code) {
            chosen = Some(weighted_random(mirrors)?);
            request_path = parts.next().unwrap_or("").to_string();
        }
    }

    let scheme = client.scheme.unwrap_or_else(|| "https".to_string());

    let (mirror, distance) = match chosen {
        Some(mirror) => (mirror, 0.0),
        None => {
            let ip = effective_ip(client.ip, config.override_ip);
            let geo = app.geo().await;

            app.selector()
                .closest(catalog.as_ref(), geo.as_ref(), &scheme, ip)?
        }
    };

    let mut redirect_path = join_path(&mirror.path, &request_path);

    if let Some(map) = app.dl_map().await {
        if let Some(mapped) = map.get(request_path.trim_start_matches('/')) {
            metrics::DOWNLOADS_MAPPED.inc();
            redirect_path = join_path(&mirror.path, mapped);
        }
    }

    // Preserve a trailing slash from the request
    if request_path.ends_with('/') && !redirect_path.ends_with('/') {
        redirect_path.push('/');
    }

    mirror.redirects.inc();
    metrics::REDIRECTS_SERVED.inc();

    let location = format!("{scheme}://{}{redirect_path}", mirror.host);

    let mut response = (StatusCode::FOUND, "").into_response();

    response
        .headers_mut()
        .insert(header::LOCATION, location.parse().map_err(|_| {
            Error::InputInvalid(format!("redirect location is invalid: {location}"))
        })?);

    if distance > 0.0 {
        if let Ok(value) = format!("{distance:.6}").parse() {
            response.headers_mut().insert("X-Geo-Distance", value);
        }
    }

    Ok(response)
}

/// Requests from the local network are geolocated as the override address
fn effective_ip(ip: IpAddr, override_ip: Option<IpAddr>) -> IpAddr {
    if is_private_or_loopback(ip) {
        override_ip.unwrap_or(FALLBACK_OVERRIDE_IP)
    } else {
        ip
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Join a mirror's base path and a request path into one absolute path
fn join_path(base: &str, tail: &str) -> String {
    let base = base.trim_matches('/');
    let tail = tail.trim_start_matches('/');

    match (base.is_empty(), tail.is_empty()) {
        (true, true) => "/".to_string(),
        (true, false) => format!("/{tail}"),
        (false, true) => format!("/{base}"),
        (false, false) => format!("/{base}/{tail}"),
    }
}
