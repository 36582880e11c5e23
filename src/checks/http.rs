//! HTTP reachability check
//!
//! Probes the mirror's base path with redirects disabled. A redirect from
//! `http` to `https` is not a failure: the mirror just stopped serving plain
//! HTTP, so `http` is dropped from its protocol set and the probe re-runs
//! against `https`. The reverse downgrade is always a failure.

use async_trait::async_trait;
use reqwest::{redirect, Client};
use url::Url;

use super::{Check, CheckError, PROBE_TIMEOUT, PROBE_USER_AGENT};
use crate::error::Result;
use crate::mirrors::Mirror;

/// What a 301/302/308 response told us
enum RedirectAction {
    /// Redirect within the probed scheme; the mirror is reachable
    SameScheme,
    /// `http` probe answered with an `https` location
    UpgradeToHttps,
}

/// HTTP reachability probe
pub struct HttpCheck {
    client: Client,
}

impl HttpCheck {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(PROBE_TIMEOUT)
            .redirect(redirect::Policy::none())
            .user_agent(PROBE_USER_AGENT)
            .build()?;

        Ok(Self { client })
    }

    /// Issue one GET against the mirror using the given scheme
    async fn probe_once(
        &self,
        mirror: &Mirror,
        scheme: &str,
    ) -> std::result::Result<Option<RedirectAction>, CheckError> {
        let url = format!(
            "{scheme}://{}/{}",
            mirror.host,
            mirror.path.trim_start_matches('/')
        );

        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                CheckError::Timeout
            } else {
                CheckError::Request(e)
            }
        })?;

        let status = response.status().as_u16();

        match status {
            200 | 404 => Ok(None),
            301 | 302 | 308 => {
                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("");

                redirect_action(scheme, location).map(Some)
            }
            _ => Err(CheckError::UnexpectedStatus(status)),
        }
    }
}

#[async_trait]
impl Check for HttpCheck {
    async fn check(&self, mirror: &Mirror) -> std::result::Result<(), CheckError> {
        let mut scheme = if mirror.supports("http") {
            "http"
        } else {
            "https"
        };

        let mut upgraded = false;

        loop {
            match self.probe_once(mirror, scheme).await? {
                None | Some(RedirectAction::SameScheme) => return Ok(()),
                Some(RedirectAction::UpgradeToHttps) => {
                    if upgraded {
                        return Ok(());
                    }

                    tracing::info!(
                        host = %mirror.host,
                        "Mirror redirects to https, dropping http support"
                    );

                    mirror.remove_protocol("http");
                    scheme = "https";
                    upgraded = true;
                }
            }
        }
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Classify a redirect location against the scheme that was probed
fn redirect_action(
    scheme: &str,
    location: &str,
) -> std::result::Result<RedirectAction, CheckError> {
    let target_scheme = match Url::parse(location) {
        Ok(url) => url.scheme().to_string(),
        // A relative location stays on the probed scheme
        Err(_) => scheme.to_string(),
    };

    match (scheme, target_scheme.as_str()) {
        ("http", "https") => Ok(RedirectAction::UpgradeToHttps),
        ("https", "http") => Err(CheckError::InsecureRedirect(location.to_string())),
        _ => Ok(RedirectAction::SameScheme),
    }
}
