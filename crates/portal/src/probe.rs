//! Reachability probing.
//!
//! A GET against a well-known generate-204 endpoint is the primary signal,
//! but it is ambiguous on its own: with redirects disabled, an interception
//! and some outages can look alike. A secondary fetch of the portal's own
//! login page disambiguates "redirected to portal" from "no network at all".

use crate::classify::page_has_login_form;
use crate::config::PortalConfig;
use reqwest::{Client, StatusCode};
use tracing::debug;

/// Result of one reachability probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The probe endpoint answered 204; traffic is flowing.
    Reachable,
    /// A captive portal is intercepting traffic; login is needed.
    Intercepted,
    /// Neither the probe endpoint nor the portal could be reached.
    Unreachable,
}

/// What the primary probe status tells us before the fallback runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimarySignal {
    Reachable,
    Intercepted,
    Inconclusive,
}

/// Classify the status of the primary generate-204 probe.
pub fn classify_probe_status(status: StatusCode) -> PrimarySignal {
    if status == StatusCode::NO_CONTENT {
        PrimarySignal::Reachable
    } else if status.is_redirection() {
        PrimarySignal::Intercepted
    } else {
        PrimarySignal::Inconclusive
    }
}

/// Issues connectivity probes and classifies the result.
pub struct Prober {
    client: Client,
    config: PortalConfig,
}

impl Prober {
    pub fn new(client: Client, config: PortalConfig) -> Self {
        Self { client, config }
    }

    /// Run the two-stage probe.
    ///
    /// Transport failures on the primary probe mean the network is down, not
    /// that a portal is in the way; only an inconclusive HTTP answer falls
    /// through to the portal-page fallback.
    pub async fn probe(&self) -> ProbeOutcome {
        let response = match self.client.get(&self.config.probe_url).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!(error = %e, "primary probe failed; network unreachable");
                return ProbeOutcome::Unreachable;
            }
        };

        match classify_probe_status(response.status()) {
            PrimarySignal::Reachable => ProbeOutcome::Reachable,
            PrimarySignal::Intercepted => {
                debug!(status = %response.status(), "probe redirected; captive portal suspected");
                ProbeOutcome::Intercepted
            }
            PrimarySignal::Inconclusive => {
                debug!(status = %response.status(), "probe inconclusive; checking portal page");
                self.probe_portal_page().await
            }
        }
    }

    /// Secondary signal: fetch the portal's own login page.
    ///
    /// If the portal answers at all, something on the local network is alive
    /// and interposing itself, so the result is `Intercepted` whether or not
    /// the login-form markers are present. Only a failed fetch means the
    /// network itself is down.
    async fn probe_portal_page(&self) -> ProbeOutcome {
        match self.client.get(&self.config.login_url).send().await {
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                if page_has_login_form(&body) {
                    debug!(%status, "portal login form detected");
                } else {
                    debug!(%status, "portal answered without a login form; still intercepted");
                }
                ProbeOutcome::Intercepted
            }
            Err(e) => {
                debug!(error = %e, "portal page unreachable");
                ProbeOutcome::Unreachable
            }
        }
    }
}
