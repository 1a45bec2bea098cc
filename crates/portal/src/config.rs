use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Endpoints and timing for one portal deployment.
///
/// Defaults target the IITG `agnigarh` gateway; every field can be overridden
/// from the config file for other deployments of the same portal software.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    /// Login page URL, fetched to obtain the one-time `magic` token.
    pub login_url: String,
    /// Portal origin; the login form is POSTed to `<base_url>/`.
    pub base_url: String,
    /// Content-free connectivity probe endpoint, expected to answer 204.
    pub probe_url: String,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            login_url: "https://agnigarh.iitg.ac.in:1442/login?".to_string(),
            base_url: "https://agnigarh.iitg.ac.in:1442".to_string(),
            probe_url: "https://connectivitycheck.gstatic.com/generate_204".to_string(),
            request_timeout_secs: 15,
        }
    }
}

impl PortalConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// URL the login form is submitted to.
    pub fn submit_url(&self) -> String {
        format!("{}/", self.base_url.trim_end_matches('/'))
    }
}
