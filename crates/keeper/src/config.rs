use crate::backoff::BackoffSchedule;
use portal_client::PortalConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Engine configuration.
///
/// Defaults mirror the original deployment: 20-minute portal sessions
/// renewed 2 minutes early, a connectivity check every minute, and a
/// 5/15/45-second backoff on consecutive failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeeperConfig {
    pub portal: PortalConfig,
    /// Full portal session lifetime in seconds.
    pub session_timeout_secs: u64,
    /// Safety buffer subtracted from the lifetime before renewal.
    pub renew_margin_secs: u64,
    /// Period of the connectivity-check timer in seconds.
    pub check_interval_secs: u64,
    /// Delays applied on consecutive failures, in seconds.
    pub retry_delays_secs: Vec<u64>,
    /// Path of the durable state document. Resolved by the caller when
    /// absent (the CLI derives it from the platform data directory).
    pub state_path: Option<PathBuf>,
    /// Path of the credential key file. Resolved like `state_path`.
    pub key_path: Option<PathBuf>,
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            portal: PortalConfig::default(),
            session_timeout_secs: 1200,
            renew_margin_secs: 120,
            check_interval_secs: 60,
            retry_delays_secs: vec![5, 15, 45],
            state_path: None,
            key_path: None,
        }
    }
}

impl KeeperConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn renew_margin(&self) -> Duration {
        Duration::from_secs(self.renew_margin_secs)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn backoff(&self) -> BackoffSchedule {
        BackoffSchedule::from_secs(&self.retry_delays_secs)
    }

    /// Fill in the path fields from a base data directory unless the config
    /// file pinned them explicitly.
    pub fn resolve_paths(&mut self, data_dir: &std::path::Path) {
        if self.state_path.is_none() {
            self.state_path = Some(data_dir.join("state.json"));
        }
        if self.key_path.is_none() {
            self.key_path = Some(data_dir.join("vault.key"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_portal_deployment() {
        let config = KeeperConfig::default();
        assert_eq!(config.session_timeout(), Duration::from_secs(1200));
        assert_eq!(config.renew_margin(), Duration::from_secs(120));
        assert_eq!(config.check_interval(), Duration::from_secs(60));
        assert_eq!(config.backoff().len(), 3);
    }

    #[test]
    fn resolve_paths_respects_explicit_values() {
        let mut config = KeeperConfig {
            state_path: Some(PathBuf::from("/custom/state.json")),
            ..Default::default()
        };
        config.resolve_paths(std::path::Path::new("/data"));
        assert_eq!(config.state_path, Some(PathBuf::from("/custom/state.json")));
        assert_eq!(config.key_path, Some(PathBuf::from("/data/vault.key")));
    }

    #[test]
    fn partial_toml_overlays_defaults() {
        let config: KeeperConfig =
            serde_json::from_str(r#"{"check_interval_secs": 30}"#).unwrap();
        assert_eq!(config.check_interval(), Duration::from_secs(30));
        assert_eq!(config.session_timeout(), Duration::from_secs(1200));
    }
}
