//! Durable state store.
//!
//! One JSON document on disk. Writes go through a temp file in the same
//! directory followed by a rename, so a crash mid-write never leaves a
//! half-written document behind.

use crate::error::KeeperError;
use crate::state::PersistedState;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted document. A missing file is a fresh install, not
    /// an error; a file that exists but fails to parse is reported as
    /// corrupt rather than silently discarded.
    pub fn load(&self) -> Result<PersistedState, KeeperError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no persisted state; starting fresh");
                return Ok(PersistedState::default());
            }
            Err(e) => return Err(KeeperError::from(e)),
        };

        serde_json::from_slice(&bytes).map_err(|e| KeeperError::StoreCorrupt {
            reason: e.to_string(),
        })
    }

    /// Persist the document atomically.
    pub fn save(&self, state: &PersistedState) -> Result<(), KeeperError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_vec_pretty(state).map_err(|e| KeeperError::StoreCorrupt {
            reason: e.to_string(),
        })?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SessionStatus;

    #[test]
    fn missing_file_loads_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        let state = store.load().unwrap();
        assert_eq!(state, PersistedState::default());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));

        let mut state = PersistedState {
            paused: true,
            encrypted_credentials: Some("blob".to_string()),
            ..Default::default()
        };
        state.session.status = SessionStatus::Connected;
        state.session.is_connected = true;

        store.save(&state).unwrap();
        assert_eq!(store.load().unwrap(), state);
    }

    #[test]
    fn save_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("nested/deeper/state.json"));
        store.save(&PersistedState::default()).unwrap();
        assert!(store.path().exists());
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, b"{not json").unwrap();

        let store = StateStore::new(path);
        assert!(matches!(
            store.load(),
            Err(KeeperError::StoreCorrupt { .. })
        ));
    }

    #[test]
    fn save_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        store.save(&PersistedState::default()).unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("state.json")]);
    }
}
