//! JSON snapshot persistence for registered clients and live access tokens.
//!
//! The whole state is rewritten after every mutation. Authorization codes are
//! never persisted.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::model::{AccessToken, RegisteredClient};
use crate::pkce::random_string;

/// File name of the snapshot inside the persistence directory.
pub const SNAPSHOT_FILE: &str = "oauth_clients.json";

/// Snapshot as written to disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub clients: HashMap<String, RegisteredClient>,
    #[serde(rename = "accessTokens", default)]
    pub access_tokens: HashMap<String, AccessToken>,
    #[serde(rename = "savedAt")]
    pub saved_at: DateTime<Utc>,
}

/// Current format, with `clients` optional so that a legacy file is recognised.
#[derive(Deserialize)]
struct RawSnapshot {
    clients: Option<HashMap<String, RegisteredClient>>,
    #[serde(rename = "accessTokens", default)]
    access_tokens: HashMap<String, AccessToken>,
}

/// State recovered at startup.
#[derive(Debug, Default)]
pub struct LoadedState {
    pub clients: HashMap<String, RegisteredClient>,
    pub access_tokens: HashMap<String, AccessToken>,
}

/// File-backed snapshot store.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    /// Open the store in `dir`, creating it owner-only if missing.
    ///
    /// If the directory cannot be created the snapshot lives in the working
    /// directory instead.
    pub fn open(dir: &Path) -> Self {
        match create_private_dir(dir) {
            Ok(()) => Self::at(dir.join(SNAPSHOT_FILE)),
            Err(e) => {
                tracing::warn!(
                    dir = %dir.display(),
                    error = %e,
                    "Could not create persistence directory, using working directory"
                );
                Self::at(PathBuf::from(SNAPSHOT_FILE))
            }
        }
    }

    /// Use an explicit snapshot file path.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the snapshot, dropping tokens that have already expired.
    ///
    /// A missing or unreadable file yields empty state. Files holding only a
    /// `client_id → client` map are accepted as the legacy format.
    pub fn load(&self) -> LoadedState {
        if !self.path.exists() {
            return LoadedState::default();
        }
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to read OAuth snapshot");
                return LoadedState::default();
            }
        };

        if let Ok(RawSnapshot {
            clients: Some(clients),
            access_tokens,
        }) = serde_json::from_slice::<RawSnapshot>(&data)
        {
            let now = Utc::now();
            let total = access_tokens.len();
            let access_tokens: HashMap<_, _> = access_tokens
                .into_iter()
                .filter(|(_, t)| !t.is_expired(now))
                .collect();
            tracing::info!(
                clients = clients.len(),
                access_tokens = access_tokens.len(),
                dropped_expired = total - access_tokens.len(),
                "Loaded OAuth state"
            );
            return LoadedState {
                clients,
                access_tokens,
            };
        }

        match serde_json::from_slice::<HashMap<String, RegisteredClient>>(&data) {
            Ok(clients) => {
                tracing::info!(clients = clients.len(), "Loaded OAuth clients (legacy format)");
                LoadedState {
                    clients,
                    access_tokens: HashMap::new(),
                }
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to parse OAuth snapshot");
                LoadedState::default()
            }
        }
    }

    /// Write the snapshot atomically with owner-only permissions.
    pub fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let data = serde_json::to_vec_pretty(snapshot)?;
        let tmp = self.temp_path();
        let io_err = |path: &Path| {
            let path = path.display().to_string();
            move |source| StoreError::Io { path, source }
        };

        let mut file = private_file(&tmp).map_err(io_err(&tmp))?;
        let written = file.write_all(&data).and_then(|()| file.sync_all());
        drop(file);
        if let Err(e) = written.and_then(|()| fs::rename(&tmp, &self.path)) {
            let _ = fs::remove_file(&tmp);
            return Err(io_err(&self.path)(e));
        }

        tracing::debug!(
            clients = snapshot.clients.len(),
            access_tokens = snapshot.access_tokens.len(),
            "Saved OAuth state"
        );
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(SNAPSHOT_FILE);
        self.path
            .with_file_name(format!(".{name}.{}.tmp", random_string(12)))
    }
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dir)
}

#[cfg(unix)]
fn private_file(path: &Path) -> std::io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn private_file(path: &Path) -> std::io::Result<fs::File> {
    fs::OpenOptions::new().write(true).create_new(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn client(id: &str) -> RegisteredClient {
        RegisteredClient {
            client_id: id.to_string(),
            client_secret: "secret".to_string(),
            redirect_uris: vec!["https://claude.ai/api/mcp/auth_callback".to_string()],
            grant_types: vec!["authorization_code".to_string()],
            created_at: Utc::now(),
            client_name: "Claude".to_string(),
        }
    }

    fn token(token: &str, expires_at: DateTime<Utc>) -> AccessToken {
        AccessToken {
            token: token.to_string(),
            refresh_token: format!("{token}-refresh"),
            client_id: "c1".to_string(),
            scope: "mcp".to_string(),
            resource: String::new(),
            expires_at,
            username: "alice".to_string(),
        }
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path());
        let state = store.load();
        assert!(state.clients.is_empty());
        assert!(state.access_tokens.is_empty());
    }

    #[test]
    fn test_round_trip_drops_expired_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path());
        let now = Utc::now();

        let snapshot = Snapshot {
            clients: HashMap::from([("c1".to_string(), client("c1"))]),
            access_tokens: HashMap::from([
                ("live".to_string(), token("live", now + Duration::hours(1))),
                ("dead".to_string(), token("dead", now - Duration::minutes(1))),
            ]),
            saved_at: now,
        };
        store.save(&snapshot).unwrap();

        let state = store.load();
        assert_eq!(state.clients["c1"], snapshot.clients["c1"]);
        assert!(state.access_tokens.contains_key("live"));
        assert!(!state.access_tokens.contains_key("dead"));
        assert_eq!(state.access_tokens["live"].username, "alice");
    }

    #[test]
    fn test_legacy_clients_only_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SNAPSHOT_FILE);
        let legacy = HashMap::from([("c1".to_string(), client("c1"))]);
        fs::write(&path, serde_json::to_vec(&legacy).unwrap()).unwrap();

        let state = SnapshotStore::at(&path).load();
        assert_eq!(state.clients.len(), 1);
        assert_eq!(state.clients["c1"].client_name, "Claude");
        assert!(state.access_tokens.is_empty());
    }

    #[test]
    fn test_corrupt_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SNAPSHOT_FILE);
        fs::write(&path, b"{ not json").unwrap();
        let state = SnapshotStore::at(&path).load();
        assert!(state.clients.is_empty());
    }

    #[test]
    fn test_save_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path());
        store.save(&Snapshot::default()).unwrap();
        store.save(&Snapshot::default()).unwrap();
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_owner_only_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("nested").join(".mcpproxy");
        let store = SnapshotStore::open(&dir);
        store.save(&Snapshot::default()).unwrap();

        let dir_mode = fs::metadata(&dir).unwrap().permissions().mode() & 0o777;
        let file_mode = fs::metadata(store.path()).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);
        assert_eq!(file_mode, 0o600);
    }
}
