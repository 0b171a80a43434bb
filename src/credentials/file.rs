//! Multi-file credential store
//!
//! Layout of the session directory:
//!
//! ```text
//! <session_dir>/creds.json          device identity document
//! <session_dir>/<key-name>.json     one file per key document
//! ```
//!
//! Key names are mapped to file names by replacing `/` with `__` and `:`
//! with `-`. Each key file records the original name so the mapping never
//! has to be reversed. Every write goes to a temp file that is renamed into
//! place, so a crash mid-write leaves the previous version intact.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

use super::{CredentialError, CredentialStore, Credentials, CredentialsUpdate};

const CREDS_FILE: &str = "creds.json";
const TMP_SUFFIX: &str = ".tmp";

/// On-disk wrapper for a key document
#[derive(Serialize, Deserialize)]
struct KeyFile {
    name: String,
    value: Value,
}

/// Credential store backed by a directory of JSON files
pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Create the session directory if it doesn't exist
    pub async fn ensure_dir(&self) -> Result<(), CredentialError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error(&self.dir, e))
    }

    /// File for key `name`. The mapping is not one-to-one (`a:b` and `a-b`
    /// share a file), matching the layout other clients already wrote.
    fn key_path(&self, name: &str) -> Result<PathBuf, CredentialError> {
        if name.is_empty() || name.starts_with('.') || name.contains('\\') || name == "creds" {
            return Err(CredentialError::InvalidKey(name.to_string()));
        }
        let file_name = format!("{}.json", name.replace('/', "__").replace(':', "-"));
        Ok(self.dir.join(file_name))
    }

    async fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), CredentialError> {
        let data = serde_json::to_vec(value).map_err(|e| CredentialError::Corrupt {
            path: path.display().to_string(),
            source: e,
        })?;

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(TMP_SUFFIX);
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, &data).await.map_err(|e| io_error(&tmp, e))?;
        fs::rename(&tmp, path).await.map_err(|e| io_error(path, e))
    }

    async fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, CredentialError> {
        let data = fs::read(path).await.map_err(|e| io_error(path, e))?;
        serde_json::from_slice(&data).map_err(|e| CredentialError::Corrupt {
            path: path.display().to_string(),
            source: e,
        })
    }
}

#[async_trait::async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> Result<Credentials, CredentialError> {
        self.ensure_dir().await?;

        let mut credentials = Credentials::default();
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| io_error(&self.dir, e))?;

        while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(&self.dir, e))? {
            let path = entry.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !file_name.ends_with(".json") {
                continue;
            }

            if file_name == CREDS_FILE {
                match Self::read_json(&path).await {
                    Ok(creds) => credentials.creds = creds,
                    Err(e) => {
                        // Start unpaired; the next creds update replaces the file
                        warn!(error = %e, "Ignoring unreadable creds file, pairing will be required");
                    }
                }
            } else {
                match Self::read_json::<KeyFile>(&path).await {
                    Ok(key) => {
                        credentials.keys.insert(key.name, key.value);
                    }
                    Err(e) => {
                        // A damaged key only costs one re-established session
                        warn!(error = %e, "Skipping unreadable key file");
                    }
                }
            }
        }

        if credentials.is_empty() {
            info!(path = %self.dir.display(), "No stored credentials, pairing will be required");
        } else {
            debug!(
                path = %self.dir.display(),
                keys = credentials.keys.len(),
                "Loaded stored credentials"
            );
        }

        Ok(credentials)
    }

    async fn apply(&self, update: &CredentialsUpdate) -> Result<(), CredentialError> {
        self.ensure_dir().await?;

        if let Some(ref creds) = update.creds {
            self.write_json(&self.dir.join(CREDS_FILE), creds).await?;
        }

        for (name, value) in &update.keys {
            let path = self.key_path(name)?;
            match value {
                Some(value) => {
                    let key = KeyFile {
                        name: name.clone(),
                        value: value.clone(),
                    };
                    self.write_json(&path, &key).await?;
                }
                None => match fs::remove_file(&path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(io_error(&path, e)),
                },
            }
        }

        debug!(
            creds = update.creds.is_some(),
            keys = update.keys.len(),
            "Persisted credential update"
        );
        Ok(())
    }

    async fn clear(&self) -> Result<(), CredentialError> {
        match fs::remove_dir_all(&self.dir).await {
            Ok(()) => {
                info!(path = %self.dir.display(), "Deleted session directory");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&self.dir, e)),
        }
    }
}

fn io_error(path: &Path, source: std::io::Error) -> CredentialError {
    CredentialError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn update(creds: Option<Value>, keys: &[(&str, Option<Value>)]) -> CredentialsUpdate {
        CredentialsUpdate {
            creds,
            keys: keys
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[tokio::test]
    async fn test_load_creates_missing_dir() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("session");
        let store = FileCredentialStore::new(&dir);

        let creds = store.load().await.unwrap();
        assert!(creds.is_empty());
        assert!(dir.is_dir());
    }

    #[tokio::test]
    async fn test_round_trip_through_disk() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileCredentialStore::new(temp_dir.path());

        store
            .apply(&update(
                Some(json!({"me": {"id": "5548991196884:3@s.whatsapp.net"}})),
                &[
                    ("pre-key-1", Some(json!({"private": "x"}))),
                    ("session-5548:3@s.whatsapp.net", Some(json!({"chain": 1}))),
                    ("app-state/regular", Some(json!({"v": 2}))),
                ],
            ))
            .await
            .unwrap();

        assert!(temp_dir.path().join("creds.json").exists());
        assert!(temp_dir.path().join("app-state__regular.json").exists());
        assert!(temp_dir.path().join("session-5548-3@s.whatsapp.net.json").exists());

        // A fresh store over the same directory sees the same credentials
        let loaded = FileCredentialStore::new(temp_dir.path()).load().await.unwrap();
        assert_eq!(loaded.creds["me"]["id"], "5548991196884:3@s.whatsapp.net");
        assert_eq!(loaded.keys.len(), 3);
        assert_eq!(loaded.keys["session-5548:3@s.whatsapp.net"]["chain"], 1);
        assert_eq!(loaded.keys["app-state/regular"]["v"], 2);
    }

    #[tokio::test]
    async fn test_later_updates_win() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileCredentialStore::new(temp_dir.path());

        for i in 0..5 {
            store
                .apply(&update(Some(json!({"counter": i})), &[]))
                .await
                .unwrap();
        }

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.creds["counter"], 4);
    }

    #[tokio::test]
    async fn test_key_deletion() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileCredentialStore::new(temp_dir.path());

        store
            .apply(&update(None, &[("pre-key-7", Some(json!(1)))]))
            .await
            .unwrap();
        store.apply(&update(None, &[("pre-key-7", None)])).await.unwrap();
        // Deleting a key that was never written is fine
        store.apply(&update(None, &[("pre-key-8", None)])).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert!(loaded.keys.is_empty());
    }

    #[tokio::test]
    async fn test_rejects_bad_key_names() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileCredentialStore::new(temp_dir.path());

        for name in ["", "creds", ".hidden", "a\\b"] {
            let result = store.apply(&update(None, &[(name, Some(json!(1)))])).await;
            assert!(matches!(result, Err(CredentialError::InvalidKey(_))), "{name}");
        }
    }

    #[tokio::test]
    async fn test_clear_removes_directory() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("session");
        let store = FileCredentialStore::new(&dir);

        store
            .apply(&update(Some(json!({"paired": true})), &[]))
            .await
            .unwrap();
        store.clear().await.unwrap();
        assert!(!dir.exists());

        // Clearing twice is not an error
        store.clear().await.unwrap();

        // Next load starts over with an empty directory
        assert!(store.load().await.unwrap().is_empty());
        assert!(dir.is_dir());
    }

    #[tokio::test]
    async fn test_corrupt_creds_file_starts_unpaired() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("creds.json"), b"{not json").unwrap();

        let store = FileCredentialStore::new(temp_dir.path());
        store
            .apply(&update(None, &[("pre-key-1", Some(json!(1)))]))
            .await
            .unwrap();

        let loaded = tokio_test::assert_ok!(store.load().await);
        assert!(loaded.creds.is_null());
        assert_eq!(loaded.keys.len(), 1);

        // The next update overwrites the damaged file
        store
            .apply(&update(Some(json!({"paired": true})), &[]))
            .await
            .unwrap();
        assert_eq!(store.load().await.unwrap().creds["paired"], true);
    }

    #[tokio::test]
    async fn test_colliding_key_names_share_a_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileCredentialStore::new(temp_dir.path());

        store
            .apply(&update(None, &[("a:b", Some(json!(1)))]))
            .await
            .unwrap();
        store.apply(&update(None, &[("a-b", None)])).await.unwrap();

        assert!(store.load().await.unwrap().keys.is_empty());
    }
}
