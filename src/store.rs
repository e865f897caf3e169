//! Entry persistence
//!
//! One pretty-printed TOML file per entry id under
//! `~/.config/selfmon/entries/`.

use crate::config::config_dir;
use crate::flow::EntryData;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

const ENTRIES_DIR: &str = "entries";
const ENTRY_EXTENSION: &str = "toml";

#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem access failed
    #[error("Entry store I/O at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Stored entry could not be parsed
    #[error("Failed to parse entry {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize entry: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Entry ids become file names
    #[error("Invalid entry id: {0:?}")]
    InvalidId(String),
}

pub struct EntryStore {
    dir: PathBuf,
}

impl EntryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store under `~/.config/selfmon/entries`
    pub fn default_location() -> Self {
        let mut dir = config_dir();
        dir.push(ENTRIES_DIR);
        Self::new(dir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, entry_id: &str) -> Result<PathBuf, StoreError> {
        let valid = !entry_id.is_empty()
            && entry_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
            && !entry_id.starts_with('.');
        if !valid {
            return Err(StoreError::InvalidId(entry_id.to_string()));
        }
        let mut path = self.dir.clone();
        path.push(format!("{}.{}", entry_id, ENTRY_EXTENSION));
        Ok(path)
    }

    pub async fn save(&self, entry_id: &str, data: &EntryData) -> Result<(), StoreError> {
        let path = self.entry_path(entry_id)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| StoreError::Io {
                path: self.dir.clone(),
                source,
            })?;

        let content = toml::to_string_pretty(data)?;
        tokio::fs::write(&path, content)
            .await
            .map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
        info!("Entry {} saved to {}", entry_id, path.display());
        Ok(())
    }

    /// `Ok(None)` when no entry with this id was stored
    pub async fn load(&self, entry_id: &str) -> Result<Option<EntryData>, StoreError> {
        let path = self.entry_path(entry_id)?;
        let exists = tokio::fs::try_exists(&path)
            .await
            .map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
        if !exists {
            return Ok(None);
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
        let data = toml::from_str(&content).map_err(|source| StoreError::Parse {
            path: path.clone(),
            source,
        })?;
        debug!("Entry {} loaded", entry_id);
        Ok(Some(data))
    }

    pub async fn remove(&self, entry_id: &str) -> Result<bool, StoreError> {
        let path = self.entry_path(entry_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!("Entry {} removed", entry_id);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    /// Ids of all stored entries, sorted
    pub async fn list(&self) -> Result<Vec<String>, StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.dir.clone(),
            source,
        };
        let mut ids = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(io_err(e)),
        };

        while let Some(item) = dir.next_entry().await.map_err(io_err)? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }
            match path.file_stem().and_then(|s| s.to_str()) {
                Some(id) => ids.push(id.to_string()),
                None => warn!("Skipping entry file with unusable name: {}", path.display()),
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Every stored entry that parses; broken files are logged and skipped
    pub async fn load_all(&self) -> Result<Vec<(String, EntryData)>, StoreError> {
        let mut entries = Vec::new();
        for id in self.list().await? {
            match self.load(&id).await {
                Ok(Some(data)) => entries.push((id, data)),
                Ok(None) => {}
                Err(e) => warn!("Skipping entry {}: {}", id, e),
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{classify, SensorMap};
    use crate::topics::ModuleIdentity;

    const BASE: &str = "selfmon/vmod.010aa1";

    fn data() -> EntryData {
        let sensors: SensorMap = ["prio/inputs/read/4", "vkp/display/line2", "version"]
            .iter()
            .filter_map(|r| classify(BASE, &format!("{}/{}", BASE, r), false))
            .map(|d| (d.topic.clone(), d))
            .collect();
        EntryData {
            module_path: ModuleIdentity::parse(BASE).unwrap(),
            enable_outputs: false,
            sensors,
        }
    }

    #[tokio::test]
    async fn save_load_list_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = EntryStore::new(dir.path().join("entries"));
        assert!(store.list().await.unwrap().is_empty());
        assert_eq!(store.load("selfmon_010aa1").await.unwrap(), None);

        store.save("selfmon_010aa1", &data()).await.unwrap();
        assert_eq!(store.list().await.unwrap(), vec!["selfmon_010aa1".to_string()]);
        assert_eq!(store.load("selfmon_010aa1").await.unwrap(), Some(data()));

        assert!(store.remove("selfmon_010aa1").await.unwrap());
        assert!(!store.remove("selfmon_010aa1").await.unwrap());
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn broken_files_are_skipped_by_load_all() {
        let dir = tempfile::tempdir().unwrap();
        let store = EntryStore::new(dir.path());
        store.save("good", &data()).await.unwrap();
        tokio::fs::write(dir.path().join("bad.toml"), "module_path = 3")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("notes.txt"), "ignored")
            .await
            .unwrap();

        assert!(matches!(store.load("bad").await, Err(StoreError::Parse { .. })));
        let all = store.load_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].0, "good");
    }

    #[test]
    fn ids_must_be_plain_file_names() {
        let store = EntryStore::new("/tmp/unused");
        assert!(matches!(store.entry_path("../x"), Err(StoreError::InvalidId(_))));
        assert!(matches!(store.entry_path(""), Err(StoreError::InvalidId(_))));
        assert!(store.entry_path("selfmon_0a").is_ok());
    }
}
