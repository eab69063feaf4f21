// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::{
    collections::{BTreeMap, HashSet},
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use anyhow::Context;
use tracing::{info, warn};

/// Persisted mapping from logical key to external resource id.
///
/// Every mutation rewrites the whole file through a temp file and a rename,
/// so a reader never observes a partially written mapping. A failed write
/// leaves the in-memory view authoritative and marks the store dirty; the
/// next mutation (or an explicit [`IdentityStore::flush`]) writes it again.
#[derive(Debug)]
pub struct IdentityStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
    dirty: bool,
}

impl IdentityStore {
    /// Load the mapping at `path`. A missing file is an empty mapping; a
    /// malformed one is logged and replaced on the next write.
    pub fn load(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create identity store directory {}", parent.display())
            })?;
        }

        let entries = match fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => BTreeMap::new(),
            Ok(raw) => match serde_json::from_str::<BTreeMap<String, String>>(&raw) {
                Ok(entries) => entries,
                Err(error) => {
                    warn!(path = %path.display(), error = %error, "identity store is malformed; starting empty");
                    BTreeMap::new()
                }
            },
            Err(error) if error.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(error) => {
                return Err(error).with_context(|| {
                    format!("failed to read identity store {}", path.display())
                });
            }
        };

        info!(path = %path.display(), entries = entries.len(), "identity store loaded");
        Ok(Self {
            path,
            entries,
            dirty: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lookup(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Bind `key` to `external_id`, replacing any previous binding, and persist.
    pub fn remember(&mut self, key: &str, external_id: &str) {
        let previous = self
            .entries
            .insert(key.to_string(), external_id.to_string());
        if previous.as_deref() == Some(external_id) && !self.dirty {
            return;
        }
        self.persist();
    }

    /// Drop the binding for `key` and persist. Returns the evicted id.
    pub fn forget(&mut self, key: &str) -> Option<String> {
        let removed = self.entries.remove(key);
        if removed.is_some() || self.dirty {
            self.persist();
        }
        removed
    }

    pub fn known_ids(&self) -> HashSet<String> {
        self.entries.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Atomically replace the file with the full in-memory mapping.
    pub fn flush(&mut self) -> anyhow::Result<()> {
        let payload =
            serde_json::to_vec_pretty(&self.entries).context("failed to encode identity store")?;
        let tmp_path = self.tmp_path();
        {
            let mut file = fs::File::create(&tmp_path)
                .with_context(|| format!("failed to create {}", tmp_path.display()))?;
            file.write_all(&payload)
                .with_context(|| format!("failed to write {}", tmp_path.display()))?;
            file.sync_all()
                .with_context(|| format!("failed to sync {}", tmp_path.display()))?;
        }
        fs::rename(&tmp_path, &self.path).with_context(|| {
            format!(
                "failed to move {} into place at {}",
                tmp_path.display(),
                self.path.display()
            )
        })?;
        self.dirty = false;
        Ok(())
    }

    fn persist(&mut self) {
        if let Err(error) = self.flush() {
            self.dirty = true;
            warn!(path = %self.path.display(), error = %format!("{error:#}"), "failed to persist identity store; keeping in-memory mapping");
        }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_file(path: &Path) -> BTreeMap<String, String> {
        serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn missing_file_loads_as_empty_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::load(dir.path().join("data").join("messages.json")).unwrap();
        assert_eq!(store.len(), 0);
        assert!(dir.path().join("data").is_dir());
    }

    #[test]
    fn remember_persists_full_mapping_and_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.json");
        let mut store = IdentityStore::load(&path).unwrap();
        store.remember("Metrostroi #1", "1001");
        store.remember("textChannelId", "2002");
        store.remember("Metrostroi #1", "1003");

        let on_disk = read_file(&path);
        assert_eq!(on_disk.len(), 2);
        assert_eq!(on_disk["Metrostroi #1"], "1003");
        assert!(!path.with_file_name("messages.json.tmp").exists());

        let reloaded = IdentityStore::load(&path).unwrap();
        assert_eq!(reloaded.lookup("Metrostroi #1"), Some("1003"));
        assert_eq!(reloaded.lookup("textChannelId"), Some("2002"));
    }

    #[test]
    fn forget_removes_entry_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.json");
        let mut store = IdentityStore::load(&path).unwrap();
        store.remember("SCP:SL", "42");
        assert_eq!(store.forget("SCP:SL"), Some("42".to_string()));
        assert_eq!(store.forget("SCP:SL"), None);
        assert!(read_file(&path).is_empty());
        assert!(store.known_ids().is_empty());
    }

    #[test]
    fn malformed_file_is_treated_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.json");
        fs::write(&path, "{not json").unwrap();
        let store = IdentityStore::load(&path).unwrap();
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn legacy_flat_json_object_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.json");
        fs::write(
            &path,
            r#"{"textChannelId":"1","project_info_message":"2","AlcoMine":"3"}"#,
        )
        .unwrap();
        let store = IdentityStore::load(&path).unwrap();
        assert_eq!(store.len(), 3);
        let known = store.known_ids();
        assert!(known.contains("1") && known.contains("2") && known.contains("3"));
    }

    #[test]
    fn failed_write_keeps_memory_and_retries_on_next_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("state");
        let path = blocker.join("messages.json");
        fs::create_dir_all(&blocker).unwrap();
        let mut store = IdentityStore::load(&path).unwrap();

        // Replace the directory with a regular file so writes below it fail.
        fs::remove_dir(&blocker).unwrap();
        fs::write(&blocker, b"").unwrap();

        store.remember("AlcoMine", "7");
        assert!(store.is_dirty());
        assert_eq!(store.lookup("AlcoMine"), Some("7"));

        fs::remove_file(&blocker).unwrap();
        fs::create_dir_all(&blocker).unwrap();

        store.remember("AlcoMine", "7");
        assert!(!store.is_dirty());
        assert_eq!(read_file(&path)["AlcoMine"], "7");
    }
}
