use crate::TrawlError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

/// The merged, authoritative map of id to last successful payload. Mutated
/// only by the merger; workers never touch it.
pub struct CanonicalStore {
    path: PathBuf,
    entries: BTreeMap<String, serde_json::Value>,
}

impl CanonicalStore {
    /// Load from disk. A missing file is an empty store; a corrupt file is
    /// logged and treated as empty rather than killing the run.
    pub fn load(path: &Path) -> Self {
        let entries = read_json_map(path);
        CanonicalStore {
            path: path.to_path_buf(),
            entries,
        }
    }

    /// Atomic replace: write to a temp file, then rename over the target.
    pub fn save(&self) -> Result<(), TrawlError> {
        write_json_atomic(&self.path, &self.entries)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&serde_json::Value> {
        self.entries.get(id)
    }

    pub fn upsert(&mut self, id: &str, payload: serde_json::Value) {
        self.entries.insert(id.to_string(), payload);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_str())
    }
}

#[derive(PartialEq, Eq, Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedKind {
    Empty,
    Error,
}

#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct UnresolvedEntry {
    pub kind: UnresolvedKind,
    pub attempts: u32,
    /// Unix seconds of the first failed run; drives give-up pruning.
    pub first_seen: u64,
    pub last_message: Option<String>,
    /// Run that last touched this entry. The attempt counter moves at most
    /// once per run id, which keeps re-merging the same artifacts a no-op.
    pub last_run_id: String,
}

/// Ids currently lacking a successful payload, with the last-seen outcome
/// kind and an attempt counter. Scopes retry_failed runs.
pub struct UnresolvedIndex {
    path: PathBuf,
    entries: BTreeMap<String, UnresolvedEntry>,
}

impl UnresolvedIndex {
    pub fn load(path: &Path) -> Self {
        let entries = read_json_map(path);
        UnresolvedIndex {
            path: path.to_path_buf(),
            entries,
        }
    }

    pub fn save(&self) -> Result<(), TrawlError> {
        write_json_atomic(&self.path, &self.entries)
    }

    pub fn record_failure(
        &mut self,
        id: &str,
        kind: UnresolvedKind,
        message: Option<&str>,
        run_id: &str,
    ) {
        match self.entries.get_mut(id) {
            Some(entry) => {
                if entry.last_run_id != run_id {
                    entry.attempts += 1;
                    entry.last_run_id = run_id.to_string();
                }
                entry.kind = kind;
                entry.last_message = message.map(|m| m.to_string());
            }
            None => {
                self.entries.insert(
                    id.to_string(),
                    UnresolvedEntry {
                        kind,
                        attempts: 1,
                        first_seen: epoch_secs(),
                        last_message: message.map(|m| m.to_string()),
                        last_run_id: run_id.to_string(),
                    },
                );
            }
        }
    }

    pub fn resolve(&mut self, id: &str) {
        self.entries.remove(id);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&UnresolvedEntry> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_str())
    }

    /// Drop entries first seen before `cutoff` unix seconds. Returns the
    /// removed ids so the operator can see what was given up on.
    pub fn prune_first_seen_before(&mut self, cutoff: u64) -> Vec<String> {
        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.first_seen < cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            self.entries.remove(id);
        }
        stale
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

fn read_json_map<V: for<'de> Deserialize<'de>>(path: &Path) -> BTreeMap<String, V> {
    if !path.exists() {
        return BTreeMap::new();
    }
    match fs::read_to_string(path)
        .map_err(TrawlError::Io)
        .and_then(|raw| serde_json::from_str(&raw).map_err(TrawlError::Json))
    {
        Ok(map) => map,
        Err(e) => {
            warn!("could not read {}: {}; starting with empty store", path.display(), e);
            BTreeMap::new()
        }
    }
}

fn write_json_atomic<V: Serialize>(path: &Path, map: &BTreeMap<String, V>) -> Result<(), TrawlError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_string(map)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("canonical.json");

        let mut store = CanonicalStore::load(&path);
        assert!(store.is_empty());
        store.upsert("09000001", json!({"officers": 2}));
        store.save().unwrap();

        let reloaded = CanonicalStore::load(&path);
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.get("09000001"), Some(&json!({"officers": 2})));
    }

    #[test]
    fn test_corrupt_store_starts_empty() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("canonical.json");
        fs::write(&path, "{ not json").unwrap();

        let store = CanonicalStore::load(&path);
        assert!(store.is_empty());
    }

    #[test]
    fn test_upsert_overwrites_prior_payload() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut store = CanonicalStore::load(&temp_dir.path().join("canonical.json"));
        store.upsert("A", json!(1));
        store.upsert("A", json!(2));
        assert_eq!(store.get("A"), Some(&json!(2)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_unresolved_attempts_increment_once_per_run() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut index = UnresolvedIndex::load(&temp_dir.path().join("unresolved.json"));

        index.record_failure("A", UnresolvedKind::Error, Some("timeout"), "run-1");
        assert_eq!(index.get("A").unwrap().attempts, 1);

        // Re-merging the same run's artifacts must not move the counter.
        index.record_failure("A", UnresolvedKind::Error, Some("timeout"), "run-1");
        assert_eq!(index.get("A").unwrap().attempts, 1);

        index.record_failure("A", UnresolvedKind::Empty, None, "run-2");
        let entry = index.get("A").unwrap();
        assert_eq!(entry.attempts, 2);
        assert_eq!(entry.kind, UnresolvedKind::Empty);
    }

    #[test]
    fn test_unresolved_first_seen_survives_later_failures() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut index = UnresolvedIndex::load(&temp_dir.path().join("unresolved.json"));

        index.record_failure("A", UnresolvedKind::Empty, None, "run-1");
        let first_seen = index.get("A").unwrap().first_seen;
        index.record_failure("A", UnresolvedKind::Error, Some("503"), "run-2");
        assert_eq!(index.get("A").unwrap().first_seen, first_seen);
    }

    #[test]
    fn test_prune_drops_only_stale_entries() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut index = UnresolvedIndex::load(&temp_dir.path().join("unresolved.json"));

        index.record_failure("OLD", UnresolvedKind::Empty, None, "run-1");
        index.record_failure("NEW", UnresolvedKind::Empty, None, "run-1");

        let now = epoch_secs();
        // Everything was first seen just now; cutoff in the past removes nothing.
        assert!(index.prune_first_seen_before(now.saturating_sub(3600)).is_empty());
        // Cutoff in the future removes both.
        let removed = index.prune_first_seen_before(now + 10);
        assert_eq!(removed.len(), 2);
        assert!(index.is_empty());
    }

    #[test]
    fn test_unresolved_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("unresolved.json");

        let mut index = UnresolvedIndex::load(&path);
        index.record_failure("A", UnresolvedKind::Error, Some("reset"), "run-1");
        index.save().unwrap();

        let reloaded = UnresolvedIndex::load(&path);
        assert_eq!(reloaded.get("A"), index.get("A"));
    }
}
