use crate::TrawlError;
use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// One externally identified entity to be fetched from the register.
#[derive(PartialEq, Eq, Debug, Clone, Encode, Decode, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub name: Option<String>,
}

impl WorkItem {
    pub fn new(id: &str) -> Self {
        WorkItem {
            id: id.to_string(),
            name: None,
        }
    }

    pub fn named(id: &str, name: &str) -> Self {
        WorkItem {
            id: id.to_string(),
            name: Some(name.to_string()),
        }
    }
}

/// Load a candidate id list from a JSON file. Accepts either a plain array of
/// id strings or an array of `{"id": ..., "name": ...}` objects.
pub fn load_candidates(path: &Path) -> Result<Vec<WorkItem>, TrawlError> {
    let raw = fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&raw)?;

    let entries = value
        .as_array()
        .ok_or_else(|| TrawlError::Store(format!("{}: expected a JSON array", path.display())))?;

    let mut items = Vec::with_capacity(entries.len());
    for entry in entries {
        match entry {
            serde_json::Value::String(id) => items.push(WorkItem::new(id)),
            serde_json::Value::Object(map) => {
                let id = map
                    .get("id")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        TrawlError::Store(format!("{}: candidate object missing id", path.display()))
                    })?;
                let name = map.get("name").and_then(|v| v.as_str());
                items.push(match name {
                    Some(name) => WorkItem::named(id, name),
                    None => WorkItem::new(id),
                });
            }
            other => {
                return Err(TrawlError::Store(format!(
                    "{}: unsupported candidate entry {}",
                    path.display(),
                    other
                )));
            }
        }
    }
    Ok(items)
}

/// A disjoint slice of the candidate set assigned to one worker process.
#[derive(PartialEq, Eq, Debug, Clone, Encode, Decode)]
pub struct Shard {
    pub run_id: String,
    pub index: usize,
    pub total: usize,
    pub items: Vec<WorkItem>,
}

impl Shard {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(PartialEq, Eq, Debug, Clone, Copy, Encode, Decode, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transient,
    Fatal,
}

/// Result of one fetch attempt for one WorkItem. Exactly one of these is
/// recorded per item per run, errors included, so the merger can always
/// classify what happened to every member of the candidate set.
#[derive(PartialEq, Eq, Debug, Clone, Encode, Decode, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FetchOutcome {
    Success { payload: String },
    Empty,
    Error { kind: ErrorKind, message: String },
    WouldFetch,
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Success { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_candidates_plain_ids() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("candidates.json");
        fs::write(&path, r#"["09000001", "09000002"]"#).unwrap();

        let items = load_candidates(&path).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "09000001");
        assert!(items[0].name.is_none());
    }

    #[test]
    fn test_load_candidates_objects() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("candidates.json");
        fs::write(
            &path,
            r#"[{"id": "09000001", "name": "ALPHA CAPITAL LLP"}, {"id": "09000002"}]"#,
        )
        .unwrap();

        let items = load_candidates(&path).unwrap();
        assert_eq!(items[0].name.as_deref(), Some("ALPHA CAPITAL LLP"));
        assert!(items[1].name.is_none());
    }

    #[test]
    fn test_load_candidates_rejects_non_array() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("candidates.json");
        fs::write(&path, r#"{"id": "09000001"}"#).unwrap();

        assert!(load_candidates(&path).is_err());
    }

    #[test]
    fn test_outcome_roundtrips_through_bincode() {
        let outcome = FetchOutcome::Error {
            kind: ErrorKind::Transient,
            message: "timed out".to_string(),
        };
        let bytes = bincode::encode_to_vec(&outcome, bincode::config::standard()).unwrap();
        let (decoded, _): (FetchOutcome, usize) =
            bincode::decode_from_slice(&bytes, bincode::config::standard()).unwrap();
        assert_eq!(decoded, outcome);
    }
}
