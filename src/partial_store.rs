use crate::work_item::FetchOutcome;
use crate::TrawlError;
use bincode::{Decode, Encode};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// One shard's fetch outcomes, owned by the worker that produced it until the
/// merger consumes it. Serialized to `partial_<index>_of_<count>.bin` inside
/// the run directory.
#[derive(PartialEq, Eq, Debug, Clone, Encode, Decode)]
pub struct PartialStore {
    pub run_id: String,
    pub shard_index: usize,
    pub shard_count: usize,
    outcomes: BTreeMap<String, FetchOutcome>,
}

impl PartialStore {
    pub fn new(run_id: &str, shard_index: usize, shard_count: usize) -> Self {
        PartialStore {
            run_id: run_id.to_string(),
            shard_index,
            shard_count,
            outcomes: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, id: &str, outcome: FetchOutcome) {
        self.outcomes.insert(id.to_string(), outcome);
    }

    pub fn get(&self, id: &str) -> Option<&FetchOutcome> {
        self.outcomes.get(id)
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FetchOutcome)> {
        self.outcomes.iter()
    }

    pub fn file_name(&self) -> String {
        format!("partial_{:04}_of_{:04}.bin", self.shard_index, self.shard_count)
    }

    /// Write into `run_dir` atomically (temp file, then rename).
    pub fn save(&self, run_dir: &Path) -> Result<PathBuf, TrawlError> {
        fs::create_dir_all(run_dir)?;
        let path = run_dir.join(self.file_name());
        let tmp = path.with_extension("bin.tmp");
        let bytes = bincode::encode_to_vec(self, bincode::config::standard())?;
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self, TrawlError> {
        let bytes = fs::read(path)?;
        let (store, _): (PartialStore, usize) =
            bincode::decode_from_slice(&bytes, bincode::config::standard())?;
        Ok(store)
    }

    /// Load every partial artifact in a run directory, sorted by file name so
    /// shard order is stable.
    pub fn load_run_dir(run_dir: &Path) -> Result<Vec<Self>, TrawlError> {
        if !run_dir.exists() {
            return Ok(Vec::new());
        }
        let mut paths: Vec<PathBuf> = fs::read_dir(run_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path.extension().is_some_and(|ext| ext == "bin")
                    && path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with("partial_"))
            })
            .collect();
        paths.sort();

        let mut stores = Vec::with_capacity(paths.len());
        for path in paths {
            stores.push(PartialStore::load(&path)?);
        }
        Ok(stores)
    }
}
