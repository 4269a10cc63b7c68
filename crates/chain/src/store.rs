//! Chain persistence: the whole block list as one JSON document.

use std::fs;
use std::path::{Path, PathBuf};

use quarry_types::Block;

pub const CHAIN_FILE: &str = "chain.json";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage io: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage encoding: {0}")]
    Json(#[from] serde_json::Error),
}

/// Where a [`crate::Chain`] keeps its blocks between runs.
///
/// Only block lists are stored. Ledger state is always rebuilt by replay.
pub trait ChainStore: Send + Sync {
    fn save(&self, blocks: &[Block]) -> Result<(), StoreError>;

    /// `Ok(None)` when nothing has been saved yet.
    fn load(&self) -> Result<Option<Vec<Block>>, StoreError>;
}

/// Writes `<data_dir>/chain.json`, replacing it atomically on every save.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self, StoreError> {
        fs::create_dir_all(&data_dir)?;
        Ok(Self {
            path: data_dir.as_ref().join(CHAIN_FILE),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ChainStore for JsonFileStore {
    fn save(&self, blocks: &[Block]) -> Result<(), StoreError> {
        let data = serde_json::to_vec_pretty(blocks)?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, data)?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    fn load(&self) -> Result<Option<Vec<Block>>, StoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = fs::read(&self.path)?;
        Ok(Some(serde_json::from_slice(&data)?))
    }
}
