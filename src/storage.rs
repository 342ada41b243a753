//
// storage.rs
// Pacs-Sync-rs
//
// Persists the local study index as pretty JSON, rewritten whole through a temporary file and a rename.
//
// Thales Matheus Mendonça Santos - October 2026

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::models::StudyMetadata;

pub const INDEX_FILE_NAME: &str = "local_studies_cache.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedInstance {
    pub id: String,
    #[serde(default)]
    pub series_uid: Option<String>,
    #[serde(default)]
    pub instance_number: Option<i32>,
}

/// Everything the local cache knows, keyed by Study Instance UID (studies) and instance id (files).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheIndex {
    pub studies: BTreeMap<String, StudyMetadata>,
    pub study_instances: BTreeMap<String, Vec<CachedInstance>>,
    pub instance_files: BTreeMap<String, PathBuf>,
    pub results: BTreeMap<String, String>,
    pub last_updated: Option<String>,
}

impl CacheIndex {
    /// Drop a study together with its instances, file entries and result. Returns false if it was unknown.
    pub fn remove_study(&mut self, uid: &str) -> bool {
        let known = self.studies.remove(uid).is_some();
        if let Some(instances) = self.study_instances.remove(uid) {
            for instance in instances {
                self.instance_files.remove(&instance.id);
            }
        }
        self.results.remove(uid);
        known
    }

    pub fn file_count(&self, uid: &str) -> usize {
        self.study_instances.get(uid).map(Vec::len).unwrap_or(0)
    }
}

/// The on-disk home of a [`CacheIndex`].
#[derive(Debug, Clone)]
pub struct IndexFile {
    path: PathBuf,
}

impl IndexFile {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            path: dir.join(INDEX_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the index. A missing file is an empty index; so is a corrupt one, after a warning.
    pub fn load(&self) -> Result<CacheIndex> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "No cache index yet");
            return Ok(CacheIndex::default());
        }
        let raw = fs::read(&self.path)?;
        match serde_json::from_slice(&raw) {
            Ok(index) => Ok(index),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Cache index is corrupt, starting empty");
                Ok(CacheIndex::default())
            }
        }
    }

    /// Stamp `last_updated` and replace the file atomically.
    pub fn save(&self, index: &mut CacheIndex) -> Result<()> {
        index.last_updated = Some(Utc::now().to_rfc3339());
        let json = serde_json::to_vec_pretty(index)?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        debug!(
            path = %self.path.display(),
            studies = index.studies.len(),
            files = index.instance_files.len(),
            "Saved cache index"
        );
        Ok(())
    }
}
