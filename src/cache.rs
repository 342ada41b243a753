//
// cache.rs
// Pacs-Sync-rs
//
// Local study cache: indexes DICOM files on disk by Study Instance UID, keeps the results typed for them and
// heals itself when indexed files disappear.
//
// Thales Matheus Mendonça Santos - October 2026

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::models::{display_key, InstanceLocator, InstanceRecord, LoadedFile, StudyMetadata, StudyRef, StudySummary};
use crate::scan::{scan_file, scan_folder, ScanRules, ScannedFile};
use crate::storage::{CacheIndex, CachedInstance, IndexFile};

/// What a verification pass cleaned up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub missing_files: Vec<PathBuf>,
    pub removed_studies: Vec<String>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.missing_files.is_empty() && self.removed_studies.is_empty()
    }
}

pub struct LocalStudyCache {
    dir: PathBuf,
    file: IndexFile,
    rules: ScanRules,
    index: Mutex<CacheIndex>,
}

impl LocalStudyCache {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_rules(dir, ScanRules::default())
    }

    /// Create the directory if needed, load the index and verify it against the disk.
    pub fn open_with_rules(dir: impl AsRef<Path>, rules: ScanRules) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let file = IndexFile::in_dir(&dir);
        let index = file.load()?;

        let cache = Self {
            dir,
            file,
            rules,
            index: Mutex::new(index),
        };
        let report = cache.verify()?;
        info!(
            dir = %cache.dir.display(),
            studies = cache.len(),
            pruned_files = report.missing_files.len(),
            "Local cache opened"
        );
        Ok(cache)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn lock(&self) -> MutexGuard<'_, CacheIndex> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<LoadedFile> {
        let scanned = scan_file(path.as_ref())?;
        let mut index = self.lock();
        let loaded = apply(&mut index, scanned);
        self.file.save(&mut index)?;
        info!(study = %loaded.study, instance = %loaded.instance_id, "Loaded local file");
        Ok(loaded)
    }

    /// Load every DICOM file under `dir`. Returns one summary per study touched, with its file count.
    pub fn load_folder(&self, dir: impl AsRef<Path>) -> Result<Vec<StudySummary>> {
        let scanned = scan_folder(dir.as_ref(), &self.rules)?;
        let loaded_files = scanned.len();

        let mut index = self.lock();
        let mut touched = BTreeSet::new();
        for file in scanned {
            touched.insert(file.study_uid.clone());
            apply(&mut index, file);
        }
        if loaded_files > 0 {
            self.file.save(&mut index)?;
        }

        let summaries: Vec<StudySummary> = touched
            .iter()
            .filter_map(|uid| summary_for(&index, uid))
            .collect();
        info!(
            folder = %dir.as_ref().display(),
            files = loaded_files,
            studies = summaries.len(),
            "Loaded local folder"
        );
        Ok(summaries)
    }

    /// Prune instances whose file is gone, then studies left without instances.
    pub fn verify(&self) -> Result<VerifyReport> {
        let mut index = self.lock();
        let mut report = VerifyReport::default();

        let missing: Vec<(String, PathBuf)> = index
            .instance_files
            .iter()
            .filter(|(_, path)| !path.exists())
            .map(|(id, path)| (id.clone(), path.clone()))
            .collect();
        for (id, path) in missing {
            warn!(instance = %id, path = %path.display(), "Indexed file is gone, dropping it");
            index.instance_files.remove(&id);
            report.missing_files.push(path);
        }

        let CacheIndex {
            study_instances,
            instance_files,
            ..
        } = &mut *index;
        for instances in study_instances.values_mut() {
            instances.retain(|instance| instance_files.contains_key(&instance.id));
        }

        let empty: Vec<String> = index
            .studies
            .keys()
            .filter(|uid| index.file_count(uid) == 0)
            .cloned()
            .collect();
        for uid in empty {
            warn!(study = %uid, "No files left for study, removing it");
            index.remove_study(&uid);
            report.removed_studies.push(uid);
        }

        if !report.is_clean() {
            self.file.save(&mut index)?;
        }
        Ok(report)
    }

    pub fn studies(&self) -> Vec<StudySummary> {
        let index = self.lock();
        index
            .studies
            .keys()
            .filter_map(|uid| summary_for(&index, uid))
            .collect()
    }

    pub fn study_metadata(&self, uid: &str) -> Result<StudyMetadata> {
        self.lock()
            .studies
            .get(uid)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("local study {}", uid)))
    }

    pub fn instances(&self, uid: &str) -> Result<Vec<InstanceRecord>> {
        let index = self.lock();
        let instances = index
            .study_instances
            .get(uid)
            .ok_or_else(|| Error::NotFound(format!("local study {}", uid)))?;
        Ok(instances
            .iter()
            .filter_map(|instance| {
                let path = index.instance_files.get(&instance.id)?;
                Some(InstanceRecord {
                    id: instance.id.clone(),
                    study_id: uid.to_string(),
                    locator: InstanceLocator::File(path.clone()),
                    series_uid: instance.series_uid.clone(),
                    instance_number: instance.instance_number,
                })
            })
            .collect())
    }

    pub fn study_for_instance(&self, instance_id: &str) -> Option<String> {
        let index = self.lock();
        index
            .study_instances
            .iter()
            .find(|(_, instances)| instances.iter().any(|i| i.id == instance_id))
            .map(|(uid, _)| uid.clone())
    }

    pub fn instance_bytes(&self, instance_id: &str) -> Result<Vec<u8>> {
        let path = self
            .lock()
            .instance_files
            .get(instance_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("instance {} is not indexed", instance_id)))?;
        fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                Error::NotFound(format!("file {} for instance {} is gone", path.display(), instance_id))
            }
            _ => Error::Io(e),
        })
    }

    pub fn attach_result(&self, uid: &str, text: &str) -> Result<()> {
        let mut index = self.lock();
        if !index.studies.contains_key(uid) {
            return Err(Error::NotFound(format!("local study {}", uid)));
        }
        index.results.insert(uid.to_string(), text.to_string());
        self.file.save(&mut index)?;
        info!(study = %uid, chars = text.chars().count(), "Stored result for local study");
        Ok(())
    }

    /// Stored result, or an empty string.
    pub fn result(&self, uid: &str) -> String {
        self.lock().results.get(uid).cloned().unwrap_or_default()
    }

    pub fn remove_study(&self, uid: &str) -> Result<bool> {
        let mut index = self.lock();
        let removed = index.remove_study(uid);
        if removed {
            self.file.save(&mut index)?;
            info!(study = %uid, "Removed local study");
        }
        Ok(removed)
    }

    pub fn clear(&self) -> Result<()> {
        let mut index = self.lock();
        *index = CacheIndex::default();
        self.file.save(&mut index)?;
        info!("Cleared local cache");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.lock().studies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn apply(index: &mut CacheIndex, file: ScannedFile) -> LoadedFile {
    let instances = index.study_instances.entry(file.study_uid.clone()).or_default();
    if !instances.iter().any(|i| i.id == file.instance_id) {
        instances.push(CachedInstance {
            id: file.instance_id.clone(),
            series_uid: file.series_uid,
            instance_number: file.instance_number,
        });
    }
    index.instance_files.insert(file.instance_id.clone(), file.path);
    index
        .studies
        .entry(file.study_uid.clone())
        .or_insert_with(|| file.metadata.clone());

    LoadedFile {
        study: StudyRef::Local(file.study_uid),
        instance_id: file.instance_id,
        metadata: file.metadata,
    }
}

fn summary_for(index: &CacheIndex, uid: &str) -> Option<StudySummary> {
    let metadata = index.studies.get(uid)?.clone();
    Some(StudySummary {
        study: StudyRef::Local(uid.to_string()),
        display_key: display_key(uid),
        metadata,
        file_count: index.file_count(uid),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dicom_access::fixtures::sample_payload;
    use dicom::core::VR;
    use dicom::dictionary_std::tags;
    use tempfile::tempdir;

    #[test]
    fn loading_the_same_file_twice_does_not_duplicate() {
        let dir = tempdir().expect("tmpdir");
        let path = dir.path().join("a.dcm");
        fs::write(&path, sample_payload(&[])).expect("write");

        let cache = LocalStudyCache::open(dir.path().join("cache")).expect("open");
        let first = cache.load_file(&path).expect("load");
        cache.load_file(&path).expect("reload");

        assert_eq!(first.study, StudyRef::Local("1.2.3".into()));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.instances("1.2.3").expect("instances").len(), 1);
        assert_eq!(cache.study_for_instance("1.2.3.1.1").as_deref(), Some("1.2.3"));
    }

    #[test]
    fn file_without_study_uid_is_rejected() {
        let dir = tempdir().expect("tmpdir");
        let path = dir.path().join("a.dcm");
        fs::write(&path, sample_payload(&[(tags::STUDY_INSTANCE_UID, VR::UI, "")])).expect("write");

        let cache = LocalStudyCache::open(dir.path().join("cache")).expect("open");
        assert!(matches!(cache.load_file(&path), Err(Error::Data(_))));
        assert!(cache.is_empty());
    }

    #[test]
    fn results_persist_across_reopen() {
        let dir = tempdir().expect("tmpdir");
        let path = dir.path().join("a.dcm");
        fs::write(&path, sample_payload(&[])).expect("write");
        let cache_dir = dir.path().join("cache");

        {
            let cache = LocalStudyCache::open(&cache_dir).expect("open");
            cache.load_file(&path).expect("load");
            cache.attach_result("1.2.3", "No acute findings.").expect("attach");
        }
        let cache = LocalStudyCache::open(&cache_dir).expect("reopen");
        assert_eq!(cache.result("1.2.3"), "No acute findings.");
        assert_eq!(cache.result("9.9.9"), "");
        assert!(matches!(cache.attach_result("9.9.9", "x"), Err(Error::NotFound(_))));
    }

    #[test]
    fn unindexed_or_vanished_instance_is_not_found() {
        let dir = tempdir().expect("tmpdir");
        let path = dir.path().join("a.dcm");
        fs::write(&path, sample_payload(&[])).expect("write");
        let cache = LocalStudyCache::open(dir.path().join("cache")).expect("open");
        cache.load_file(&path).expect("load");

        assert!(cache.instance_bytes("1.2.3.1.1").is_ok());
        assert!(matches!(cache.instance_bytes("nope"), Err(Error::NotFound(_))));
        fs::remove_file(&path).expect("remove");
        assert!(matches!(cache.instance_bytes("1.2.3.1.1"), Err(Error::NotFound(_))));
    }

    #[test]
    fn remove_and_clear() {
        let dir = tempdir().expect("tmpdir");
        let a = dir.path().join("a.dcm");
        let b = dir.path().join("b.dcm");
        fs::write(&a, sample_payload(&[])).expect("a");
        fs::write(
            &b,
            sample_payload(&[
                (tags::STUDY_INSTANCE_UID, VR::UI, "4.5.6"),
                (tags::SOP_INSTANCE_UID, VR::UI, "4.5.6.1"),
            ]),
        )
        .expect("b");

        let cache = LocalStudyCache::open(dir.path().join("cache")).expect("open");
        cache.load_file(&a).expect("a");
        cache.load_file(&b).expect("b");
        assert_eq!(cache.len(), 2);

        assert!(cache.remove_study("1.2.3").expect("remove"));
        assert!(!cache.remove_study("1.2.3").expect("remove again"));
        assert_eq!(cache.len(), 1);

        cache.clear().expect("clear");
        assert!(cache.is_empty());
        assert!(cache.studies().is_empty());
    }
}
