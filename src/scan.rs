use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use dicom::dictionary_std::tags;
use dicom::object::OpenFileOptions;
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::dicom_access::parse_payload;
use crate::error::{Error, Result};
use crate::metadata::{extract_instance_identity, extract_study_metadata};
use crate::models::StudyMetadata;

/// How candidate files are recognised while walking a folder.
#[derive(Debug, Clone)]
pub struct ScanRules {
    pub extensions: Vec<String>,
    pub min_size: u64,
}

impl Default for ScanRules {
    fn default() -> Self {
        Self {
            extensions: vec![".dcm".into(), ".dicom".into(), ".dic".into()],
            min_size: 128,
        }
    }
}

/// A parsed file, ready to be merged into the index.
#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub path: PathBuf,
    pub study_uid: String,
    pub instance_id: String,
    pub series_uid: Option<String>,
    pub instance_number: Option<i32>,
    pub metadata: StudyMetadata,
}

/// Parse one file. No Study Instance UID is a data error; no SOP Instance UID falls back to the content hash.
pub fn scan_file(path: &Path) -> Result<ScannedFile> {
    let bytes = std::fs::read(path)?;
    let obj = parse_payload(&bytes)?;
    let identity = extract_instance_identity(&obj);

    let study_uid = identity.study_instance_uid.ok_or_else(|| {
        Error::Data(format!("{} has no Study Instance UID", path.display()))
    })?;
    let instance_id = identity
        .sop_instance_uid
        .unwrap_or_else(|| hex::encode(Sha256::digest(&bytes)));

    let mut metadata = extract_study_metadata(&obj);
    metadata.study_instance_uid = Some(study_uid.clone());

    Ok(ScannedFile {
        path: path.to_path_buf(),
        study_uid,
        instance_id,
        series_uid: identity.series_instance_uid,
        instance_number: identity.instance_number,
        metadata,
    })
}

/// Every file under `dir` that looks like DICOM.
pub fn find_candidates(dir: &Path, rules: &ScanRules) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|path| looks_like_dicom(path, rules))
        .collect()
}

/// Walk and parse in parallel. Files that fail to parse are logged and left out.
pub fn scan_folder(dir: &Path, rules: &ScanRules) -> Result<Vec<ScannedFile>> {
    if !dir.is_dir() {
        return Err(Error::Data(format!("folder does not exist: {}", dir.display())));
    }

    let candidates = find_candidates(dir, rules);
    debug!(folder = %dir.display(), candidates = candidates.len(), "Scanning folder");

    let scanned = candidates
        .par_iter()
        .filter_map(|path| match scan_file(path) {
            Ok(file) => Some(file),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable file");
                None
            }
        })
        .collect();
    Ok(scanned)
}

pub fn looks_like_dicom(path: &Path, rules: &ScanRules) -> bool {
    let size = match path.metadata() {
        Ok(meta) => meta.len(),
        Err(_) => return false,
    };
    if size < rules.min_size {
        return false;
    }
    if has_known_extension(path, rules) || has_dicm_magic(path) {
        return true;
    }
    // Extensionless files from modalities: fall back to reading just the header.
    OpenFileOptions::new()
        .read_until(tags::PIXEL_DATA)
        .open_file(path)
        .is_ok()
}

fn has_known_extension(path: &Path, rules: &ScanRules) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = format!(".{}", ext);
            rules.extensions.iter().any(|known| known.eq_ignore_ascii_case(&ext))
        })
        .unwrap_or(false)
}

fn has_dicm_magic(path: &Path) -> bool {
    let mut magic = [0_u8; 4];
    File::open(path)
        .and_then(|mut file| {
            file.seek(SeekFrom::Start(128))?;
            file.read_exact(&mut magic)
        })
        .map(|_| &magic == b"DICM")
        .unwrap_or(false)
}
