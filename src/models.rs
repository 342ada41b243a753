//
// models.rs
// Pacs-Sync-rs
//
// Defines the study/instance addressing types and the serializable metadata shared by local and remote stores.
//
// Thales Matheus Mendonça Santos - October 2026

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Error;

/// Where a study lives. Local studies are keyed by their Study Instance UID, remote ones by the store's own id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StudyRef {
    Local(String),
    Remote(String),
}

impl StudyRef {
    pub fn id(&self) -> &str {
        match self {
            StudyRef::Local(uid) => uid,
            StudyRef::Remote(id) => id,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, StudyRef::Local(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StudyRef::Local(_) => "LOCAL",
            StudyRef::Remote(_) => "PACS",
        }
    }
}

impl fmt::Display for StudyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StudyRef::Local(uid) => write!(f, "local:{}", uid),
            StudyRef::Remote(id) => write!(f, "remote:{}", id),
        }
    }
}

impl FromStr for StudyRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // The origin has to be spelled out; guessing it from the id shape is how studies get misrouted.
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| Error::Data(format!("study reference '{}' needs a local: or remote: prefix", s)))?;
        if id.trim().is_empty() {
            return Err(Error::Data(format!("study reference '{}' has an empty id", s)));
        }
        match kind {
            "local" => Ok(StudyRef::Local(id.trim().to_string())),
            "remote" => Ok(StudyRef::Remote(id.trim().to_string())),
            other => Err(Error::Data(format!("unknown study origin '{}'", other))),
        }
    }
}

/// Short numeric key for listing local studies. Never used for lookups: two UIDs may share it.
pub fn display_key(uid: &str) -> u32 {
    let digest = Sha256::digest(uid.as_bytes());
    let head = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    head % 1_000_000
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceLocator {
    File(PathBuf),
    Remote(String),
}

/// One payload of a study, as reported by the store that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub id: String,
    pub study_id: String,
    pub locator: InstanceLocator,
    pub series_uid: Option<String>,
    pub instance_number: Option<i32>,
}

/// Display fields of a study. `study_instance_uid` is the only key that is comparable across stores.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyMetadata {
    pub patient_name: Option<String>,
    pub patient_id: Option<String>,
    pub patient_birth_date: Option<String>,
    pub patient_sex: Option<String>,
    pub patient_age: Option<String>,
    pub study_date: Option<String>,
    pub study_time: Option<String>,
    pub description: Option<String>,
    pub referring_physician: Option<String>,
    pub institution: Option<String>,
    pub modality: Option<String>,
    pub accession_number: Option<String>,
    pub study_id: Option<String>,
    pub study_instance_uid: Option<String>,
    pub series_description: Option<String>,
    pub body_part: Option<String>,
    pub status: Option<String>,
    pub source: Option<String>,
}

impl StudyMetadata {
    /// Label/value pairs in presentation order, with dates and person names made readable.
    pub fn display_fields(&self) -> Vec<(&'static str, String)> {
        let text = |value: &Option<String>| value.clone().unwrap_or_else(|| "N/A".to_string());
        let name = |value: &Option<String>| {
            value
                .as_deref()
                .map(|n| n.replace('^', " ").trim().to_string())
                .unwrap_or_else(|| "N/A".to_string())
        };
        let date = |value: &Option<String>| format_date(value.as_deref());

        vec![
            ("Patient Name", name(&self.patient_name)),
            ("Patient ID", text(&self.patient_id)),
            ("Patient Birth Date", date(&self.patient_birth_date)),
            ("Patient Sex", text(&self.patient_sex)),
            ("Patient Age", text(&self.patient_age)),
            ("Study Date", date(&self.study_date)),
            ("Study Time", text(&self.study_time)),
            ("Description", text(&self.description)),
            ("Study Instance UID", text(&self.study_instance_uid)),
            ("Referring Physician", name(&self.referring_physician)),
            ("Study ID", text(&self.study_id)),
            ("Accession Number", text(&self.accession_number)),
            ("Institution Name", text(&self.institution)),
            ("Modality", text(&self.modality)),
            ("Series Description", text(&self.series_description)),
            ("Body Part Examined", text(&self.body_part)),
            ("Series Status", text(&self.status)),
            ("Source", text(&self.source)),
        ]
    }
}

/// DICOM DA (`YYYYMMDD`) to `YYYY-MM-DD`; anything else is shown as-is.
pub fn format_date(value: Option<&str>) -> String {
    match value {
        Some(v) if v.len() >= 8 && v[..8].chars().all(|c| c.is_ascii_digit()) => {
            format!("{}-{}-{}", &v[..4], &v[4..6], &v[6..8])
        }
        Some(v) if !v.is_empty() => v.to_string(),
        _ => "Unknown".to_string(),
    }
}

/// Outcome of loading a folder, one entry per study touched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudySummary {
    pub study: StudyRef,
    pub display_key: u32,
    pub metadata: StudyMetadata,
    pub file_count: usize,
}

/// What a single file load added to the local index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadedFile {
    pub study: StudyRef,
    pub instance_id: String,
    pub metadata: StudyMetadata,
}
