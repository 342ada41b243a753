//
// config.rs
// Pacs-Sync-rs
//
// Loads PACS endpoints and engine options from a JSON settings file, with the same defaults the workstation ships.
//
// Thales Matheus Mendonça Santos - October 2026

use std::fs::File;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

pub const DEFAULT_CONFIG_FILE: &str = "pacs-sync.json";
const DEFAULT_PACS_URL: &str = "http://localhost:8042";
const SECONDARY_PACS_URL: &str = "http://localhost:8052";

/// Basic auth pair sent with every request to an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// One PACS the workstation can read from or send to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacsEndpoint {
    pub name: String,
    pub url: String,
    pub username: String,
    pub password: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_primary: bool,
}

impl PacsEndpoint {
    pub fn new(name: &str, url: &str, credentials: Credentials) -> Self {
        Self {
            name: name.trim().to_string(),
            url: url.trim().trim_end_matches('/').to_string(),
            username: credentials.username,
            password: credentials.password,
            is_active: true,
            is_primary: false,
        }
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.username.clone(), self.password.clone())
    }

    /// Absolute URL for `path` (which starts with `/`).
    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.url.trim_end_matches('/'), path)
    }

    /// Every problem with this endpoint; empty when it is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        check_field(&mut errors, "Name", &self.name, 255);
        check_field(&mut errors, "Username", &self.username, 100);
        check_field(&mut errors, "Password", &self.password, 255);

        let url = self.url.trim();
        if url.is_empty() {
            errors.push("URL is required".to_string());
        } else if !(url.starts_with("http://") || url.starts_with("https://")) {
            errors.push("URL must start with http:// or https://".to_string());
        } else if url.len() > 512 {
            errors.push("URL must be less than 512 characters".to_string());
        }
        errors
    }
}

fn check_field(errors: &mut Vec<String>, label: &str, value: &str, max: usize) {
    let value = value.trim();
    if value.is_empty() {
        errors.push(format!("{} is required", label));
    } else if value.len() > max {
        errors.push(format!("{} must be less than {} characters", label, max));
    }
}

/// Anything able to hand out the configured endpoints.
pub trait ConfigSource {
    fn endpoints(&self) -> Vec<PacsEndpoint>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub endpoints: Vec<PacsEndpoint>,
    pub cache_dir: PathBuf,
    pub anonymize: bool,
    pub upload_concurrency: usize,
    pub upload_retries: u32,
    pub compensate_partial: bool,
    pub http_timeout_secs: u64,
    pub dicom_extensions: Vec<String>,
    pub min_dicom_file_size: u64,
}

impl Default for Settings {
    fn default() -> Self {
        let mut primary = PacsEndpoint::new(
            "Primary PACS",
            DEFAULT_PACS_URL,
            Credentials::new("orthanc", "orthanc"),
        );
        primary.is_primary = true;
        let secondary = PacsEndpoint::new(
            "Secondary PACS",
            SECONDARY_PACS_URL,
            Credentials::new("orthanc", "orthanc"),
        );

        Self {
            endpoints: vec![primary, secondary],
            cache_dir: PathBuf::from("local_studies_cache"),
            anonymize: false,
            upload_concurrency: 4,
            upload_retries: 0,
            compensate_partial: false,
            http_timeout_secs: 30,
            dicom_extensions: vec![".dcm".into(), ".dicom".into(), ".dic".into()],
            min_dicom_file_size: 128,
        }
    }
}

impl Settings {
    pub fn from_file(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| Error::Config(format!("cannot open {}: {}", path.display(), e)))?;
        let mut settings: Settings = serde_json::from_reader(file)
            .map_err(|e| Error::Config(format!("invalid settings in {}: {}", path.display(), e)))?;
        settings.normalize()?;
        Ok(settings)
    }

    /// Explicit path wins; otherwise `pacs-sync.json` in the working directory if it exists; otherwise defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_FILE);
                if fallback.exists() {
                    Self::from_file(fallback)
                } else {
                    debug!("No settings file found, using built-in defaults");
                    Ok(Self::default())
                }
            }
        }
    }

    fn normalize(&mut self) -> Result<()> {
        for endpoint in &mut self.endpoints {
            endpoint.url = endpoint.url.trim().trim_end_matches('/').to_string();
            let problems = endpoint.validate();
            if !problems.is_empty() {
                return Err(Error::Config(format!(
                    "endpoint '{}': {}",
                    endpoint.name,
                    problems.join("; ")
                )));
            }
        }
        if self.endpoints.iter().filter(|e| e.is_primary).count() > 1 {
            return Err(Error::Config("more than one primary endpoint".to_string()));
        }
        self.upload_concurrency = self.upload_concurrency.clamp(1, 8);
        Ok(())
    }

    pub fn active_endpoints(&self) -> Vec<&PacsEndpoint> {
        self.endpoints.iter().filter(|e| e.is_active).collect()
    }

    /// Primary endpoint, else the first active one, else the stock local Orthanc.
    pub fn primary(&self) -> PacsEndpoint {
        self.endpoints
            .iter()
            .find(|e| e.is_primary && e.is_active)
            .or_else(|| self.endpoints.iter().find(|e| e.is_active))
            .cloned()
            .unwrap_or_else(|| {
                PacsEndpoint::new(
                    "Default PACS",
                    DEFAULT_PACS_URL,
                    Credentials::new("orthanc", "orthanc"),
                )
            })
    }

    /// Look up an active endpoint by name or URL.
    pub fn endpoint(&self, name_or_url: &str) -> Option<PacsEndpoint> {
        let wanted = name_or_url.trim().trim_end_matches('/');
        self.endpoints
            .iter()
            .filter(|e| e.is_active)
            .find(|e| e.name.eq_ignore_ascii_case(wanted) || e.url == wanted)
            .cloned()
    }

    pub fn is_dicom_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let ext = format!(".{}", ext.to_ascii_lowercase());
                self.dicom_extensions.iter().any(|known| known.eq_ignore_ascii_case(&ext))
            })
            .unwrap_or(false)
    }
}

impl ConfigSource for Settings {
    fn endpoints(&self) -> Vec<PacsEndpoint> {
        self.active_endpoints().into_iter().cloned().collect()
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn defaults_match_the_stock_orthanc_pair() {
        let settings = Settings::default();
        assert_eq!(settings.primary().url, "http://localhost:8042");
        assert_eq!(settings.primary().credentials(), Credentials::new("orthanc", "orthanc"));
        assert!(settings.endpoint("http://localhost:8052/").is_some());
        assert!(settings.endpoint("secondary pacs").is_some());
        assert_eq!(ConfigSource::endpoints(&settings).len(), 2);
    }

    #[test]
    fn validate_lists_every_problem() {
        let endpoint = PacsEndpoint::new("", "ftp://pacs", Credentials::new("", "pw"));
        let problems = endpoint.validate();
        assert!(problems.contains(&"Name is required".to_string()));
        assert!(problems.contains(&"Username is required".to_string()));
        assert!(problems.contains(&"URL must start with http:// or https://".to_string()));
        assert_eq!(problems.len(), 3);
    }

    #[test]
    fn primary_falls_back_to_first_active() {
        let mut settings = Settings::default();
        settings.endpoints[0].is_active = false;
        assert_eq!(settings.primary().name, "Secondary PACS");

        settings.endpoints.clear();
        assert_eq!(settings.primary().url, "http://localhost:8042");
    }

    #[test]
    fn file_settings_are_normalized() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            r#"{
                "endpoints": [
                    {"name": "Target", "url": "http://pacs.local:8042/", "username": "u", "password": "p", "is_primary": true}
                ],
                "upload_concurrency": 64,
                "anonymize": true
            }"#,
        )
        .expect("write settings");

        let settings = Settings::from_file(&path).expect("load");
        assert_eq!(settings.endpoints[0].url, "http://pacs.local:8042");
        assert!(settings.endpoints[0].is_active);
        assert_eq!(settings.upload_concurrency, 8);
        assert!(settings.anonymize);
        assert_eq!(settings.cache_dir, PathBuf::from("local_studies_cache"));
    }

    #[test]
    fn invalid_endpoint_is_a_config_error() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            r#"{"endpoints": [{"name": "Bad", "url": "pacs:8042", "username": "u", "password": "p"}]}"#,
        )
        .expect("write settings");
        assert!(matches!(Settings::from_file(&path), Err(Error::Config(_))));
    }

    #[test]
    fn extension_check_is_case_insensitive() {
        let settings = Settings::default();
        assert!(settings.is_dicom_extension(Path::new("scan/IMG0001.DCM")));
        assert!(settings.is_dicom_extension(Path::new("a.dic")));
        assert!(!settings.is_dicom_extension(Path::new("notes.txt")));
        assert!(!settings.is_dicom_extension(Path::new("IM000001")));
    }
}
