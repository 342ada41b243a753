//
// remote.rs
// Pacs-Sync-rs
//
// REST client for an Orthanc-style PACS: study listing, metadata, instance download, upload and deletion.
//
// Thales Matheus Mendonça Santos - October 2026

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{Credentials, PacsEndpoint};
use crate::error::{Error, Result};
use crate::http::{HttpClient, HttpResponse};
use crate::models::{InstanceLocator, InstanceRecord, StudyMetadata};

type TagMap = HashMap<String, Value>;

#[derive(Debug, Deserialize)]
struct StudyResource {
    #[serde(rename = "MainDicomTags", default)]
    main: TagMap,
    #[serde(rename = "PatientMainDicomTags", default)]
    patient: TagMap,
    #[serde(rename = "SeriesMainDicomTags", default)]
    series: TagMap,
}

#[derive(Debug, Deserialize)]
struct InstanceResource {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "ParentSeries", default)]
    parent_series: Option<String>,
    #[serde(rename = "MainDicomTags", default)]
    main: TagMap,
}

/// What the PACS answered to an upload. Fields are optional: older servers answer with an empty body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UploadReceipt {
    #[serde(rename = "ID", default)]
    pub instance_id: Option<String>,
    #[serde(rename = "ParentStudy", default)]
    pub parent_study: Option<String>,
}

#[derive(Clone)]
pub struct RemoteStudyStore {
    client: Arc<dyn HttpClient>,
    endpoint: PacsEndpoint,
    auth: Credentials,
}

impl RemoteStudyStore {
    pub fn new(client: Arc<dyn HttpClient>, endpoint: PacsEndpoint) -> Self {
        let auth = endpoint.credentials();
        Self {
            client,
            endpoint,
            auth,
        }
    }

    pub fn endpoint(&self) -> &PacsEndpoint {
        &self.endpoint
    }

    /// Connectivity check against `/system`.
    pub fn ping(&self) -> Result<()> {
        let url = self.endpoint.url_for("/system");
        let response = self.get(&url)?;
        if response.is_ok() {
            info!(url = %self.endpoint.url, "PACS reachable");
            Ok(())
        } else {
            Err(Error::Connection(format!(
                "{} answered HTTP {}",
                self.endpoint.url, response.status
            )))
        }
    }

    /// Ids of every study on the store. Any failure here means the store is unusable.
    pub fn list_studies(&self) -> Result<Vec<String>> {
        let url = self.endpoint.url_for("/studies");
        let response = self.get(&url)?;
        if !response.is_ok() {
            return Err(Error::Connection(format!(
                "listing studies on {} failed with HTTP {}",
                self.endpoint.url, response.status
            )));
        }
        let ids: Vec<String> = decode(&url, &response)?;
        debug!(url = %self.endpoint.url, count = ids.len(), "Listed remote studies");
        Ok(ids)
    }

    pub fn study_metadata(&self, study_id: &str) -> Result<StudyMetadata> {
        let url = self.endpoint.url_for(&format!("/studies/{}", study_id));
        let response = self.expect_ok(&url, self.get(&url)?)?;
        let study: StudyResource = decode(&url, &response)?;

        let main = |key: &str| tag_value(&study.main, key);
        let patient = |key: &str| tag_value(&study.patient, key);
        let series = |key: &str| tag_value(&study.series, key);

        Ok(StudyMetadata {
            patient_name: patient("PatientName"),
            patient_id: patient("PatientID"),
            patient_birth_date: patient("PatientBirthDate"),
            patient_sex: patient("PatientSex"),
            patient_age: patient("PatientAge"),
            study_date: main("StudyDate"),
            study_time: main("StudyTime"),
            description: main("StudyDescription"),
            referring_physician: main("ReferringPhysicianName"),
            institution: main("InstitutionName"),
            modality: main("Modality").or_else(|| main("ModalitiesInStudy")),
            accession_number: main("AccessionNumber"),
            study_id: main("StudyID"),
            study_instance_uid: main("StudyInstanceUID"),
            series_description: series("SeriesDescription"),
            body_part: series("BodyPartExamined"),
            status: series("Status").or_else(|| Some("Available".to_string())),
            source: Some(self.endpoint.name.clone()),
        })
    }

    pub fn list_instances(&self, study_id: &str) -> Result<Vec<InstanceRecord>> {
        let url = self.endpoint.url_for(&format!("/studies/{}/instances", study_id));
        let response = self.expect_ok(&url, self.get(&url)?)?;
        let instances: Vec<InstanceResource> = decode(&url, &response)?;

        Ok(instances
            .into_iter()
            .map(|instance| InstanceRecord {
                locator: InstanceLocator::Remote(instance.id.clone()),
                series_uid: instance.parent_series,
                instance_number: tag_value(&instance.main, "InstanceNumber")
                    .and_then(|n| n.parse().ok()),
                study_id: study_id.to_string(),
                id: instance.id,
            })
            .collect())
    }

    pub fn instance_bytes(&self, instance_id: &str) -> Result<Vec<u8>> {
        let url = self.endpoint.url_for(&format!("/instances/{}/file", instance_id));
        let response = self.expect_ok(&url, self.get(&url)?)?;
        Ok(response.body)
    }

    pub fn upload_instance(&self, payload: Vec<u8>) -> Result<UploadReceipt> {
        let url = self.endpoint.url_for("/instances");
        let size = payload.len();
        let response = self
            .client
            .post(&url, &self.auth, "application/dicom", payload)
            .map_err(|e| Error::Connection(e.to_string()))?;
        let response = self.expect_ok(&url, response)?;

        let receipt = serde_json::from_slice::<UploadReceipt>(&response.body).unwrap_or_default();
        debug!(
            url = %self.endpoint.url,
            bytes = size,
            instance = receipt.instance_id.as_deref().unwrap_or("?"),
            "Uploaded instance"
        );
        Ok(receipt)
    }

    pub fn delete_study(&self, study_id: &str) -> Result<()> {
        let url = self.endpoint.url_for(&format!("/studies/{}", study_id));
        let response = self
            .client
            .delete(&url, &self.auth)
            .map_err(|e| Error::Connection(e.to_string()))?;
        self.expect_ok(&url, response)?;
        info!(url = %self.endpoint.url, study = study_id, "Deleted remote study");
        Ok(())
    }

    /// Id of the study on this store whose Study Instance UID equals `uid`, if any.
    ///
    /// Linear scan over the listing. Studies whose metadata cannot be read are skipped.
    pub fn find_study_by_uid(&self, uid: &str) -> Result<Option<String>> {
        for id in self.list_studies()? {
            match self.study_metadata(&id) {
                Ok(metadata) if metadata.study_instance_uid.as_deref() == Some(uid) => {
                    return Ok(Some(id));
                }
                Ok(_) => {}
                Err(e) if e.is_connection() => return Err(e),
                Err(e) => {
                    warn!(study = %id, error = %e, "Skipping target study with unreadable metadata");
                }
            }
        }
        Ok(None)
    }

    fn get(&self, url: &str) -> Result<HttpResponse> {
        self.client
            .get(url, &self.auth)
            .map_err(|e| Error::Connection(e.to_string()))
    }

    fn expect_ok(&self, url: &str, response: HttpResponse) -> Result<HttpResponse> {
        match response.status {
            200 => Ok(response),
            401 | 403 => Err(Error::Connection(format!(
                "{} rejected the credentials (HTTP {})",
                self.endpoint.url, response.status
            ))),
            status => Err(Error::Data(format!(
                "{} answered HTTP {}: {}",
                url,
                status,
                response.body_preview()
            ))),
        }
    }
}

fn decode<T: DeserializeOwned>(url: &str, response: &HttpResponse) -> Result<T> {
    serde_json::from_slice(&response.body)
        .map_err(|e| Error::Data(format!("malformed JSON from {}: {}", url, e)))
}

fn tag_value(tags: &TagMap, key: &str) -> Option<String> {
    match tags.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::result::Result as StdResult;
    use std::sync::Mutex;

    use crate::http::TransportError;

    /// Canned responses keyed by "METHOD path".
    #[derive(Default)]
    struct CannedClient {
        routes: HashMap<String, HttpResponse>,
        calls: Mutex<Vec<String>>,
    }

    impl CannedClient {
        fn with(mut self, route: &str, status: u16, body: &str) -> Self {
            self.routes
                .insert(route.to_string(), HttpResponse::new(status, body.as_bytes()));
            self
        }

        fn answer(&self, method: &str, url: &str) -> StdResult<HttpResponse, TransportError> {
            let path = url.trim_start_matches("http://pacs.test");
            let key = format!("{} {}", method, path);
            self.calls.lock().expect("calls").push(key.clone());
            self.routes.get(&key).cloned().ok_or_else(|| TransportError {
                url: url.to_string(),
                reason: "connection refused".to_string(),
            })
        }
    }

    impl HttpClient for CannedClient {
        fn get(&self, url: &str, _auth: &Credentials) -> StdResult<HttpResponse, TransportError> {
            self.answer("GET", url)
        }

        fn post(
            &self,
            url: &str,
            _auth: &Credentials,
            _content_type: &str,
            _body: Vec<u8>,
        ) -> StdResult<HttpResponse, TransportError> {
            self.answer("POST", url)
        }

        fn delete(&self, url: &str, _auth: &Credentials) -> StdResult<HttpResponse, TransportError> {
            self.answer("DELETE", url)
        }
    }

    fn store(client: CannedClient) -> RemoteStudyStore {
        let endpoint = PacsEndpoint::new(
            "Test PACS",
            "http://pacs.test/",
            Credentials::new("orthanc", "orthanc"),
        );
        RemoteStudyStore::new(Arc::new(client), endpoint)
    }

    #[test]
    fn metadata_reads_orthanc_tag_groups() {
        let store = store(CannedClient::default().with(
            "GET /studies/s1",
            200,
            r#"{
                "ID": "s1",
                "MainDicomTags": {"StudyInstanceUID": "1.2.3", "StudyDate": "20240101", "StudyDescription": "CT HEAD"},
                "PatientMainDicomTags": {"PatientName": "DOE^JANE", "PatientID": "P1"},
                "SeriesMainDicomTags": {"BodyPartExamined": "HEAD"}
            }"#,
        ));
        let metadata = store.study_metadata("s1").expect("metadata");
        assert_eq!(metadata.study_instance_uid.as_deref(), Some("1.2.3"));
        assert_eq!(metadata.patient_name.as_deref(), Some("DOE^JANE"));
        assert_eq!(metadata.body_part.as_deref(), Some("HEAD"));
        assert_eq!(metadata.status.as_deref(), Some("Available"));
        assert_eq!(metadata.source.as_deref(), Some("Test PACS"));
        assert!(metadata.institution.is_none());
    }

    #[test]
    fn instances_carry_remote_locators() {
        let store = store(CannedClient::default().with(
            "GET /studies/s1/instances",
            200,
            r#"[{"ID": "i1", "ParentSeries": "se1", "MainDicomTags": {"InstanceNumber": "3"}}, {"ID": "i2"}]"#,
        ));
        let instances = store.list_instances("s1").expect("instances");
        assert_eq!(instances.len(), 2);
        assert_eq!(instances[0].locator, InstanceLocator::Remote("i1".into()));
        assert_eq!(instances[0].instance_number, Some(3));
        assert_eq!(instances[0].series_uid.as_deref(), Some("se1"));
        assert_eq!(instances[1].study_id, "s1");
    }

    #[test]
    fn status_codes_map_to_error_kinds() {
        let store = store(
            CannedClient::default()
                .with("GET /studies/missing", 404, "unknown")
                .with("GET /studies/locked", 401, "")
                .with("GET /studies/bad", 200, "{not json")
                .with("GET /studies", 500, ""),
        );
        assert!(matches!(store.study_metadata("missing"), Err(Error::Data(_))));
        assert!(matches!(store.study_metadata("locked"), Err(Error::Connection(_))));
        assert!(matches!(store.study_metadata("bad"), Err(Error::Data(_))));
        assert!(matches!(store.list_studies(), Err(Error::Connection(_))));
        // No route at all is a transport failure.
        assert!(matches!(store.instance_bytes("nowhere"), Err(Error::Connection(_))));
    }

    #[test]
    fn upload_receipt_is_optional() {
        let bare = store(CannedClient::default().with("POST /instances", 200, ""));
        assert_eq!(bare.upload_instance(vec![1, 2, 3]).expect("upload"), UploadReceipt::default());

        let full = store(CannedClient::default().with(
            "POST /instances",
            200,
            r#"{"ID": "i9", "ParentStudy": "s9", "Status": "Success"}"#,
        ));
        let receipt = full.upload_instance(vec![1]).expect("upload");
        assert_eq!(receipt.parent_study.as_deref(), Some("s9"));
        assert_eq!(receipt.instance_id.as_deref(), Some("i9"));
    }

    #[test]
    fn find_by_uid_skips_unreadable_studies() {
        let store = store(
            CannedClient::default()
                .with("GET /studies", 200, r#"["a", "b", "c"]"#)
                .with("GET /studies/a", 500, "")
                .with("GET /studies/b", 200, r#"{"MainDicomTags": {"StudyInstanceUID": "9.9"}}"#)
                .with("GET /studies/c", 200, r#"{"MainDicomTags": {"StudyInstanceUID": "1.2.3"}}"#),
        );
        assert_eq!(store.find_study_by_uid("1.2.3").expect("scan"), Some("c".to_string()));
        assert_eq!(store.find_study_by_uid("4.5.6").expect("scan"), None);
    }
}
