//
// sync.rs
// Pacs-Sync-rs
//
// Hybrid study service: one API over the source PACS and the local cache, and the send protocol that replaces a
// study on a target PACS with the source instances plus the embedded result.
//
// Thales Matheus Mendonça Santos - October 2026

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::anonymize::Anonymizer;
use crate::cache::{LocalStudyCache, VerifyReport};
use crate::codec;
use crate::config::Settings;
use crate::error::{Error, Result, Warning};
use crate::models::{
    display_key, InstanceLocator, InstanceRecord, LoadedFile, StudyMetadata, StudyRef, StudySummary,
};
use crate::notify::{LogNotifier, Notifier};
use crate::remote::{RemoteStudyStore, UploadReceipt};
use crate::worker::CancellationToken;

pub const MAX_CONCURRENCY: usize = 8;
const PARTIAL_LISTED: usize = 5;
const FAILED_LISTED: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    pub anonymize: bool,
    pub concurrency: usize,
    pub upload_retries: u32,
    /// Delete what a partial upload created on the target.
    pub compensate_partial: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            anonymize: false,
            concurrency: 4,
            upload_retries: 0,
            compensate_partial: false,
        }
    }
}

impl SyncOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            anonymize: settings.anonymize,
            concurrency: settings.upload_concurrency,
            upload_retries: settings.upload_retries,
            compensate_partial: settings.compensate_partial,
        }
    }

    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.clamp(1, MAX_CONCURRENCY)
    }
}

/// Steps of the send protocol, in the order they were taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Start,
    SearchingTarget,
    Found,
    NotFound,
    Deleting,
    Creating,
    Aborted,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Success,
    Partial,
    Failed,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceStatus {
    Uploaded(UploadReceipt),
    Failed(String),
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceOutcome {
    pub instance_id: String,
    pub status: InstanceStatus,
    pub warnings: Vec<Warning>,
}

/// Everything that happened while sending one study.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub study: StudyRef,
    pub study_instance_uid: String,
    pub target: String,
    pub states: Vec<SyncState>,
    pub status: SyncStatus,
    /// Id of the target study that was deleted before re-creating it.
    pub replaced: Option<String>,
    pub abort_reason: Option<String>,
    pub instances: Vec<InstanceOutcome>,
    pub warnings: Vec<Warning>,
    /// Target studies deleted again after a partial upload.
    pub compensated: Vec<String>,
}

impl SyncReport {
    fn new(study: &StudyRef, target: &str) -> Self {
        Self {
            study: study.clone(),
            study_instance_uid: String::new(),
            target: target.to_string(),
            states: vec![SyncState::Start],
            status: SyncStatus::Failed,
            replaced: None,
            abort_reason: None,
            instances: Vec::new(),
            warnings: Vec::new(),
            compensated: Vec::new(),
        }
    }

    pub fn uploaded(&self) -> usize {
        self.count(|s| matches!(s, InstanceStatus::Uploaded(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, InstanceStatus::Failed(_)))
    }

    pub fn cancelled(&self) -> usize {
        self.count(|s| matches!(s, InstanceStatus::Cancelled))
    }

    pub fn is_success(&self) -> bool {
        self.status == SyncStatus::Success
    }

    fn count(&self, pred: impl Fn(&InstanceStatus) -> bool) -> usize {
        self.instances.iter().filter(|o| pred(&o.status)).count()
    }
}

/// One entry of a batch send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedStudy {
    pub study: StudyRef,
    /// Shown in the summary, e.g. "DOE JANE (2024-01-01)".
    pub label: String,
    /// Result to embed; `None` falls back to the one stored for the study.
    pub result: Option<String>,
}

impl QueuedStudy {
    pub fn new(study: StudyRef) -> Self {
        let label = study.to_string();
        Self {
            study,
            label,
            result: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    Complete,
    Partial,
    Failed,
}

#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub outcome: BatchOutcome,
    pub title: String,
    pub message: String,
    pub reports: Vec<SyncReport>,
    pub failures: Vec<String>,
}

pub struct SyncEngine {
    source: RemoteStudyStore,
    cache: LocalStudyCache,
    anonymizer: Anonymizer,
    options: SyncOptions,
    notifier: Arc<dyn Notifier>,
    pending_results: Mutex<HashMap<String, String>>,
}

impl SyncEngine {
    pub fn new(source: RemoteStudyStore, cache: LocalStudyCache, options: SyncOptions) -> Self {
        Self {
            source,
            cache,
            anonymizer: Anonymizer::new(),
            options,
            notifier: Arc::new(LogNotifier),
            pending_results: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub fn source(&self) -> &RemoteStudyStore {
        &self.source
    }

    pub fn cache(&self) -> &LocalStudyCache {
        &self.cache
    }

    /// Remote studies first, then local ones. A source that cannot be listed is logged and skipped.
    pub fn list_studies(&self) -> Vec<StudySummary> {
        let mut studies = Vec::new();
        match self.source.list_studies() {
            Ok(ids) => {
                for id in ids {
                    match self.source.study_metadata(&id) {
                        Ok(metadata) => studies.push(StudySummary {
                            display_key: display_key(&id),
                            study: StudyRef::Remote(id),
                            metadata,
                            file_count: 0,
                        }),
                        Err(e) => warn!(study = %id, error = %e, "Skipping remote study"),
                    }
                }
            }
            Err(e) => warn!(url = %self.source.endpoint().url, error = %e, "Remote studies unavailable"),
        }
        studies.extend(self.cache.studies());
        studies
    }

    pub fn study_metadata(&self, study: &StudyRef) -> Result<StudyMetadata> {
        match study {
            StudyRef::Local(uid) => self.cache.study_metadata(uid),
            StudyRef::Remote(id) => self.source.study_metadata(id),
        }
    }

    pub fn instances(&self, study: &StudyRef) -> Result<Vec<InstanceRecord>> {
        match study {
            StudyRef::Local(uid) => self.cache.instances(uid),
            StudyRef::Remote(id) => self.source.list_instances(id),
        }
    }

    pub fn instance_bytes(&self, instance: &InstanceRecord) -> Result<Vec<u8>> {
        match &instance.locator {
            InstanceLocator::File(_) => self.cache.instance_bytes(&instance.id),
            InstanceLocator::Remote(id) => self.source.instance_bytes(id),
        }
    }

    /// Local studies read the cache. Remote ones return a result attached in this session, else the first
    /// result embedded in one of their instances.
    pub fn result_for_study(&self, study: &StudyRef) -> Result<String> {
        match study {
            StudyRef::Local(uid) => Ok(self.cache.result(uid)),
            StudyRef::Remote(id) => {
                if let Some(text) = self.pending_result(id) {
                    return Ok(text);
                }
                for instance in self.source.list_instances(id)? {
                    let text = match self.source.instance_bytes(&instance.id) {
                        Ok(bytes) => codec::extract(&bytes),
                        Err(e) => Err(e),
                    };
                    match text {
                        Ok(text) if !text.is_empty() => return Ok(text),
                        Ok(_) => {}
                        Err(e) if e.is_connection() => return Err(e),
                        Err(e) => debug!(instance = %instance.id, error = %e, "No readable result"),
                    }
                }
                Ok(String::new())
            }
        }
    }

    /// Local studies persist the result right away. Remote ones keep it until the study is sent.
    pub fn attach_result(&self, study: &StudyRef, text: &str) -> Result<()> {
        match study {
            StudyRef::Local(uid) => self.cache.attach_result(uid, text),
            StudyRef::Remote(id) => {
                self.pending_results
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(id.clone(), text.to_string());
                debug!(study = %study, "Result held until the study is sent");
                Ok(())
            }
        }
    }

    fn pending_result(&self, id: &str) -> Option<String> {
        self.pending_results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn load_local_file(&self, path: impl AsRef<Path>) -> Result<LoadedFile> {
        self.cache.load_file(path)
    }

    pub fn load_local_folder(&self, dir: impl AsRef<Path>) -> Result<Vec<StudySummary>> {
        self.cache.load_folder(dir)
    }

    pub fn verify_local(&self) -> Result<VerifyReport> {
        self.cache.verify()
    }

    pub fn remove_local(&self, uid: &str) -> Result<bool> {
        self.cache.remove_study(uid)
    }

    pub fn clear_local(&self) -> Result<()> {
        self.cache.clear()
    }

    pub fn local_count(&self) -> usize {
        self.cache.len()
    }

    /// Make `target` hold this study: delete the copy it already has (matched by Study Instance UID), then
    /// upload every instance, anonymized and with `result` embedded as configured.
    ///
    /// Search failures, an empty source study and connection losses during upload are errors. A failed
    /// delete is reported as [`SyncStatus::Aborted`] and nothing is uploaded. Cancelling before the delete
    /// leaves the target untouched.
    pub fn send_study_to_target(
        &self,
        study: &StudyRef,
        target: &RemoteStudyStore,
        result: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<SyncReport> {
        let mut report = SyncReport::new(study, &target.endpoint().url);
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let uid = self.study_metadata(study)?.study_instance_uid.ok_or_else(|| {
            Error::Data(format!("study {} has no Study Instance UID", study))
        })?;
        report.study_instance_uid = uid.clone();
        let instances = self.instances(study)?;
        if instances.is_empty() {
            return Err(Error::Data(format!("no instances found for study {}", study)));
        }
        let result = match result {
            Some(text) => text.to_string(),
            None => self.stored_result(study),
        };

        report.states.push(SyncState::SearchingTarget);
        let found = target.find_study_by_uid(&uid)?;
        // Nothing on the target has been touched yet.
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match found {
            Some(existing) => {
                report.states.push(SyncState::Found);
                report.states.push(SyncState::Deleting);
                if let Err(e) = target.delete_study(&existing) {
                    warn!(study = %study, target = %report.target, error = %e, "Could not replace target study");
                    report.states.push(SyncState::Aborted);
                    report.status = SyncStatus::Aborted;
                    report.abort_reason = Some(e.to_string());
                    return Ok(report);
                }
                report.replaced = Some(existing);
            }
            None => report.states.push(SyncState::NotFound),
        }

        report.states.push(SyncState::Creating);
        info!(
            study = %study,
            uid = %uid,
            target = %report.target,
            instances = instances.len(),
            "Uploading study"
        );

        let connection_lost = AtomicBool::new(false);
        let outcomes = self.upload_all(&instances, target, &result, cancel, &connection_lost)?;
        report.instances = outcomes;
        for outcome in &report.instances {
            report.warnings.extend(outcome.warnings.iter().cloned());
        }

        let uploaded = report.uploaded();
        report.status = if uploaded > 0 && uploaded == instances.len() {
            SyncStatus::Success
        } else if uploaded > 0 {
            SyncStatus::Partial
        } else {
            SyncStatus::Failed
        };

        if report.status == SyncStatus::Partial && self.options.compensate_partial {
            self.compensate(&mut report, target);
        }
        report.states.push(SyncState::Done);

        info!(
            study = %study,
            status = ?report.status,
            uploaded,
            failed = report.failed(),
            cancelled = report.cancelled(),
            "Study send finished"
        );

        if connection_lost.load(Ordering::SeqCst) {
            let reason = report
                .instances
                .iter()
                .find_map(|o| match &o.status {
                    InstanceStatus::Failed(reason) => Some(reason.clone()),
                    _ => None,
                })
                .unwrap_or_else(|| "connection lost".to_string());
            return Err(Error::Connection(format!(
                "{} after {}/{} instances: {}",
                report.target,
                uploaded,
                instances.len(),
                reason
            )));
        }
        Ok(report)
    }

    fn stored_result(&self, study: &StudyRef) -> String {
        match study {
            StudyRef::Local(uid) => self.cache.result(uid),
            StudyRef::Remote(id) => self.pending_result(id).unwrap_or_default(),
        }
    }

    fn upload_all(
        &self,
        instances: &[InstanceRecord],
        target: &RemoteStudyStore,
        result: &str,
        cancel: &CancellationToken,
        connection_lost: &AtomicBool,
    ) -> Result<Vec<InstanceOutcome>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.effective_concurrency())
            .build()
            .map_err(|e| Error::Config(format!("cannot start upload workers: {}", e)))?;

        Ok(pool.install(|| {
            instances
                .par_iter()
                .map(|instance| {
                    if cancel.is_cancelled() || connection_lost.load(Ordering::SeqCst) {
                        return InstanceOutcome {
                            instance_id: instance.id.clone(),
                            status: InstanceStatus::Cancelled,
                            warnings: Vec::new(),
                        };
                    }
                    let mut warnings = Vec::new();
                    let status = match self.send_instance(instance, target, result, &mut warnings) {
                        Ok(receipt) => InstanceStatus::Uploaded(receipt),
                        Err(e) => {
                            if e.is_connection() {
                                connection_lost.store(true, Ordering::SeqCst);
                            }
                            warn!(instance = %instance.id, error = %e, "Instance not uploaded");
                            InstanceStatus::Failed(e.to_string())
                        }
                    };
                    InstanceOutcome {
                        instance_id: instance.id.clone(),
                        status,
                        warnings,
                    }
                })
                .collect()
        }))
    }

    /// fetch, anonymize, embed, upload
    fn send_instance(
        &self,
        instance: &InstanceRecord,
        target: &RemoteStudyStore,
        result: &str,
        warnings: &mut Vec<Warning>,
    ) -> Result<UploadReceipt> {
        let mut payload = self.instance_bytes(instance)?;

        if self.options.anonymize {
            let anonymized = self.anonymizer.anonymize(&payload);
            warnings.extend(anonymized.warnings);
            payload = anonymized.payload;
        }
        if !result.is_empty() {
            let embedded = codec::embed(&payload, result);
            warnings.extend(embedded.warnings);
            payload = embedded.payload;
        }

        let mut attempt = 0;
        loop {
            match target.upload_instance(payload.clone()) {
                Ok(receipt) => return Ok(receipt),
                Err(e) if attempt < self.options.upload_retries && !e.is_connection() => {
                    attempt += 1;
                    debug!(instance = %instance.id, attempt, error = %e, "Retrying upload");
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn compensate(&self, report: &mut SyncReport, target: &RemoteStudyStore) {
        let created: BTreeSet<String> = report
            .instances
            .iter()
            .filter_map(|o| match &o.status {
                InstanceStatus::Uploaded(receipt) => receipt.parent_study.clone(),
                _ => None,
            })
            .collect();
        for id in created {
            match target.delete_study(&id) {
                Ok(()) => report.compensated.push(id),
                Err(e) => warn!(study = %id, error = %e, "Could not roll back partial upload"),
            }
        }
        if !report.compensated.is_empty() {
            info!(study = %report.study, removed = report.compensated.len(), "Rolled back partial upload");
            report.status = SyncStatus::Failed;
        }
    }

    /// Send queued studies in order and push a summary to the notifier.
    pub fn send_batch(
        &self,
        queue: &[QueuedStudy],
        target: &RemoteStudyStore,
        cancel: &CancellationToken,
    ) -> BatchSummary {
        let mut reports = Vec::new();
        let mut failures = Vec::new();
        let mut sent = 0;

        for item in queue {
            if cancel.is_cancelled() {
                failures.push(format!("{} [{}] - cancelled", item.label, item.study.kind()));
                continue;
            }
            match self.send_study_to_target(&item.study, target, item.result.as_deref(), cancel) {
                Ok(report) => {
                    match report.status {
                        SyncStatus::Success => sent += 1,
                        SyncStatus::Partial => failures.push(format!(
                            "{} [{}] - {}/{} instances",
                            item.label,
                            item.study.kind(),
                            report.uploaded(),
                            report.instances.len()
                        )),
                        SyncStatus::Failed | SyncStatus::Aborted => failures.push(format!(
                            "{} [{}]{}",
                            item.label,
                            item.study.kind(),
                            report
                                .abort_reason
                                .as_ref()
                                .map(|r| format!(" - {}", r))
                                .unwrap_or_default()
                        )),
                    }
                    reports.push(report);
                }
                Err(e) => {
                    warn!(study = %item.study, error = %e, "Study not sent");
                    failures.push(format!("{} [{}] - {}", item.label, item.study.kind(), e));
                }
            }
        }

        let summary = summarize(queue.len(), sent, reports, failures);
        match summary.outcome {
            BatchOutcome::Complete => self.notifier.info(&summary.title, &summary.message),
            BatchOutcome::Partial => self.notifier.warning(&summary.title, &summary.message),
            BatchOutcome::Failed => self.notifier.error(&summary.title, &summary.message),
        }
        summary
    }
}

fn summarize(total: usize, sent: usize, reports: Vec<SyncReport>, failures: Vec<String>) -> BatchSummary {
    let (outcome, title, message) = if total > 0 && sent == total {
        (
            BatchOutcome::Complete,
            "Complete success",
            format!(
                "All {} studies were sent to the PACS.\nExamination results were included in the DICOM metadata.",
                total
            ),
        )
    } else if sent > 0 {
        let mut message = format!("Sent successfully: {}/{} studies.", sent, total);
        if !failures.is_empty() {
            message.push_str("\n\nStudies with errors:\n");
            message.push_str(&failures.iter().take(PARTIAL_LISTED).cloned().collect::<Vec<_>>().join("\n"));
            if failures.len() > PARTIAL_LISTED {
                message.push_str(&format!("\n... and {} more", failures.len() - PARTIAL_LISTED));
            }
        }
        (BatchOutcome::Partial, "Partial success", message)
    } else {
        let mut message = "No study could be sent to the PACS.".to_string();
        if !failures.is_empty() {
            message.push_str("\n\nErrors:\n");
            message.push_str(&failures.iter().take(FAILED_LISTED).cloned().collect::<Vec<_>>().join("\n"));
        }
        (BatchOutcome::Failed, "Complete failure", message)
    };

    BatchSummary {
        outcome,
        title: title.to_string(),
        message,
        reports,
        failures,
    }
}
