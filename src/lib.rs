//
// lib.rs
// Pacs-Sync-rs
//
// Exposes the crate's modules and re-exports the types most callers need, for both the binary and library users.
//
// Thales Matheus Mendonça Santos - October 2026

// Leaves first: codec and anonymizer, then the two stores, then the engine that ties them together.
pub mod anonymize;
pub mod cache;
pub mod cli;
pub mod codec;
pub mod config;
pub mod dicom_access;
pub mod error;
pub mod http;
pub mod metadata;
pub mod models;
pub mod notify;
pub mod remote;
pub mod scan;
pub mod storage;
pub mod sync;
pub mod worker;

pub use cache::{LocalStudyCache, VerifyReport};
pub use cli::{run as run_cli, Cli, Commands};
pub use config::{PacsEndpoint, Settings};
pub use error::{Error, Result, Warning};
pub use models::{InstanceRecord, StudyMetadata, StudyRef};
pub use remote::RemoteStudyStore;
pub use sync::{SyncEngine, SyncOptions, SyncReport, SyncStatus};
