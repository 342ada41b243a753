//
// cli.rs
// Pacs-Sync-rs
//
// Defines the CLI surface with Clap and dispatches commands to the sync engine, the local cache and the codec.
//
// Thales Matheus Mendonça Santos - October 2026

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::anonymize::Anonymizer;
use crate::cache::LocalStudyCache;
use crate::codec;
use crate::config::{PacsEndpoint, Settings};
use crate::http::{HttpClient, ReqwestClient};
use crate::models::{format_date, StudyMetadata, StudyRef};
use crate::remote::RemoteStudyStore;
use crate::scan::ScanRules;
use crate::sync::{BatchOutcome, QueuedStudy, SyncEngine, SyncOptions, SyncStatus};
use crate::worker::{self, CancellationToken, Progress};

#[derive(Parser)]
#[command(name = "pacs-sync")]
#[command(about = "Sincronização de estudos DICOM entre PACS e cache local", long_about = None)]
pub struct Cli {
    /// Settings file (defaults to ./pacs-sync.json when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List remote and local studies
    Studies,
    /// Show the metadata of a study (local:<uid> or remote:<id>)
    Show { study: StudyRef },
    /// Index a single DICOM file in the local cache
    LoadFile { path: PathBuf },
    /// Index every DICOM file under a folder
    LoadFolder { dir: PathBuf },
    /// Drop cache entries whose files are gone
    Verify,
    /// Attach an examination result to a local study
    AttachResult {
        study: StudyRef,
        #[command(flatten)]
        text: TextSource,
    },
    /// Print the result attached to (or embedded in) a study
    Result { study: StudyRef },
    /// Remove a local study from the cache
    Remove { study: StudyRef },
    /// Remove every local study from the cache
    Clear,
    /// Embed a result into a DICOM file
    Embed {
        input: PathBuf,
        #[arg(long)]
        out: PathBuf,
        #[command(flatten)]
        text: TextSource,
    },
    /// Print the result embedded in a DICOM file
    Extract { input: PathBuf },
    /// Anonymize a DICOM file
    Anonymize {
        input: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
    /// Check that a PACS answers
    Ping {
        /// Endpoint name or URL (defaults to the primary PACS)
        #[arg(long)]
        target: Option<String>,
    },
    /// Send studies to a target PACS, replacing any copy it already holds
    Send {
        #[arg(required = true)]
        studies: Vec<StudyRef>,
        /// Endpoint name or URL
        #[arg(long)]
        target: String,
        #[command(flatten)]
        text: TextSource,
        #[arg(long)]
        anonymize: bool,
    },
}

/// Result text given inline or read from a file.
#[derive(Args, Debug, Clone, Default)]
pub struct TextSource {
    #[arg(long, conflicts_with = "file")]
    pub text: Option<String>,
    #[arg(long)]
    pub file: Option<PathBuf>,
}

impl TextSource {
    pub fn read(&self) -> anyhow::Result<Option<String>> {
        match (&self.text, &self.file) {
            (Some(text), _) => Ok(Some(text.clone())),
            (None, Some(path)) => fs::read_to_string(path)
                .with_context(|| format!("Failed to read result text from {:?}", path))
                .map(Some),
            (None, None) => Ok(None),
        }
    }

    fn require(&self) -> anyhow::Result<String> {
        self.read()?
            .ok_or_else(|| anyhow!("Provide the result with --text or --file"))
    }
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;

    // Ctrl-C stops new instances from starting; the ones in flight finish.
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing in-flight uploads");
            on_signal.cancel();
        }
    });

    // Store I/O is blocking (reqwest::blocking, file reads), so the whole command runs on the blocking pool.
    let command = cli.command;
    worker::run_blocking(
        move |progress| execute(command, settings, cancel, progress),
        |message| info!("{}", message),
    )
    .await?
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

fn execute(
    command: Commands,
    mut settings: Settings,
    cancel: CancellationToken,
    progress: Progress,
) -> anyhow::Result<()> {
    match command {
        Commands::Embed { input, out, text } => {
            let text = text.require()?;
            let bytes = fs::read(&input).with_context(|| format!("Failed to read {:?}", input))?;
            let embedded = codec::embed(&bytes, &text);
            for warning in &embedded.warnings {
                println!("warning: {}", warning);
            }
            fs::write(&out, &embedded.payload)
                .with_context(|| format!("Failed to write {:?}", out))?;
            println!("Embedded {} chars into {:?}", text.chars().count(), out);
        }
        Commands::Extract { input } => {
            let bytes = fs::read(&input).with_context(|| format!("Failed to read {:?}", input))?;
            let text = codec::extract(&bytes)?;
            if text.is_empty() {
                println!("(no result embedded)");
            } else {
                println!("{}", text);
            }
        }
        Commands::Anonymize { input, out } => {
            let bytes = fs::read(&input).with_context(|| format!("Failed to read {:?}", input))?;
            let anonymized = Anonymizer::new().anonymize(&bytes);
            if let Some(warning) = anonymized.warnings.first() {
                bail!("{}", warning);
            }
            fs::write(&out, &anonymized.payload)
                .with_context(|| format!("Failed to write {:?}", out))?;
            if let Some(identity) = &anonymized.identity {
                println!("Anonymized as {} -> {:?}", identity, out);
            }
        }
        Commands::Ping { target } => {
            let endpoint = match target {
                Some(target) => resolve_target(&settings, &target)?,
                None => settings.primary(),
            };
            progress(format!("Contacting {}", endpoint.url));
            let store = RemoteStudyStore::new(build_client(&settings)?, endpoint);
            store.ping()?;
            println!("{} ({}) is reachable", store.endpoint().name, store.endpoint().url);
        }
        Commands::Send {
            studies,
            target,
            text,
            anonymize,
        } => {
            settings.anonymize |= anonymize;
            let endpoint = resolve_target(&settings, &target)?;
            let client = build_client(&settings)?;
            let engine = open_engine(&settings, client.clone())?;
            let target_store = RemoteStudyStore::new(client, endpoint);
            let result = text.read()?;

            let queue: Vec<QueuedStudy> = studies
                .into_iter()
                .map(|study| QueuedStudy {
                    label: engine
                        .study_metadata(&study)
                        .map(|metadata| study_label(&metadata))
                        .unwrap_or_else(|_| study.to_string()),
                    study,
                    result: result.clone(),
                })
                .collect();

            progress(format!(
                "Sending {} studies to {} (anonymize: {})",
                queue.len(),
                target_store.endpoint().url,
                engine.options().anonymize
            ));
            let summary = engine.send_batch(&queue, &target_store, &cancel);
            for report in &summary.reports {
                let status = match report.status {
                    SyncStatus::Success => "ok",
                    SyncStatus::Partial => "partial",
                    SyncStatus::Failed => "failed",
                    SyncStatus::Aborted => "aborted",
                };
                println!(
                    "{:<8} {} {}/{} instances{}",
                    status,
                    report.study,
                    report.uploaded(),
                    report.instances.len(),
                    report
                        .replaced
                        .as_ref()
                        .map(|id| format!(" (replaced {})", id))
                        .unwrap_or_default()
                );
                for warning in &report.warnings {
                    println!("         warning: {}", warning);
                }
            }
            println!("\n{}\n{}", summary.title, summary.message);
            if summary.outcome == BatchOutcome::Failed {
                bail!("No study was sent to {}", target_store.endpoint().url);
            }
        }
        command => {
            let engine = open_engine(&settings, build_client(&settings)?)?;
            run_store_command(command, &engine, progress)?;
        }
    }

    Ok(())
}

fn run_store_command(command: Commands, engine: &SyncEngine, progress: Progress) -> anyhow::Result<()> {
    match command {
        Commands::Studies => {
            progress("Listing studies".to_string());
            let studies = engine.list_studies();
            println!(
                "{:<7} {:<5} {:<28} {:<11} {:>5}  STUDY",
                "KEY", "FROM", "PATIENT", "DATE", "FILES"
            );
            for summary in &studies {
                let metadata = &summary.metadata;
                println!(
                    "{:06} {:<5} {:<28} {:<11} {:>5}  {}",
                    summary.display_key,
                    summary.study.kind(),
                    patient_name(metadata),
                    format_date(metadata.study_date.as_deref()),
                    summary.file_count,
                    summary.study
                );
            }
            println!("{} studies ({} local)", studies.len(), engine.local_count());
        }
        Commands::Show { study } => {
            let metadata = engine.study_metadata(&study)?;
            for (label, value) in metadata.display_fields() {
                println!("{:<20} {}", label, value);
            }
            let instances = engine.instances(&study)?;
            println!("{:<20} {}", "Instances", instances.len());
        }
        Commands::LoadFile { path } => {
            let loaded = engine.load_local_file(&path)?;
            println!(
                "Loaded {} into {} ({})",
                loaded.instance_id,
                loaded.study,
                patient_name(&loaded.metadata)
            );
        }
        Commands::LoadFolder { dir } => {
            progress(format!("Scanning {:?}", dir));
            let summaries = engine.load_local_folder(&dir)?;
            for summary in &summaries {
                println!(
                    "{:06} {} {} ({} files)",
                    summary.display_key,
                    summary.study,
                    patient_name(&summary.metadata),
                    summary.file_count
                );
            }
            println!("{} studies loaded from {:?}", summaries.len(), dir);
        }
        Commands::Verify => {
            let report = engine.verify_local()?;
            println!(
                "{} missing files dropped, {} studies removed",
                report.missing_files.len(),
                report.removed_studies.len()
            );
        }
        Commands::AttachResult { study, text } => {
            require_local(&study)?;
            let text = text.require()?;
            engine.attach_result(&study, &text)?;
            println!("Result stored for {}", study);
        }
        Commands::Result { study } => {
            let text = engine.result_for_study(&study)?;
            if text.is_empty() {
                println!("(no result for {})", study);
            } else {
                println!("{}", text);
            }
        }
        Commands::Remove { study } => match &study {
            StudyRef::Local(uid) => {
                if !engine.remove_local(uid)? {
                    bail!("No local study {}", uid);
                }
                println!("Removed {}", study);
            }
            StudyRef::Remote(_) => bail!("Only local studies can be removed"),
        },
        Commands::Clear => {
            let count = engine.local_count();
            engine.clear_local()?;
            println!("Cleared {} local studies", count);
        }
        _ => bail!("Command does not use the study stores"),
    }
    Ok(())
}

fn build_client(settings: &Settings) -> anyhow::Result<Arc<dyn HttpClient>> {
    let client = ReqwestClient::new(Duration::from_secs(settings.http_timeout_secs))?;
    Ok(Arc::new(client))
}

fn open_engine(settings: &Settings, client: Arc<dyn HttpClient>) -> anyhow::Result<SyncEngine> {
    let rules = ScanRules {
        extensions: settings.dicom_extensions.clone(),
        min_size: settings.min_dicom_file_size,
    };
    let cache = LocalStudyCache::open_with_rules(&settings.cache_dir, rules)
        .with_context(|| format!("Failed to open local cache at {:?}", settings.cache_dir))?;
    let source = RemoteStudyStore::new(client, settings.primary());
    Ok(SyncEngine::new(source, cache, SyncOptions::from_settings(settings)))
}

/// Configured endpoint by name or URL; an unknown http(s) URL reuses the primary credentials.
fn resolve_target(settings: &Settings, target: &str) -> anyhow::Result<PacsEndpoint> {
    if let Some(endpoint) = settings.endpoint(target) {
        return Ok(endpoint);
    }
    let endpoint = PacsEndpoint::new(target, target, settings.primary().credentials());
    let problems = endpoint.validate();
    if !problems.is_empty() {
        bail!("Unknown target PACS '{}': {}", target, problems.join("; "));
    }
    Ok(endpoint)
}

/// Remote results are given at send time.
fn require_local(study: &StudyRef) -> anyhow::Result<()> {
    if !study.is_local() {
        bail!(
            "Results for {} cannot be stored between runs; pass them with `send --text` or `send --file`",
            study
        );
    }
    Ok(())
}

fn patient_name(metadata: &StudyMetadata) -> String {
    metadata
        .patient_name
        .as_deref()
        .map(|n| n.replace('^', " ").trim().to_string())
        .unwrap_or_else(|| "N/A".to_string())
}

fn study_label(metadata: &StudyMetadata) -> String {
    format!(
        "{} ({})",
        patient_name(metadata),
        format_date(metadata.study_date.as_deref())
    )
}
