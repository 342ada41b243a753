//
// main.rs
// Pacs-Sync-rs
//
// Tokio entry point that hands off execution to the CLI layer.
//
// Thales Matheus Mendonça Santos - October 2026

use pacs_sync::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::run().await
}
