//
// worker.rs
// Pacs-Sync-rs
//
// Runs blocking store and network work off the async runtime, forwarding progress messages to the caller.
//
// Thales Matheus Mendonça Santos - October 2026

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::sync::mpsc;
use tokio::task;

/// Cooperative cancellation flag shared between the caller and a running job.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Progress callback handed to a blocking job.
pub type Progress = Box<dyn Fn(String) + Send + Sync>;

/// Run `job` on the blocking pool. Messages the job reports are delivered to `on_progress` as they arrive.
pub async fn run_blocking<T, F, P>(job: F, on_progress: P) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(Progress) -> T + Send + 'static,
    P: Fn(&str),
{
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let progress: Progress = Box::new(move |message| {
        // The receiver only goes away once the job is done.
        let _ = tx.send(message);
    });

    let handle = task::spawn_blocking(move || job(progress));
    while let Some(message) = rx.recv().await {
        on_progress(&message);
    }
    handle
        .await
        .map_err(|e| anyhow!("background job failed: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn progress_reaches_the_caller_in_order() {
        let seen = Mutex::new(Vec::new());
        let value = run_blocking(
            |progress| {
                progress("fetching".to_string());
                progress("uploading".to_string());
                42
            },
            |message| seen.lock().expect("seen").push(message.to_string()),
        )
        .await
        .expect("job");

        assert_eq!(value, 42);
        assert_eq!(
            seen.into_inner().expect("seen"),
            vec!["fetching".to_string(), "uploading".to_string()]
        );
    }

    #[test]
    fn token_is_shared_between_clones() {
        let token = CancellationToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        token.cancel();
        assert!(other.is_cancelled());
    }
}
