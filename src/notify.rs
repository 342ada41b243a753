use std::sync::Mutex;

use tracing::{error, info, warn};

/// User-facing message sink. The CLI logs; a desktop shell would pop a dialog.
pub trait Notifier: Send + Sync {
    fn info(&self, title: &str, message: &str);
    fn warning(&self, title: &str, message: &str);
    fn error(&self, title: &str, message: &str);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn info(&self, title: &str, message: &str) {
        info!(title, "{}", message);
    }

    fn warning(&self, title: &str, message: &str) {
        warn!(title, "{}", message);
    }

    fn error(&self, title: &str, message: &str) {
        error!(title, "{}", message);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warning,
    Error,
}

/// Keeps every notification in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<(Level, String, String)>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<(Level, String, String)> {
        self.messages.lock().map(|m| m.clone()).unwrap_or_default()
    }

    fn push(&self, level: Level, title: &str, message: &str) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push((level, title.to_string(), message.to_string()));
        }
    }
}

impl Notifier for RecordingNotifier {
    fn info(&self, title: &str, message: &str) {
        self.push(Level::Info, title, message);
    }

    fn warning(&self, title: &str, message: &str) {
        self.push(Level::Warning, title, message);
    }

    fn error(&self, title: &str, message: &str) {
        self.push(Level::Error, title, message);
    }
}
