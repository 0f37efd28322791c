//! Worker-side message sink.

use std::path::PathBuf;
use tokio::sync::mpsc;

use crate::protocol::{EpisodeComplete, EpisodeFailed, WorkerMessage};

/// Cloneable handle for emitting worker messages from any thread.
///
/// Messages go onto an unbounded channel so blocking fetch threads never wait
/// on stdout. A silent reporter drops everything (used by tests and by the
/// CLI when it downloads outside a worker).
#[derive(Clone, Debug)]
pub struct Reporter {
    tx: Option<mpsc::UnboundedSender<WorkerMessage>>,
}

impl Reporter {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<WorkerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn silent() -> Self {
        Self { tx: None }
    }

    pub fn send(&self, msg: WorkerMessage) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(msg);
        }
    }

    pub fn info(&self, text: impl Into<String>) {
        self.send(WorkerMessage::Info(text.into()));
    }

    pub fn warn(&self, text: impl Into<String>) {
        self.send(WorkerMessage::Warn(text.into()));
    }

    pub fn error(&self, text: impl Into<String>) {
        self.send(WorkerMessage::Error(text.into()));
    }

    pub fn debug(&self, text: impl Into<String>) {
        self.send(WorkerMessage::Debug(text.into()));
    }

    pub fn complete(&self, episode_number: u32, file_path: PathBuf, task_title: &str) {
        self.send(WorkerMessage::DownloadComplete(EpisodeComplete {
            episode_number,
            file_path,
            task_title: task_title.to_string(),
        }));
    }

    pub fn failed(&self, episode_number: u32, task_title: &str) {
        self.send(WorkerMessage::DownloadError(EpisodeFailed {
            episode_number,
            task_title: task_title.to_string(),
        }));
    }
}
