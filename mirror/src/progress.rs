//! Advisory progress reporting for mirror and prune passes

use std::time::{Duration, Instant};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{MirrorError, Result};

/// Progress event types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProgressEvent {
    /// Pass started
    PassStarted {
        session_id: Uuid,
        source: String,
        destination: String,
    },
    /// One listing page arrived
    PageListed {
        page: usize,
        objects: usize,
    },
    /// Object already matched locally
    Skipped {
        key: String,
    },
    /// Local copy had a different size and will be replaced
    SizeMismatch {
        key: String,
        expected_bytes: u64,
        local_bytes: u64,
    },
    /// Object fetched
    FetchCompleted {
        key: String,
        bytes: u64,
        duration: Duration,
    },
    /// Object fetch failed
    FetchFailed {
        key: String,
        error: String,
    },
    /// Stray local file removed (or would be, in a dry run)
    FileDeleted {
        key: String,
        bytes: u64,
    },
    /// Pass finished
    PassCompleted {
        session_id: Uuid,
        summary: String,
        duration: Duration,
    },
}

/// Progress channel for receiving progress updates
pub struct ProgressChannel {
    receiver: mpsc::UnboundedReceiver<ProgressEvent>,
}

impl ProgressChannel {
    /// Create a new progress channel
    pub fn new() -> (ProgressReporter, Self) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let reporter = ProgressReporter::new(sender);
        let channel = Self { receiver };
        (reporter, channel)
    }

    /// Receive the next progress event
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.receiver.recv().await
    }

    /// Try to receive a progress event without blocking
    pub fn try_recv(&mut self) -> Result<ProgressEvent> {
        self.receiver.try_recv().map_err(|e| match e {
            mpsc::error::TryRecvError::Empty => MirrorError::Generic(anyhow::anyhow!("No progress events available")),
            mpsc::error::TryRecvError::Disconnected => MirrorError::Generic(anyhow::anyhow!("Progress channel disconnected")),
        })
    }
}

/// Progress reporter for sending progress updates. Cloned into every fetch
/// worker; a dropped channel never fails the pass.
#[derive(Clone)]
pub struct ProgressReporter {
    sender: mpsc::UnboundedSender<ProgressEvent>,
    session_id: Uuid,
    start_time: Instant,
}

impl ProgressReporter {
    fn new(sender: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        Self {
            sender,
            session_id: Uuid::new_v4(),
            start_time: Instant::now(),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn pass_started(&self, source: impl Into<String>, destination: impl Into<String>) {
        self.send(ProgressEvent::PassStarted {
            session_id: self.session_id,
            source: source.into(),
            destination: destination.into(),
        });
    }

    pub fn page_listed(&self, page: usize, objects: usize) {
        self.send(ProgressEvent::PageListed { page, objects });
    }

    pub fn skipped(&self, key: impl Into<String>) {
        self.send(ProgressEvent::Skipped { key: key.into() });
    }

    pub fn size_mismatch(&self, key: impl Into<String>, expected_bytes: u64, local_bytes: u64) {
        self.send(ProgressEvent::SizeMismatch {
            key: key.into(),
            expected_bytes,
            local_bytes,
        });
    }

    pub fn fetch_completed(&self, key: impl Into<String>, bytes: u64, duration: Duration) {
        self.send(ProgressEvent::FetchCompleted {
            key: key.into(),
            bytes,
            duration,
        });
    }

    pub fn fetch_failed(&self, key: impl Into<String>, error: impl Into<String>) {
        self.send(ProgressEvent::FetchFailed {
            key: key.into(),
            error: error.into(),
        });
    }

    pub fn file_deleted(&self, key: impl Into<String>, bytes: u64) {
        self.send(ProgressEvent::FileDeleted {
            key: key.into(),
            bytes,
        });
    }

    pub fn pass_completed(&self, summary: impl Into<String>) {
        self.send(ProgressEvent::PassCompleted {
            session_id: self.session_id,
            summary: summary.into(),
            duration: self.start_time.elapsed(),
        });
    }

    fn send(&self, event: ProgressEvent) {
        // Progress is advisory
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_progress_channel() {
        let (reporter, mut channel) = ProgressChannel::new();

        reporter.pass_started("memory bucket 'test'", "/tmp/mirror");
        reporter.fetch_completed("a.txt", 10, Duration::from_millis(5));

        match channel.recv().await.unwrap() {
            ProgressEvent::PassStarted { session_id, destination, .. } => {
                assert_eq!(session_id, reporter.session_id());
                assert_eq!(destination, "/tmp/mirror");
            }
            other => panic!("Expected PassStarted event, got {:?}", other),
        }

        match channel.recv().await.unwrap() {
            ProgressEvent::FetchCompleted { key, bytes, .. } => {
                assert_eq!(key, "a.txt");
                assert_eq!(bytes, 10);
            }
            other => panic!("Expected FetchCompleted event, got {:?}", other),
        }

        assert!(channel.try_recv().is_err());
    }

    #[test]
    fn test_dropped_channel_is_ignored() {
        let (reporter, channel) = ProgressChannel::new();
        drop(channel);

        reporter.skipped("a.txt");
        reporter.pass_completed("done");
    }
}
