use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::sync::watch;

/// Outcome of the most recent recording cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LastRecording {
    pub file: Option<String>,
    pub time: Option<DateTime<Local>>,
    pub error: Option<String>,
}

/// Snapshot of the capture service, shared with the local watcher and the
/// pull-queue HTTP surface. Replaced wholesale on every change so readers
/// never observe a half-updated value.
#[derive(Debug, Clone, Serialize)]
pub struct CaptureStatus {
    pub device: String,
    pub sample_rate: u32,
    pub record_duration: u32,
    /// Name of the clip currently being written; never offered as ready.
    pub in_progress: Option<String>,
    pub last_recording: LastRecording,
}

impl CaptureStatus {
    pub fn new(device: String, sample_rate: u32, record_duration: u32) -> Self {
        Self {
            device,
            sample_rate,
            record_duration,
            in_progress: None,
            last_recording: LastRecording::default(),
        }
    }
}

pub type StatusReader = watch::Receiver<CaptureStatus>;

/// Writer half held by the capture loop.
#[derive(Debug)]
pub struct StatusHandle {
    tx: watch::Sender<CaptureStatus>,
}

pub fn status_channel(initial: CaptureStatus) -> (StatusHandle, StatusReader) {
    let (tx, rx) = watch::channel(initial);
    (StatusHandle { tx }, rx)
}

impl StatusHandle {
    pub fn set_in_progress(&self, name: &str) {
        self.replace(|status| status.in_progress = Some(name.to_string()));
    }

    pub fn recording_finished(&self, name: &str) {
        self.replace(|status| {
            status.in_progress = None;
            status.last_recording = LastRecording {
                file: Some(name.to_string()),
                time: Some(Local::now()),
                error: None,
            };
        });
    }

    pub fn recording_failed(&self, error: &str) {
        self.replace(|status| {
            status.in_progress = None;
            status.last_recording.error = Some(error.to_string());
        });
    }

    fn replace(&self, update: impl FnOnce(&mut CaptureStatus)) {
        let mut next = self.tx.borrow().clone();
        update(&mut next);
        let _ = self.tx.send(next);
    }
}
