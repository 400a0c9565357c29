use super::{AcquiredClip, AcquisitionSource};
use crate::capture::status::StatusReader;
use crate::store::clips::{timestamp_from_name, Clip, ClipStore};
use crate::store::wav;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const PROBE_INTERVAL: Duration = Duration::from_millis(500);
const PROBE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stability {
    /// Two consecutive size probes agreed on a non-zero size.
    Ready,
    /// The timeout elapsed while the size was still moving; processing
    /// proceeds anyway as best effort.
    ReadyAfterTimeout,
    /// The file vanished while we were waiting.
    Disappeared,
}

/// Poll `path`'s size every `interval` until two consecutive probes report an
/// unchanged, non-zero size, or `timeout` elapses. The capture process writes
/// incrementally, so reading before stability would yield a truncated clip.
pub async fn wait_until_stable(path: &Path, interval: Duration, timeout: Duration) -> Stability {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut previous: Option<u64> = None;

    loop {
        let size = match tokio::fs::metadata(path).await {
            Ok(meta) => meta.len(),
            Err(_) => return Stability::Disappeared,
        };
        if size > 0 && previous == Some(size) {
            return Stability::Ready;
        }
        previous = Some(size);

        if tokio::time::Instant::now() + interval > deadline {
            warn!(
                path = %path.display(),
                size,
                "stability probe timed out, proceeding anyway"
            );
            return Stability::ReadyAfterTimeout;
        }
        tokio::time::sleep(interval).await;
    }
}

/// Watches the clip store directory for new clips. Pre-existing clips are
/// processed first (a previous run may have crashed before deleting them),
/// then filesystem creation events drive the loop.
pub struct LocalWatch {
    store: ClipStore,
    target_rate: u32,
    backlog: VecDeque<String>,
    events: mpsc::UnboundedReceiver<String>,
    // Dropping the watcher stops the notify thread; kept alive here.
    _watcher: RecommendedWatcher,
}

impl LocalWatch {
    pub fn new(store: ClipStore, status: StatusReader, target_rate: u32) -> anyhow::Result<Self> {
        let in_progress = status.borrow().in_progress.clone();
        let backlog: VecDeque<String> = store.list_ready(in_progress.as_deref())?.into();
        if !backlog.is_empty() {
            info!(count = backlog.len(), "processing clips left from a previous run");
        }

        let (tx, events) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |res: Result<notify::Event, notify::Error>| {
                let event = match res {
                    Ok(event) => event,
                    Err(_) => return,
                };
                if !matches!(event.kind, EventKind::Create(_)) {
                    return;
                }
                for path in event.paths {
                    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                        if name.to_ascii_lowercase().ends_with(".wav") {
                            let _ = tx.send(name.to_string());
                        }
                    }
                }
            },
            notify::Config::default(),
        )?;
        watcher.watch(store.dir(), RecursiveMode::NonRecursive)?;
        info!(dir = %store.dir().display(), "watching clip store");

        Ok(Self {
            store,
            target_rate,
            backlog,
            events,
            _watcher: watcher,
        })
    }

    /// Probe for stability, then load. `None` means the clip was skipped
    /// (vanished or undecodable) and the loop should move on.
    async fn acquire(&self, name: &str) -> Option<AcquiredClip> {
        let path = match self.store.path_for(name) {
            Ok(path) => path,
            Err(e) => {
                warn!(name, error = %e, "ignoring invalid clip name");
                return None;
            }
        };

        match wait_until_stable(&path, PROBE_INTERVAL, PROBE_TIMEOUT).await {
            Stability::Disappeared => {
                debug!(name, "clip disappeared before it became stable");
                return None;
            }
            Stability::Ready | Stability::ReadyAfterTimeout => {}
        }

        match wav::load_mono(&path, self.target_rate) {
            Ok(samples) => Some(AcquiredClip {
                name: name.to_string(),
                path,
                clip: Clip {
                    timestamp: timestamp_from_name(name),
                    sample_rate: self.target_rate,
                    samples,
                },
            }),
            Err(e) => {
                // Left in place: the startup backlog scan retries it next run.
                warn!(name, error = %e, "failed to load clip, skipping");
                None
            }
        }
    }
}

impl AcquisitionSource for LocalWatch {
    async fn next_clip(&mut self, cancel: &CancellationToken) -> Option<AcquiredClip> {
        loop {
            let name = if let Some(name) = self.backlog.pop_front() {
                name
            } else {
                tokio::select! {
                    _ = cancel.cancelled() => return None,
                    event = self.events.recv() => event?,
                }
            };

            // No in-progress exclusion here: a creation event may race the
            // recorder's status update, and the stability probe already
            // guards against reading a file that is still being written.
            if let Some(acquired) = self.acquire(&name).await {
                return Some(acquired);
            }
        }
    }

    async fn release(&mut self, acquired: &AcquiredClip) {
        match self.store.delete(&acquired.name) {
            Ok(true) => debug!(name = %acquired.name, "clip consumed and deleted"),
            Ok(false) => debug!(name = %acquired.name, "clip already gone"),
            Err(e) => warn!(name = %acquired.name, error = %e, "could not delete clip"),
        }
    }
}
