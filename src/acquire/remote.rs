use super::{AcquiredClip, AcquisitionSource};
use crate::store::clips::{timestamp_from_name, validate_clip_name, Clip};
use crate::store::wav;
use reqwest::StatusCode;
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Pull-queue client: polls a remote recorder's HTTP surface, downloads each
/// queued clip into a local spool directory, and confirms deletion after
/// processing.
///
/// The `seen` set is session-scoped and in-memory on purpose: the server-side
/// delete is the real de-duplication boundary, and a restart only re-lists
/// entries that were never delete-confirmed. A filename is marked seen only
/// after a successful download, so a transport failure is retried on the next
/// poll.
pub struct RemoteQueue {
    client: reqwest::Client,
    base_url: String,
    spool: PathBuf,
    target_rate: u32,
    poll: tokio::time::Interval,
    seen: HashSet<String>,
    pending: VecDeque<String>,
}

impl RemoteQueue {
    pub fn new(
        base_url: String,
        poll_interval: Duration,
        spool: PathBuf,
        target_rate: u32,
    ) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&spool)?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        let base_url = base_url.trim_end_matches('/').to_string();
        info!(base_url = %base_url, "remote queue client ready");
        Ok(Self {
            client,
            base_url,
            spool,
            target_rate,
            poll: tokio::time::interval(poll_interval),
            seen: HashSet::new(),
            pending: VecDeque::new(),
        })
    }

    /// Fetch the remote status once, for startup diagnostics. Failing to
    /// reach the recorder is an error the caller decides about.
    pub async fn probe_status(&self) -> anyhow::Result<serde_json::Value> {
        let response = self
            .client
            .get(format!("{}/status", self.base_url))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn list(&self) -> anyhow::Result<Vec<String>> {
        let response = self
            .client
            .get(format!("{}/wavs", self.base_url))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn download(&self, name: &str) -> anyhow::Result<PathBuf> {
        validate_clip_name(name)?;
        let response = self
            .client
            .get(format!("{}/wavs/{name}", self.base_url))
            .send()
            .await?
            .error_for_status()?;
        let bytes = response.bytes().await?;
        let dest = self.spool.join(name);
        tokio::fs::write(&dest, &bytes).await?;
        debug!(name, bytes = bytes.len(), "downloaded clip");
        Ok(dest)
    }

    /// Fire-and-forget delete confirmation. A 404 means the entry is already
    /// gone, which is exactly the state we wanted.
    async fn delete_remote(&self, name: &str) {
        let result = self
            .client
            .delete(format!("{}/wavs/{name}", self.base_url))
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => {
                debug!(name, "remote clip delete confirmed");
            }
            Ok(response) if response.status() == StatusCode::NOT_FOUND => {
                debug!(name, "remote clip already deleted");
            }
            Ok(response) => {
                warn!(name, status = %response.status(), "remote delete refused");
            }
            Err(e) => {
                warn!(name, error = %e, "remote delete failed");
            }
        }
    }

    async fn refill(&mut self) {
        match self.list().await {
            Ok(names) => {
                let fresh: Vec<String> = names
                    .into_iter()
                    .filter(|name| !self.seen.contains(name))
                    .collect();
                if !fresh.is_empty() {
                    debug!(count = fresh.len(), "new remote clips queued");
                }
                self.pending.extend(fresh);
            }
            Err(e) => warn!(error = %e, "failed to list remote queue"),
        }
    }
}

impl AcquisitionSource for RemoteQueue {
    async fn next_clip(&mut self, cancel: &CancellationToken) -> Option<AcquiredClip> {
        loop {
            while let Some(name) = self.pending.pop_front() {
                if self.seen.contains(&name) {
                    continue;
                }
                let path = match self.download(&name).await {
                    Ok(path) => path,
                    Err(e) => {
                        // Not marked seen: the next listing retries it.
                        warn!(name = %name, error = %e, "download failed, will retry next poll");
                        continue;
                    }
                };
                self.seen.insert(name.clone());

                match wav::load_mono(&path, self.target_rate) {
                    Ok(samples) => {
                        return Some(AcquiredClip {
                            clip: Clip {
                                timestamp: timestamp_from_name(&name),
                                sample_rate: self.target_rate,
                                samples,
                            },
                            name,
                            path,
                        });
                    }
                    Err(e) => {
                        // Undecodable download counts as processed: release it
                        // so the remote queue keeps draining.
                        warn!(name = %name, error = %e, "downloaded clip undecodable, releasing");
                        self.delete_remote(&name).await;
                        let _ = tokio::fs::remove_file(&path).await;
                    }
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = self.poll.tick() => {}
            }
            self.refill().await;
        }
    }

    async fn release(&mut self, acquired: &AcquiredClip) {
        self.delete_remote(&acquired.name).await;
        if let Err(e) = tokio::fs::remove_file(&acquired.path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(name = %acquired.name, error = %e, "could not remove spooled clip");
            }
        }
    }
}
