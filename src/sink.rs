use crate::artifacts::{ArtifactMeta, ArtifactRenderer};
use crate::classify::SpeciesHit;
use crate::segment::AnalysisChunk;
use crate::store::detections::{DetectionStore, NewDetection, StoreError};
use std::time::Duration;
use tracing::{error, info, warn};

const MAX_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Persists accepted classification results. Artifacts are generated first
/// and best-effort; the database insert retries transient contention before
/// giving up on the one record.
pub struct DetectionSink {
    store: DetectionStore,
    renderer: Box<dyn ArtifactRenderer>,
}

impl DetectionSink {
    pub fn new(store: DetectionStore, renderer: Box<dyn ArtifactRenderer>) -> Self {
        Self { store, renderer }
    }

    /// Persist one hit for one chunk. Never fails the caller: a dropped
    /// detection is logged and must not abort sibling hits or the clip.
    pub async fn persist(&self, chunk: &AnalysisChunk, hit: &SpeciesHit) {
        let date = chunk.timestamp.format("%Y-%m-%d").to_string();
        let time = chunk.timestamp.format("%H:%M:%S").to_string();

        let meta = ArtifactMeta {
            date: date.clone(),
            time: time.clone(),
            common_name: hit.common_name.clone(),
            confidence: hit.confidence,
        };
        let refs = self
            .renderer
            .render(&chunk.samples, chunk.sample_rate, &meta);

        let detection = NewDetection {
            date,
            time,
            common_name: hit.common_name.clone(),
            scientific_name: hit.scientific_name.clone(),
            confidence: hit.confidence,
            spectrogram_path: refs.spectrogram,
            audio_path: refs.audio,
        };

        for attempt in 1..=MAX_ATTEMPTS {
            match self.store.insert(&detection) {
                Ok(()) => {
                    info!(
                        species = %hit.common_name,
                        confidence = hit.confidence,
                        time = %detection.time,
                        "detection stored"
                    );
                    return;
                }
                Err(StoreError::Transient(e)) if attempt < MAX_ATTEMPTS => {
                    warn!(
                        attempt,
                        max = MAX_ATTEMPTS,
                        error = %e,
                        "detection store busy, retrying"
                    );
                    tokio::time::sleep(RETRY_BASE_DELAY * attempt).await;
                }
                Err(e) => {
                    error!(
                        species = %hit.common_name,
                        error = %e,
                        "detection dropped after storage failure"
                    );
                    return;
                }
            }
        }
    }
}
