use crate::acquire::{AcquiredClip, AcquisitionSource};
use crate::classify::Classifier;
use crate::segment::Segmenter;
use crate::sink::DetectionSink;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const SILENCE_RMS: f32 = 1e-6;

/// The sequential consumer half of the system: one clip at a time, one chunk
/// at a time. The classifier is owned exclusively here, which is what makes
/// its non-reentrancy guarantee hold.
pub struct Pipeline {
    segmenter: Segmenter,
    classifier: Classifier,
    sink: DetectionSink,
}

impl Pipeline {
    pub fn new(segmenter: Segmenter, classifier: Classifier, sink: DetectionSink) -> Self {
        Self {
            segmenter,
            classifier,
            sink,
        }
    }

    /// Drain `source` until cancellation. Failures stay inside their clip:
    /// the loop always advances to the next delivery.
    pub async fn run<S: AcquisitionSource>(mut self, mut source: S, cancel: CancellationToken) {
        info!("analysis pipeline started");
        while let Some(acquired) = source.next_clip(&cancel).await {
            self.process_clip(&acquired).await;
            source.release(&acquired).await;
        }
        info!("analysis pipeline stopped");
    }

    async fn process_clip(&mut self, acquired: &AcquiredClip) {
        let clip = &acquired.clip;
        info!(
            clip = %acquired.name,
            duration_secs = clip.duration_secs(),
            samples = clip.samples.len(),
            "processing clip"
        );
        if clip.rms() < SILENCE_RMS {
            warn!(clip = %acquired.name, "clip is near-silent, likely a capture problem");
        }

        let chunks = self.segmenter.segment(clip);
        let mut detections = 0usize;
        for chunk in &chunks {
            let hits = match self.classifier.classify(&chunk.samples) {
                Ok(hits) => hits,
                Err(e) => {
                    // One bad chunk never costs its siblings.
                    warn!(
                        clip = %acquired.name,
                        chunk = chunk.index,
                        error = %e,
                        "classification failed for chunk"
                    );
                    continue;
                }
            };
            detections += hits.len();
            for hit in &hits {
                self.sink.persist(chunk, hit).await;
            }
        }
        info!(
            clip = %acquired.name,
            chunks = chunks.len(),
            detections,
            "clip processed"
        );
    }
}
