pub mod labels;
pub mod onnx;

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("inference failed: {0}")]
    Inference(String),
}

/// The single-shot tensor-in/logits-out inference seam. One implementation
/// per backend; the classifier owns exactly one instance and never runs two
/// invocations concurrently.
pub trait AcousticModel: Send {
    /// Sample count the model expects, independent of the configured chunk
    /// duration.
    fn input_len(&self) -> usize;

    /// Run the model over exactly `input_len()` samples, returning one raw
    /// logit per known label.
    fn infer(&mut self, samples: &[f32]) -> Result<Vec<f32>, ModelError>;
}

/// One species hit for one chunk. Multi-label: several hits per chunk are
/// independent of each other.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeciesHit {
    pub common_name: String,
    pub scientific_name: String,
    pub confidence: f32,
}

/// Wraps the model with the pad/trim, sigmoid, threshold and label-decoding
/// contract. `classify` takes `&mut self`: the borrow rules make a second
/// in-flight invocation against the same model impossible.
pub struct Classifier {
    model: Box<dyn AcousticModel>,
    labels: Vec<String>,
    threshold: f32,
    scratch: Vec<f32>,
}

impl Classifier {
    pub fn new(model: Box<dyn AcousticModel>, labels: Vec<String>, threshold: f32) -> Self {
        Self {
            model,
            labels,
            threshold,
            scratch: Vec::new(),
        }
    }

    pub fn input_len(&self) -> usize {
        self.model.input_len()
    }

    /// Classify one chunk's samples. Returns every label whose sigmoid
    /// probability reaches the threshold; equality counts as a match.
    pub fn classify(&mut self, samples: &[f32]) -> Result<Vec<SpeciesHit>, ModelError> {
        let expected = self.model.input_len();
        self.scratch.clear();
        let take = samples.len().min(expected);
        self.scratch.extend_from_slice(&samples[..take]);
        self.scratch.resize(expected, 0.0);

        let logits = self.model.infer(&self.scratch)?;
        let probabilities: Vec<f32> = logits.iter().map(|&l| stable_sigmoid(l)).collect();

        log_top_predictions(&probabilities, &self.labels, self.threshold);

        let mut hits = Vec::new();
        for (index, &confidence) in probabilities.iter().enumerate() {
            if confidence >= self.threshold && index < self.labels.len() {
                let (scientific, common) = labels::decode_label(&self.labels[index]);
                hits.push(SpeciesHit {
                    common_name: common.to_string(),
                    scientific_name: scientific.to_string(),
                    confidence,
                });
            }
        }
        Ok(hits)
    }
}

/// Sigmoid with the logit clamped to [-15, 15] before exponentiation, so any
/// finite input maps into [0, 1] without overflow.
pub fn stable_sigmoid(logit: f32) -> f32 {
    1.0 / (1.0 + (-logit.clamp(-15.0, 15.0)).exp())
}

fn log_top_predictions(probabilities: &[f32], labels: &[String], threshold: f32) {
    if !tracing::enabled!(tracing::Level::DEBUG) {
        return;
    }
    let mut ranked: Vec<(usize, f32)> = probabilities.iter().copied().enumerate().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    for (rank, (index, p)) in ranked.iter().take(5).enumerate() {
        let label = labels.get(*index).map(String::as_str).unwrap_or("<unknown>");
        debug!(rank = rank + 1, confidence = *p, label, threshold, "top prediction");
    }
}
