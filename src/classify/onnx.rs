use super::{AcousticModel, ModelError};
use ort::session::Session;
use ort::value::{Tensor, ValueType};
use std::path::Path;
use tracing::info;

/// ONNX Runtime backend. Expects a model taking one `[1, N]` f32 waveform
/// tensor and producing one flat logits vector.
pub struct OnnxModel {
    session: Session,
    input_len: usize,
}

impl OnnxModel {
    /// Load the model; a missing file is fatal at startup. `fallback_len` is
    /// used when the model declares a dynamic input dimension.
    pub fn load(path: &Path, fallback_len: usize) -> anyhow::Result<Self> {
        if !path.exists() {
            anyhow::bail!("model file not found: {}", path.display());
        }
        let session = Session::builder()?
            .with_intra_threads(1)?
            .commit_from_file(path)?;

        let declared = session.inputs.first().and_then(|input| {
            match &input.input_type {
                ValueType::Tensor { shape, .. } => shape.last().copied(),
                _ => None,
            }
        });
        let input_len = match declared {
            Some(n) if n > 0 => n as usize,
            _ => fallback_len,
        };

        info!(
            path = %path.display(),
            input_len,
            declared = ?declared,
            "acoustic model loaded"
        );
        Ok(Self { session, input_len })
    }
}

impl AcousticModel for OnnxModel {
    fn input_len(&self) -> usize {
        self.input_len
    }

    fn infer(&mut self, samples: &[f32]) -> Result<Vec<f32>, ModelError> {
        let tensor = Tensor::from_array(([1, samples.len()], samples.to_vec()))
            .map_err(|e| ModelError::Inference(e.to_string()))?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .map_err(|e| ModelError::Inference(e.to_string()))?;
        let (_, logits) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::Inference(e.to_string()))?;
        Ok(logits.to_vec())
    }
}
