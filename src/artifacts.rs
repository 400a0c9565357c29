use crate::store::wav;
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use std::f32::consts::PI;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Metadata a renderer can bake into artifact names.
#[derive(Debug, Clone)]
pub struct ArtifactMeta {
    pub date: String,
    pub time: String,
    pub common_name: String,
    pub confidence: f32,
}

/// Where the artifacts for one detection live. The paths are decided before
/// rendering; a failed render leaves a reference pointing at a file that does
/// not exist, which downstream consumers must tolerate.
#[derive(Debug, Clone)]
pub struct ArtifactRefs {
    pub spectrogram: PathBuf,
    pub audio: PathBuf,
}

/// Best-effort media generation for one detection. Failures are logged, never
/// propagated: a missing PNG must not cost the detection record.
pub trait ArtifactRenderer: Send + Sync {
    fn render(&self, samples: &[f32], sample_rate: u32, meta: &ArtifactMeta) -> ArtifactRefs;
}

/// Renders a grayscale STFT spectrogram PNG and a 16-bit WAV excerpt under
/// `root/<date>/<species>/`.
pub struct MediaRenderer {
    root: PathBuf,
}

impl MediaRenderer {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn target_paths(&self, meta: &ArtifactMeta) -> ArtifactRefs {
        let species = meta.common_name.replace(' ', "_");
        let dir = self.root.join(&meta.date).join(species);
        let base = format!("{}_{:.2}", meta.time.replace(':', "-"), meta.confidence);
        ArtifactRefs {
            spectrogram: dir.join(format!("{base}.png")),
            audio: dir.join(format!("{base}.wav")),
        }
    }
}

impl ArtifactRenderer for MediaRenderer {
    fn render(&self, samples: &[f32], sample_rate: u32, meta: &ArtifactMeta) -> ArtifactRefs {
        let refs = self.target_paths(meta);

        if let Some(dir) = refs.spectrogram.parent() {
            if let Err(e) = std::fs::create_dir_all(dir) {
                warn!(dir = %dir.display(), error = %e, "artifact dir creation failed");
                return refs;
            }
        }

        if let Err(e) = render_spectrogram(samples, &refs.spectrogram) {
            warn!(path = %refs.spectrogram.display(), error = %e, "spectrogram render failed");
        }
        if let Err(e) = wav::write_mono_i16(&refs.audio, samples, sample_rate) {
            warn!(path = %refs.audio.display(), error = %e, "audio excerpt write failed");
        }
        refs
    }
}

const FFT_SIZE: usize = 512;
const HOP: usize = 256;

/// Hann-windowed STFT, log magnitude, mapped to grayscale with low
/// frequencies at the bottom.
fn render_spectrogram(samples: &[f32], path: &Path) -> anyhow::Result<()> {
    if samples.len() < FFT_SIZE {
        anyhow::bail!("chunk too short for a spectrogram");
    }

    let window: Vec<f32> = (0..FFT_SIZE)
        .map(|n| 0.5 * (1.0 - (2.0 * PI * n as f32 / (FFT_SIZE - 1) as f32).cos()))
        .collect();
    let fft = FftPlanner::<f32>::new().plan_fft_forward(FFT_SIZE);

    let columns = (samples.len() - FFT_SIZE) / HOP + 1;
    let bins = FFT_SIZE / 2;
    let mut magnitudes = vec![0.0f32; columns * bins];
    let mut frame = vec![Complex::new(0.0f32, 0.0); FFT_SIZE];

    for col in 0..columns {
        let start = col * HOP;
        for (i, slot) in frame.iter_mut().enumerate() {
            *slot = Complex::new(samples[start + i] * window[i], 0.0);
        }
        fft.process(&mut frame);
        for bin in 0..bins {
            magnitudes[col * bins + bin] = frame[bin].norm();
        }
    }

    let max = magnitudes.iter().cloned().fold(1e-10f32, f32::max);
    let floor_db = -80.0f32;
    let mut img = image::GrayImage::new(columns as u32, bins as u32);
    for col in 0..columns {
        for bin in 0..bins {
            let db = 20.0 * (magnitudes[col * bins + bin] / max).max(1e-10).log10();
            let level = ((db - floor_db) / -floor_db).clamp(0.0, 1.0);
            let pixel = (level * 255.0) as u8;
            // Row 0 is the top of the image; flip so bin 0 sits at the bottom.
            img.put_pixel(col as u32, (bins - 1 - bin) as u32, image::Luma([pixel]));
        }
    }
    img.save(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> ArtifactMeta {
        ArtifactMeta {
            date: "2026-08-07".to_string(),
            time: "06:15:42".to_string(),
            common_name: "Eurasian Wren".to_string(),
            confidence: 0.91,
        }
    }

    #[test]
    fn renders_both_artifacts_for_a_plausible_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = MediaRenderer::new(dir.path().to_path_buf());
        let samples: Vec<f32> = (0..48_000)
            .map(|i| (2.0 * PI * 1000.0 * i as f32 / 48_000.0).sin() * 0.5)
            .collect();

        let refs = renderer.render(&samples, 48_000, &meta());
        assert!(refs.spectrogram.exists());
        assert!(refs.audio.exists());
        assert!(refs
            .spectrogram
            .to_string_lossy()
            .contains("Eurasian_Wren"));
    }

    #[test]
    fn render_failure_still_returns_references() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = MediaRenderer::new(dir.path().to_path_buf());
        // Far too short for the FFT window: the spectrogram fails, the
        // references are still handed back.
        let refs = renderer.render(&[0.0; 16], 48_000, &meta());
        assert!(!refs.spectrogram.exists());
        assert!(refs.spectrogram.to_string_lossy().ends_with(".png"));
    }
}
