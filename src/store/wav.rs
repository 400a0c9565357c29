use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum WavError {
    #[error("wav decode failed: {0}")]
    Decode(#[from] hound::Error),
    #[error("unsupported wav format: {0}")]
    Unsupported(String),
    #[error("resample failed: {0}")]
    Resample(String),
}

/// Decode a WAV file into mono f32 samples at `target_rate`.
///
/// Multi-channel input is downmixed by averaging; a differing source rate is
/// resampled. Integer formats are normalized into [-1, 1].
pub fn load_mono(path: &Path, target_rate: u32) -> Result<Vec<f32>, WavError> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Float, 32) => {
            reader.samples::<f32>().collect::<Result<_, _>>()?
        }
        (hound::SampleFormat::Int, bits) if bits <= 32 => {
            let scale = (1i64 << (bits - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()?
        }
        (format, bits) => {
            return Err(WavError::Unsupported(format!("{format:?}/{bits}bit")));
        }
    };

    let mono = downmix(&interleaved, channels);
    debug!(
        path = %path.display(),
        source_rate = spec.sample_rate,
        channels,
        samples = mono.len(),
        "decoded clip"
    );

    if spec.sample_rate == target_rate {
        return Ok(mono);
    }
    resample(&mono, spec.sample_rate, target_rate)
}

/// Write mono f32 samples as a 16-bit PCM WAV.
pub fn write_mono_i16(path: &Path, samples: &[f32], sample_rate: u32) -> Result<(), hound::Error> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for &sample in samples {
        let scaled = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
        writer.write_sample(scaled)?;
    }
    writer.finalize()
}

pub(crate) fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Sinc resampler over fixed-size blocks; the tail block is padded with its
/// last sample and the output trimmed back to the expected length.
pub(crate) fn resample(
    input: &[f32],
    source_rate: u32,
    target_rate: u32,
) -> Result<Vec<f32>, WavError> {
    if input.is_empty() || source_rate == 0 {
        return Ok(input.to_vec());
    }
    let ratio = f64::from(target_rate) / f64::from(source_rate);
    let chunk = 1024usize;
    let params = SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Cubic,
        oversampling_factor: 128,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, chunk, 1)
        .map_err(|e| WavError::Resample(e.to_string()))?;

    let expected = (input.len() as f64 * ratio).round() as usize;
    let mut out = Vec::with_capacity(expected + chunk);
    let mut block = vec![0.0f32; chunk];
    for segment in input.chunks(chunk) {
        let pad = segment.last().copied().unwrap_or(0.0);
        block.fill(pad);
        block[..segment.len()].copy_from_slice(segment);
        let produced = resampler
            .process(&[&block], None)
            .map_err(|e| WavError::Resample(e.to_string()))?;
        out.extend_from_slice(&produced[0]);
    }
    out.truncate(expected);
    Ok(out)
}
