use crate::store::clips::Clip;
use chrono::{NaiveDateTime, Timelike};
use tracing::debug;

/// One fixed-length analysis window cut from a clip; the unit fed to the
/// classifier. Created here, consumed exactly once downstream, never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisChunk {
    pub index: usize,
    pub timestamp: NaiveDateTime,
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

/// Splits a loaded clip into fixed-length chunks. Deterministic: the same
/// clip and configuration always yield the same sequence.
#[derive(Debug, Clone, Copy)]
pub struct Segmenter {
    /// Chunk length, seconds.
    pub chunk_duration: u32,
    /// A trailing remainder shorter than this many seconds is discarded.
    pub min_trailing_duration: f32,
}

impl Segmenter {
    pub fn new(chunk_duration: u32, min_trailing_duration: f32) -> Self {
        Self {
            chunk_duration,
            min_trailing_duration,
        }
    }

    /// Cut `clip` into full chunks plus an optional zero-padded trailing
    /// chunk. A clip shorter than one chunk still yields a single padded
    /// chunk if it meets the trailing minimum.
    pub fn segment(&self, clip: &Clip) -> Vec<AnalysisChunk> {
        let chunk_samples = clip.sample_rate as usize * self.chunk_duration as usize;
        if chunk_samples == 0 {
            return Vec::new();
        }
        let min_samples = (clip.sample_rate as f32 * self.min_trailing_duration) as usize;

        let full = clip.samples.len() / chunk_samples;
        let remainder = clip.samples.len() % chunk_samples;
        debug!(
            samples = clip.samples.len(),
            chunk_samples,
            full_chunks = full,
            remainder,
            "segmenting clip"
        );

        let mut chunks = Vec::with_capacity(full + 1);
        for index in 0..full {
            let start = index * chunk_samples;
            chunks.push(AnalysisChunk {
                index,
                timestamp: self.chunk_timestamp(clip.timestamp, index),
                sample_rate: clip.sample_rate,
                samples: clip.samples[start..start + chunk_samples].to_vec(),
            });
        }

        if remainder >= min_samples && remainder > 0 {
            let mut samples = clip.samples[full * chunk_samples..].to_vec();
            samples.resize(chunk_samples, 0.0);
            chunks.push(AnalysisChunk {
                index: full,
                timestamp: self.chunk_timestamp(clip.timestamp, full),
                sample_rate: clip.sample_rate,
                samples,
            });
        } else if remainder > 0 {
            debug!(remainder, min_samples, "trailing remainder discarded");
        }

        chunks
    }

    /// Timestamp of chunk `index`: clip start plus the chunk offset, with the
    /// seconds field saturating at 59. Offsets past the end of the minute do
    /// NOT roll over into minutes; detections late in a long clip all land on
    /// `…:59`.
    fn chunk_timestamp(&self, clip_start: NaiveDateTime, index: usize) -> NaiveDateTime {
        let offset = index as u32 * self.chunk_duration;
        let second = (clip_start.second() + offset).min(59);
        clip_start
            .with_second(second)
            .unwrap_or(clip_start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn clip(len: usize, sample_rate: u32) -> Clip {
        Clip {
            timestamp: NaiveDate::from_ymd_opt(2026, 8, 7)
                .unwrap()
                .and_hms_opt(6, 15, 0)
                .unwrap(),
            sample_rate,
            samples: (0..len).map(|i| (i % 100) as f32 / 100.0).collect(),
        }
    }

    #[test]
    fn ten_and_a_half_seconds_yields_three_full_plus_padded_tail() {
        // 48 kHz, 3 s chunks, 1.5 s minimum: 504 000 samples = 10.5 s.
        let segmenter = Segmenter::new(3, 1.5);
        let chunks = segmenter.segment(&clip(504_000, 48_000));

        assert_eq!(chunks.len(), 4);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert_eq!(chunk.samples.len(), 144_000);
        }
        // Tail: 1.5 s of real audio, zero-padded to 3 s.
        let tail = &chunks[3].samples;
        assert!(tail[..72_000].iter().any(|&s| s != 0.0));
        assert!(tail[72_000..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn short_remainder_is_discarded() {
        // 9.4 s at 48 kHz: remainder 0.4 s < 1.5 s minimum.
        let segmenter = Segmenter::new(3, 1.5);
        let chunks = segmenter.segment(&clip(451_200, 48_000));
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn whole_clip_shorter_than_chunk_becomes_single_padded_chunk() {
        let segmenter = Segmenter::new(3, 1.5);
        let chunks = segmenter.segment(&clip(96_000, 48_000)); // 2 s
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].samples.len(), 144_000);
    }

    #[test]
    fn clip_below_trailing_minimum_yields_nothing() {
        let segmenter = Segmenter::new(3, 1.5);
        let chunks = segmenter.segment(&clip(48_000, 48_000)); // 1 s
        assert!(chunks.is_empty());
    }

    #[test]
    fn segmentation_is_deterministic() {
        let segmenter = Segmenter::new(3, 1.5);
        let c = clip(504_000, 48_000);
        assert_eq!(segmenter.segment(&c), segmenter.segment(&c));
    }

    #[test]
    fn chunk_timestamps_advance_by_chunk_duration() {
        let segmenter = Segmenter::new(3, 1.5);
        let chunks = segmenter.segment(&clip(432_000, 48_000)); // 9 s, 3 chunks
        let seconds: Vec<u32> = chunks.iter().map(|c| c.timestamp.second()).collect();
        assert_eq!(seconds, vec![0, 3, 6]);
    }

    #[test]
    fn chunk_timestamp_seconds_saturate_at_59() {
        let segmenter = Segmenter::new(3, 1.5);
        let start = NaiveDate::from_ymd_opt(2026, 8, 7)
            .unwrap()
            .and_hms_opt(6, 15, 55)
            .unwrap();
        // Offset 9 s would be :64; the seconds field pins to :59 instead of
        // rolling into the next minute.
        let ts = segmenter.chunk_timestamp(start, 3);
        assert_eq!(ts.second(), 59);
        assert_eq!(ts.minute(), 15);
    }
}
