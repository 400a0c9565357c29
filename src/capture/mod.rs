pub mod status;

use crate::config::AudioConfig;
use crate::store::clips::{ClipStore, TIMESTAMP_FORMAT};
use crate::store::wav;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::HeapRb;
use status::StatusHandle;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Delay before retrying after a failed recording cycle.
const RETRY_BACKOFF: Duration = Duration::from_secs(5);
/// Granularity at which the blocking loop re-checks the cancellation token.
const PACE: Duration = Duration::from_millis(100);

/// Continuously records fixed-duration clips into the clip store.
///
/// Runs on a blocking thread: cpal streams are not `Send`, and the loop's only
/// waiting is wall-clock pacing. The in-flight recording finishes before a
/// shutdown takes effect.
pub struct CaptureService {
    audio: AudioConfig,
    store: ClipStore,
    status: StatusHandle,
}

impl CaptureService {
    pub fn new(audio: AudioConfig, store: ClipStore, status: StatusHandle) -> Self {
        Self {
            audio,
            store,
            status,
        }
    }

    /// Record clips until cancelled. One well-formed WAV per successful
    /// cycle; a failed cycle logs, reports status, and backs off.
    pub fn run_blocking(self, cancel: CancellationToken) {
        info!(
            device = self.audio.device.as_deref().unwrap_or("default"),
            sample_rate = self.audio.sample_rate,
            duration = self.audio.record_duration,
            dir = %self.store.dir().display(),
            "capture service started"
        );

        while !cancel.is_cancelled() {
            let name = format!(
                "{}.wav",
                chrono::Local::now().format(TIMESTAMP_FORMAT)
            );
            self.status.set_in_progress(&name);

            match self.record_one(&name) {
                Ok(()) => {
                    info!(clip = %name, "recorded clip");
                    self.status.recording_finished(&name);
                }
                Err(e) => {
                    error!(clip = %name, error = %e, "recording failed");
                    // A half-written file must never enter the ready set;
                    // remove it while the name is still flagged in-progress.
                    if let Err(e) = self.store.delete(&name) {
                        warn!(clip = %name, error = %e, "could not remove partial clip");
                    }
                    self.status.recording_failed(&e.to_string());
                    sleep_cancellable(RETRY_BACKOFF, &cancel);
                }
            }
        }
        info!("capture service stopped");
    }

    fn record_one(&self, name: &str) -> anyhow::Result<()> {
        let duration = self.audio.record_duration();
        let (samples, native_rate, channels) =
            record_device(self.audio.device.as_deref(), duration)?;

        let mut mono = wav::downmix(&samples, channels);
        if native_rate != self.audio.sample_rate {
            mono = wav::resample(&mono, native_rate, self.audio.sample_rate)?;
        }
        // cpal delivers on callback cadence; trim the overrun so every clip
        // is exactly the configured duration.
        let expected = self.audio.sample_rate as usize * self.audio.record_duration as usize;
        mono.truncate(expected);

        if mono.is_empty() {
            anyhow::bail!("no samples captured; check device availability");
        }

        let path = self.store.path_for(name)?;
        wav::write_mono_i16(&path, &mono, self.audio.sample_rate)?;
        Ok(())
    }
}

/// Record `duration` of audio from the named (or default) input device.
/// Returns interleaved samples at the device's native rate.
fn record_device(
    preferred: Option<&str>,
    duration: Duration,
) -> anyhow::Result<(Vec<f32>, u32, usize)> {
    let host = cpal::default_host();
    let device = match preferred {
        Some(name) => host
            .input_devices()?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| anyhow::anyhow!("input device '{name}' not found"))?,
        None => host
            .default_input_device()
            .ok_or_else(|| anyhow::anyhow!("no default input device"))?,
    };

    let config = device.default_input_config()?;
    let format = config.sample_format();
    let stream_config: cpal::StreamConfig = config.into();
    let native_rate = stream_config.sample_rate.0;
    let channels = usize::from(stream_config.channels.max(1));

    let capacity = native_rate as usize * channels * 2;
    let (mut producer, mut consumer) = HeapRb::<f32>::new(capacity).split();

    let stream_error: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let error_slot = stream_error.clone();
    let err_fn = move |err: cpal::StreamError| {
        if let Ok(mut slot) = error_slot.lock() {
            slot.get_or_insert_with(|| err.to_string());
        }
    };

    let stream = match format {
        cpal::SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &_| {
                producer.push_slice(data);
            },
            err_fn,
            None,
        )?,
        cpal::SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &_| {
                for &sample in data {
                    let _ = producer.try_push(f32::from(sample) / 32_768.0);
                }
            },
            err_fn,
            None,
        )?,
        cpal::SampleFormat::U16 => device.build_input_stream(
            &stream_config,
            move |data: &[u16], _: &_| {
                for &sample in data {
                    let _ = producer.try_push((f32::from(sample) - 32_768.0) / 32_768.0);
                }
            },
            err_fn,
            None,
        )?,
        other => anyhow::bail!("unsupported sample format {other:?}"),
    };

    stream.play()?;

    let expected = (duration.as_secs_f64() * f64::from(native_rate)).ceil() as usize * channels;
    let mut collected = Vec::with_capacity(expected);
    let mut scratch = vec![0.0f32; 4096];
    let started = Instant::now();
    while started.elapsed() < duration {
        std::thread::sleep(PACE.min(Duration::from_millis(50)));
        loop {
            let n = consumer.pop_slice(&mut scratch);
            if n == 0 {
                break;
            }
            collected.extend_from_slice(&scratch[..n]);
        }
        if let Some(err) = stream_error.lock().ok().and_then(|slot| slot.clone()) {
            anyhow::bail!("audio stream error: {err}");
        }
    }

    if let Err(e) = stream.pause() {
        warn!(error = %e, "failed to pause input stream");
    }
    drop(stream);

    // Final drain of whatever the callback pushed while we slept.
    loop {
        let n = consumer.pop_slice(&mut scratch);
        if n == 0 {
            break;
        }
        collected.extend_from_slice(&scratch[..n]);
    }

    Ok((collected, native_rate, channels))
}

fn sleep_cancellable(total: Duration, cancel: &CancellationToken) {
    let deadline = Instant::now() + total;
    while Instant::now() < deadline && !cancel.is_cancelled() {
        std::thread::sleep(PACE);
    }
}
