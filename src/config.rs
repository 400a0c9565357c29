use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration, loaded once at startup and shared by reference.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    pub audio: AudioConfig,
    pub model: ModelConfig,
    #[serde(default = "default_threshold")]
    pub confidence_threshold: f32,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    /// Input device name; `None` selects the host default.
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Length of each recorded clip, seconds.
    #[serde(default = "default_record_duration")]
    pub record_duration: u32,
    /// Length of each analysis chunk, seconds.
    #[serde(default = "default_chunk_duration")]
    pub chunk_duration: u32,
    /// A trailing remainder shorter than this is discarded instead of padded.
    #[serde(default = "default_min_chunk_duration")]
    pub min_chunk_duration: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub path: PathBuf,
    pub labels: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }

    /// Directory finished and in-progress clips are written into.
    pub fn clip_dir(&self) -> PathBuf {
        self.data_dir.join("clips")
    }

    /// Scratch directory the remote client downloads into before processing.
    pub fn spool_dir(&self) -> PathBuf {
        self.data_dir.join("spool")
    }

    /// Root for rendered detection artifacts (spectrograms, excerpts).
    pub fn detections_dir(&self) -> PathBuf {
        self.data_dir.join("detections")
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("detections.db")
    }
}

impl AudioConfig {
    pub fn record_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.record_duration))
    }

    /// Samples per full analysis chunk at the configured rate.
    pub fn chunk_samples(&self) -> usize {
        self.sample_rate as usize * self.chunk_duration as usize
    }

    /// Minimum trailing-remainder length in samples.
    pub fn min_chunk_samples(&self) -> usize {
        (self.sample_rate as f32 * self.min_chunk_duration) as usize
    }
}

impl RemoteConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_sample_rate() -> u32 {
    48_000
}

fn default_record_duration() -> u32 {
    15
}

fn default_chunk_duration() -> u32 {
    3
}

fn default_min_chunk_duration() -> f32 {
    1.5
}

fn default_threshold() -> f32 {
    0.7
}

fn default_base_url() -> String {
    "http://127.0.0.1:7008".to_string()
}

fn default_poll_interval() -> u64 {
    2
}

fn default_bind() -> String {
    "0.0.0.0:7008".to_string()
}
