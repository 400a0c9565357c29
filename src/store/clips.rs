use chrono::NaiveDateTime;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Filenames carry the capture timestamp in this format, e.g.
/// `2026-08-07-06-15-00.wav`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

#[derive(Debug, Error)]
pub enum ClipStoreError {
    #[error("invalid clip name {0:?}")]
    InvalidName(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One fully-loaded audio clip, ready for segmentation.
///
/// Immutable after load: the capture service is the sole producer of the
/// backing file and the acquiring consumer is its sole destroyer.
#[derive(Debug, Clone)]
pub struct Clip {
    pub timestamp: NaiveDateTime,
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

impl Clip {
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }

    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = self.samples.iter().map(|s| s * s).sum();
        (sum_sq / self.samples.len() as f32).sqrt()
    }
}

/// Parse the capture timestamp out of a clip filename.
///
/// Unparseable names fall back to the current wall-clock time with a warning,
/// so a stray file never stops the pipeline.
pub fn timestamp_from_name(name: &str) -> NaiveDateTime {
    let stem = Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name);
    match NaiveDateTime::parse_from_str(stem, TIMESTAMP_FORMAT) {
        Ok(ts) => ts,
        Err(_) => {
            warn!(name, "clip name does not carry a timestamp, using now");
            chrono::Local::now().naive_local()
        }
    }
}

/// Reject names that could escape the store directory. The store only ever
/// holds flat `.wav` files, so any separator or parent reference is hostile.
pub fn validate_clip_name(name: &str) -> Result<(), ClipStoreError> {
    if name.is_empty() || name.contains("..") || name.contains('/') || name.contains('\\') {
        return Err(ClipStoreError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// The directory of finished and in-progress clips. Single writer (the
/// capture service), multiple readers (watcher, HTTP surface).
#[derive(Debug, Clone)]
pub struct ClipStore {
    dir: PathBuf,
}

impl ClipStore {
    pub fn new(dir: PathBuf) -> std::io::Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str) -> Result<PathBuf, ClipStoreError> {
        validate_clip_name(name)?;
        Ok(self.dir.join(name))
    }

    /// Filenames ready for consumption, oldest first. The in-progress file
    /// (if any) is excluded so a partially-written clip is never offered.
    pub fn list_ready(&self, in_progress: Option<&str>) -> std::io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(_) => continue,
            };
            if !name.to_ascii_lowercase().ends_with(".wav") {
                continue;
            }
            if in_progress == Some(name.as_str()) {
                continue;
            }
            names.push(name);
        }
        // Timestamp-derived names sort oldest-first lexically.
        names.sort();
        Ok(names)
    }

    /// Remove a clip. Deleting a name that is already gone is not an error;
    /// the caller only needs the entry to no longer exist.
    pub fn delete(&self, name: &str) -> Result<bool, ClipStoreError> {
        let path = self.path_for(name)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn parses_timestamp_from_name() {
        let ts = timestamp_from_name("2026-08-07-06-15-42.wav");
        assert_eq!(ts.year(), 2026);
        assert_eq!(ts.month(), 8);
        assert_eq!(ts.day(), 7);
        assert_eq!(ts.hour(), 6);
        assert_eq!(ts.minute(), 15);
        assert_eq!(ts.second(), 42);
    }

    #[test]
    fn unparseable_name_falls_back_to_now() {
        let before = chrono::Local::now().naive_local();
        let ts = timestamp_from_name("garbage.wav");
        let after = chrono::Local::now().naive_local();
        assert!(ts >= before && ts <= after);
    }

    #[test]
    fn rejects_traversal_names() {
        assert!(validate_clip_name("../etc/passwd").is_err());
        assert!(validate_clip_name("a/b.wav").is_err());
        assert!(validate_clip_name("a\\b.wav").is_err());
        assert!(validate_clip_name("").is_err());
        assert!(validate_clip_name("2026-08-07-06-15-42.wav").is_ok());
    }

    #[test]
    fn listing_excludes_in_progress_and_sorts_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = ClipStore::new(dir.path().to_path_buf()).unwrap();
        for name in [
            "2026-08-07-06-15-30.wav",
            "2026-08-07-06-15-00.wav",
            "2026-08-07-06-15-15.wav",
            "notes.txt",
        ] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }

        let names = store.list_ready(Some("2026-08-07-06-15-30.wav")).unwrap();
        assert_eq!(
            names,
            vec!["2026-08-07-06-15-00.wav", "2026-08-07-06-15-15.wav"]
        );
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ClipStore::new(dir.path().to_path_buf()).unwrap();
        std::fs::write(dir.path().join("2026-08-07-06-15-00.wav"), b"x").unwrap();

        assert!(store.delete("2026-08-07-06-15-00.wav").unwrap());
        assert!(!store.delete("2026-08-07-06-15-00.wav").unwrap());
    }
}
