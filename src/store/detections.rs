use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::info;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS detections (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    date TEXT NOT NULL,
    time TEXT NOT NULL,
    common_name TEXT NOT NULL,
    scientific_name TEXT NOT NULL,
    confidence REAL NOT NULL,
    spectrogram_path TEXT NOT NULL,
    audio_path TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_detections_date ON detections(date);
CREATE INDEX IF NOT EXISTS idx_detections_species ON detections(scientific_name);
";

/// Write failures are split by whether a retry can help: lock contention from
/// a concurrent reader is transient, everything else is fatal for the record.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("detection store busy: {0}")]
    Transient(rusqlite::Error),
    #[error("detection store failure: {0}")]
    Fatal(rusqlite::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(err, _)
                if matches!(
                    err.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                ) =>
            {
                StoreError::Transient(e)
            }
            _ => StoreError::Fatal(e),
        }
    }
}

/// A detection record as it goes into the store. Immutable once inserted;
/// duplicates from reprocessed clips are stored as independent rows.
#[derive(Debug, Clone, PartialEq)]
pub struct NewDetection {
    pub date: String,
    pub time: String,
    pub common_name: String,
    pub scientific_name: String,
    pub confidence: f32,
    pub spectrogram_path: PathBuf,
    pub audio_path: PathBuf,
}

pub struct DetectionStore {
    conn: Mutex<Connection>,
}

impl DetectionStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(10))?;
        conn.execute_batch(SCHEMA)?;
        info!(path = %path.display(), "detection store ready");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn insert(&self, detection: &NewDetection) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("detection store lock poisoned");
        conn.execute(
            "INSERT INTO detections \
             (date, time, common_name, scientific_name, confidence, spectrogram_path, audio_path) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                detection.date,
                detection.time,
                detection.common_name,
                detection.scientific_name,
                f64::from(detection.confidence),
                detection.spectrogram_path.to_string_lossy().into_owned(),
                detection.audio_path.to_string_lossy().into_owned(),
            ],
        )?;
        Ok(())
    }

    pub fn count(&self) -> Result<u64, StoreError> {
        let conn = self.conn.lock().expect("detection store lock poisoned");
        let n: u64 = conn.query_row("SELECT COUNT(*) FROM detections", [], |row| row.get(0))?;
        Ok(n)
    }

    /// Most recent rows, newest first. Exposed for the query layer and tests.
    pub fn recent(&self, limit: u32) -> Result<Vec<NewDetection>, StoreError> {
        let conn = self.conn.lock().expect("detection store lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT date, time, common_name, scientific_name, confidence, \
             spectrogram_path, audio_path \
             FROM detections ORDER BY date DESC, time DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit], |row| {
            Ok(NewDetection {
                date: row.get(0)?,
                time: row.get(1)?,
                common_name: row.get(2)?,
                scientific_name: row.get(3)?,
                confidence: row.get::<_, f64>(4)? as f32,
                spectrogram_path: PathBuf::from(row.get::<_, String>(5)?),
                audio_path: PathBuf::from(row.get::<_, String>(6)?),
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}
