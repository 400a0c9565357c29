use chrono::NaiveDate;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use warbler::acquire::{AcquiredClip, AcquisitionSource};
use warbler::artifacts::{ArtifactMeta, ArtifactRefs, ArtifactRenderer};
use warbler::classify::{AcousticModel, Classifier, ModelError};
use warbler::segment::Segmenter;
use warbler::sink::DetectionSink;
use warbler::store::clips::Clip;
use warbler::store::detections::DetectionStore;
use warbler::Pipeline;

/// Replays a fixed set of clips, then reports end-of-input. Released names
/// are observable through the shared handle because `run` consumes the
/// source.
struct ScriptedSource {
    clips: VecDeque<AcquiredClip>,
    released: Arc<Mutex<Vec<String>>>,
}

impl ScriptedSource {
    fn new(clips: Vec<AcquiredClip>) -> (Self, Arc<Mutex<Vec<String>>>) {
        let released = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                clips: clips.into(),
                released: released.clone(),
            },
            released,
        )
    }
}

impl AcquisitionSource for ScriptedSource {
    async fn next_clip(&mut self, _cancel: &CancellationToken) -> Option<AcquiredClip> {
        self.clips.pop_front()
    }

    async fn release(&mut self, acquired: &AcquiredClip) {
        self.released.lock().unwrap().push(acquired.name.clone());
    }
}

/// Always fires label 0 with a strong logit.
struct AlwaysDetects;

impl AcousticModel for AlwaysDetects {
    fn input_len(&self) -> usize {
        144_000
    }

    fn infer(&mut self, _samples: &[f32]) -> Result<Vec<f32>, ModelError> {
        Ok(vec![10.0, -10.0])
    }
}

struct NullRenderer;

impl ArtifactRenderer for NullRenderer {
    fn render(&self, _: &[f32], _: u32, meta: &ArtifactMeta) -> ArtifactRefs {
        ArtifactRefs {
            spectrogram: PathBuf::from(format!("{}.png", meta.time)),
            audio: PathBuf::from(format!("{}.wav", meta.time)),
        }
    }
}

fn scripted_clip(name: &str, seconds: usize) -> AcquiredClip {
    AcquiredClip {
        name: name.to_string(),
        path: PathBuf::from(name),
        clip: Clip {
            timestamp: NaiveDate::from_ymd_opt(2026, 8, 7)
                .unwrap()
                .and_hms_opt(6, 15, 0)
                .unwrap(),
            sample_rate: 48_000,
            samples: vec![0.05; 48_000 * seconds],
        },
    }
}

fn pipeline(db_path: &std::path::Path) -> Pipeline {
    let classifier = Classifier::new(
        Box::new(AlwaysDetects),
        vec![
            "Troglodytes troglodytes_Eurasian Wren".to_string(),
            "Turdus merula_Common Blackbird".to_string(),
        ],
        0.7,
    );
    let sink = DetectionSink::new(
        DetectionStore::open(db_path).unwrap(),
        Box::new(NullRenderer),
    );
    Pipeline::new(Segmenter::new(3, 1.5), classifier, sink)
}

#[tokio::test]
async fn one_detection_per_chunk_lands_in_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("detections.db");

    let (source, _released) =
        ScriptedSource::new(vec![scripted_clip("2026-08-07-06-15-00.wav", 9)]);
    pipeline(&db).run(source, CancellationToken::new()).await;

    // 9 s at 3 s chunks = 3 chunks, the stub hits label 0 on each.
    let store = DetectionStore::open(&db).unwrap();
    assert_eq!(store.count().unwrap(), 3);
    let rows = store.recent(10).unwrap();
    assert!(rows.iter().all(|d| d.common_name == "Eurasian Wren"));
    // Chunk timestamps advance within the clip.
    let times: Vec<&str> = rows.iter().map(|d| d.time.as_str()).collect();
    for expected in ["06:15:00", "06:15:03", "06:15:06"] {
        assert!(times.contains(&expected), "missing chunk time {expected}");
    }
}

#[tokio::test]
async fn reprocessing_a_clip_appends_rather_than_deduplicates() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("detections.db");

    // The same clip delivered twice, as after a crash-before-delete restart.
    let (source, _released) = ScriptedSource::new(vec![
        scripted_clip("2026-08-07-06-15-00.wav", 3),
        scripted_clip("2026-08-07-06-15-00.wav", 3),
    ]);
    pipeline(&db).run(source, CancellationToken::new()).await;

    // At-least-once semantics: two independent rows, no silent dedup.
    let store = DetectionStore::open(&db).unwrap();
    assert_eq!(store.count().unwrap(), 2);
}

#[tokio::test]
async fn every_clip_is_released_after_processing() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("detections.db");

    let (source, released) = ScriptedSource::new(vec![
        scripted_clip("2026-08-07-06-15-00.wav", 3),
        scripted_clip("2026-08-07-06-15-15.wav", 3),
    ]);
    pipeline(&db).run(source, CancellationToken::new()).await;

    assert_eq!(
        *released.lock().unwrap(),
        vec!["2026-08-07-06-15-00.wav", "2026-08-07-06-15-15.wav"]
    );
}
