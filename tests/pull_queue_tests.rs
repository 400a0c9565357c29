use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use warbler::acquire::remote::RemoteQueue;
use warbler::acquire::AcquisitionSource;
use warbler::capture::status::{status_channel, CaptureStatus, StatusHandle};
use warbler::server::{router, AppState};
use warbler::store::clips::ClipStore;
use warbler::store::wav;

/// Spin up the pull-queue server on an ephemeral port.
async fn start_server(store: ClipStore) -> (SocketAddr, StatusHandle, CancellationToken) {
    let (status_tx, status_rx) = status_channel(CaptureStatus::new("stub".into(), 48_000, 15));
    let state = AppState {
        store,
        status: status_rx,
    };
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        axum::serve(listener, router(state))
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .unwrap();
    });
    (addr, status_tx, cancel)
}

fn write_clip(store: &ClipStore, name: &str) {
    let samples: Vec<f32> = (0..48_000).map(|i| (i as f32 * 0.01).sin() * 0.3).collect();
    wav::write_mono_i16(&store.path_for(name).unwrap(), &samples, 48_000).unwrap();
}

#[tokio::test]
async fn listing_excludes_the_in_progress_clip() {
    let dir = tempfile::tempdir().unwrap();
    let store = ClipStore::new(dir.path().join("clips")).unwrap();
    write_clip(&store, "2026-08-07-06-15-00.wav");
    write_clip(&store, "2026-08-07-06-15-15.wav");

    let (addr, status_tx, cancel) = start_server(store).await;
    status_tx.set_in_progress("2026-08-07-06-15-15.wav");

    let names: Vec<String> = reqwest::get(format!("http://{addr}/wavs"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(names, vec!["2026-08-07-06-15-00.wav"]);

    let status: serde_json::Value = reqwest::get(format!("http://{addr}/status"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["queued"], 1);
    assert_eq!(status["sample_rate"], 48_000);

    cancel.cancel();
}

#[tokio::test]
async fn second_delete_is_a_non_fatal_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let store = ClipStore::new(dir.path().join("clips")).unwrap();
    write_clip(&store, "2026-08-07-06-15-00.wav");

    let (addr, _status_tx, cancel) = start_server(store).await;
    let client = reqwest::Client::new();
    let url = format!("http://{addr}/wavs/2026-08-07-06-15-00.wav");

    let first = client.delete(&url).send().await.unwrap();
    assert!(first.status().is_success());

    let second = client.delete(&url).send().await.unwrap();
    assert_eq!(second.status(), reqwest::StatusCode::NOT_FOUND);

    cancel.cancel();
}

#[tokio::test]
async fn path_traversal_is_rejected_with_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let store = ClipStore::new(dir.path().join("clips")).unwrap();
    let (addr, _status_tx, cancel) = start_server(store).await;

    let client = reqwest::Client::new();
    for name in ["..%2Fsecret.wav", "a%2Fb.wav", "..%5C..%5Cetc"] {
        let response = client
            .get(format!("http://{addr}/wavs/{name}"))
            .send()
            .await
            .unwrap();
        assert_eq!(
            response.status(),
            reqwest::StatusCode::BAD_REQUEST,
            "name {name} should be rejected"
        );
    }

    cancel.cancel();
}

#[tokio::test]
async fn queue_client_downloads_processes_and_delete_confirms() {
    let dir = tempfile::tempdir().unwrap();
    let store = ClipStore::new(dir.path().join("clips")).unwrap();
    write_clip(&store, "2026-08-07-06-15-00.wav");

    let (addr, _status_tx, server_cancel) = start_server(store.clone()).await;

    let mut queue = RemoteQueue::new(
        format!("http://{addr}"),
        Duration::from_millis(50),
        dir.path().join("spool"),
        48_000,
    )
    .unwrap();

    let cancel = CancellationToken::new();
    let acquired = queue.next_clip(&cancel).await.expect("clip expected");
    assert_eq!(acquired.name, "2026-08-07-06-15-00.wav");
    assert_eq!(acquired.clip.sample_rate, 48_000);
    assert_eq!(acquired.clip.samples.len(), 48_000);
    assert!(acquired.path.exists());

    queue.release(&acquired).await;
    // Released: gone from the remote store and from the local spool.
    assert!(store.list_ready(None).unwrap().is_empty());
    assert!(!acquired.path.exists());

    // Nothing left: the next call parks until cancellation.
    cancel.cancel();
    assert!(queue.next_clip(&cancel).await.is_none());

    server_cancel.cancel();
}

#[tokio::test]
async fn failed_download_is_retried_on_the_next_poll() {
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};

    // Stub recorder: always lists one clip, but the first download attempt
    // fails with a 404. The client must not mark the name seen on failure.
    #[derive(Clone)]
    struct Stub {
        attempts: Arc<AtomicUsize>,
        payload: Arc<Vec<u8>>,
    }

    async fn list() -> Json<Vec<String>> {
        Json(vec!["2026-08-07-06-15-00.wav".to_string()])
    }

    async fn download(State(stub): State<Stub>) -> Result<Vec<u8>, StatusCode> {
        let attempt = stub.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt == 0 {
            return Err(StatusCode::NOT_FOUND);
        }
        Ok(stub.payload.as_ref().clone())
    }

    async fn delete() -> StatusCode {
        StatusCode::OK
    }

    let dir = tempfile::tempdir().unwrap();
    let wav_path = dir.path().join("payload.wav");
    let samples: Vec<f32> = vec![0.1; 24_000];
    wav::write_mono_i16(&wav_path, &samples, 48_000).unwrap();
    let stub = Stub {
        attempts: Arc::new(AtomicUsize::new(0)),
        payload: Arc::new(std::fs::read(&wav_path).unwrap()),
    };
    let attempts = stub.attempts.clone();

    let app = Router::new()
        .route("/wavs", get(list))
        .route("/wavs/{name}", get(download).delete(delete))
        .with_state(stub);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let mut queue = RemoteQueue::new(
        format!("http://{addr}"),
        Duration::from_millis(30),
        dir.path().join("spool"),
        48_000,
    )
    .unwrap();

    let cancel = CancellationToken::new();
    let acquired = queue.next_clip(&cancel).await.expect("clip expected");
    assert_eq!(acquired.name, "2026-08-07-06-15-00.wav");
    // One failed attempt, one successful retry.
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}
