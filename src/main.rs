use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;
use warbler::acquire::local::LocalWatch;
use warbler::acquire::remote::RemoteQueue;
use warbler::artifacts::MediaRenderer;
use warbler::capture::status::{status_channel, CaptureStatus, StatusHandle, StatusReader};
use warbler::capture::CaptureService;
use warbler::classify::labels::load_labels;
use warbler::classify::onnx::OnnxModel;
use warbler::classify::Classifier;
use warbler::config::Config;
use warbler::segment::Segmenter;
use warbler::server::{self, AppState};
use warbler::sink::DetectionSink;
use warbler::store::clips::ClipStore;
use warbler::store::detections::DetectionStore;
use warbler::Pipeline;

#[derive(Parser)]
#[command(name = "warbler", about = "Continuous acoustic detection pipeline")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "config.yml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record and analyze on this machine (filesystem watch topology).
    Standalone,
    /// Record and expose the pull queue over HTTP (edge recorder).
    Server,
    /// Poll a remote recorder, analyze locally (split topology consumer).
    Analyzer,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    let cancel = CancellationToken::new();
    spawn_shutdown_listener(cancel.clone());

    match cli.command {
        Command::Standalone => run_standalone(config, cancel).await,
        Command::Server => run_server(config, cancel).await,
        Command::Analyzer => run_analyzer(config, cancel).await,
    }
}

/// Capture + watch + classify, all in this process.
async fn run_standalone(config: Config, cancel: CancellationToken) -> anyhow::Result<()> {
    let store = ClipStore::new(config.clip_dir())?;
    let pipeline = build_pipeline(&config)?;
    let (status_tx, status_rx) = capture_status(&config);
    let source = LocalWatch::new(store.clone(), status_rx, config.audio.sample_rate)?;

    let capture = CaptureService::new(config.audio.clone(), store, status_tx);
    let capture_cancel = cancel.clone();
    let capture_task = tokio::task::spawn_blocking(move || capture.run_blocking(capture_cancel));

    pipeline.run(source, cancel).await;

    capture_task.await?;
    Ok(())
}

/// Edge recorder: capture + the pull-queue HTTP surface, no classifier.
async fn run_server(config: Config, cancel: CancellationToken) -> anyhow::Result<()> {
    let store = ClipStore::new(config.clip_dir())?;
    let (status_tx, status_rx) = capture_status(&config);

    let capture = CaptureService::new(config.audio.clone(), store.clone(), status_tx);
    let capture_cancel = cancel.clone();
    let capture_task = tokio::task::spawn_blocking(move || capture.run_blocking(capture_cancel));

    let state = AppState {
        store,
        status: status_rx,
    };
    server::serve(&config.server.bind, state, cancel).await?;

    capture_task.await?;
    Ok(())
}

/// Split-topology consumer: poll, download, classify, delete-confirm.
async fn run_analyzer(config: Config, cancel: CancellationToken) -> anyhow::Result<()> {
    let source = RemoteQueue::new(
        config.remote.base_url.clone(),
        config.remote.poll_interval(),
        config.spool_dir(),
        config.audio.sample_rate,
    )?;

    let status = source.probe_status().await.map_err(|e| {
        anyhow::anyhow!(
            "remote recorder unreachable at {}: {e}",
            config.remote.base_url
        )
    })?;
    info!(status = %status, "remote recorder reachable");

    build_pipeline(&config)?.run(source, cancel).await;
    Ok(())
}

/// Everything downstream of acquisition. A missing model or labels file makes
/// this fail, which halts startup.
fn build_pipeline(config: &Config) -> anyhow::Result<Pipeline> {
    let labels = load_labels(&config.model.labels)?;
    let model = OnnxModel::load(&config.model.path, config.audio.chunk_samples())?;
    let classifier = Classifier::new(Box::new(model), labels, config.confidence_threshold);

    let store = DetectionStore::open(&config.db_path())?;
    let renderer = MediaRenderer::new(config.detections_dir());
    let sink = DetectionSink::new(store, Box::new(renderer));

    let segmenter = Segmenter::new(config.audio.chunk_duration, config.audio.min_chunk_duration);
    Ok(Pipeline::new(segmenter, classifier, sink))
}

fn capture_status(config: &Config) -> (StatusHandle, StatusReader) {
    let device = config
        .audio
        .device
        .clone()
        .unwrap_or_else(|| "default".to_string());
    status_channel(CaptureStatus::new(
        device,
        config.audio.sample_rate,
        config.audio.record_duration,
    ))
}

fn spawn_shutdown_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut term =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to install SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = term.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        info!("shutdown signal received, finishing in-flight work");
        cancel.cancel();
    });
}
