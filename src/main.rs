use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use dance_sync::config::{CaptureSourceKind, Config};
use dance_sync::{
    create_router, AppState, CaptureDeviceFactory, FileMediaSource, HttpScoringClient, NatsClient,
    SessionConfig, SessionState, SyncOrchestrator,
};

#[derive(Parser)]
#[command(name = "dance-sync", version, about = "Record a dancer in sync with a reference video")]
struct Cli {
    /// Config file (extension optional)
    #[arg(long, default_value = "config/dance-sync")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP control API
    Serve,
    /// Record one session against a reference video and exit
    Run {
        /// Reference video to play
        #[arg(long)]
        reference: PathBuf,
        /// Replay this recording instead of opening the camera
        #[arg(long)]
        replay: Option<PathBuf>,
        /// Write the finished recording here
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut cfg = Config::load(&cli.config)?;

    info!("Dance Sync v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);

    match cli.command {
        Command::Serve => serve(cfg).await,
        Command::Run {
            reference,
            replay,
            output,
        } => {
            if let Some(replay) = replay {
                cfg.capture.source = CaptureSourceKind::Replay;
                cfg.capture.replay_path = Some(replay.to_string_lossy().into_owned());
            }
            run_once(cfg, reference, output).await
        }
    }
}

fn scoring_client(cfg: &Config) -> Result<Option<Arc<HttpScoringClient>>> {
    let Some(base_url) = cfg.scoring.base_url.as_deref() else {
        info!("Scoring disabled");
        return Ok(None);
    };

    let client = HttpScoringClient::new(base_url, Duration::from_secs(cfg.scoring.timeout_secs))
        .context("Failed to build scoring client")?;
    info!("Scoring backend: {}", client.base_url());
    Ok(Some(Arc::new(client)))
}

async fn events(cfg: &Config) -> Option<NatsClient> {
    let url = cfg.events.nats_url.as_deref()?;
    match NatsClient::connect(url).await {
        Ok(client) => Some(client),
        Err(e) => {
            warn!("Session events disabled: {:#}", e);
            None
        }
    }
}

fn session_template(cfg: &Config) -> SessionConfig {
    SessionConfig {
        constraints: cfg.capture.constraints(),
        encoding: cfg.capture.encoding(),
        ..SessionConfig::default()
    }
}

async fn serve(cfg: Config) -> Result<()> {
    let capture = cfg.capture.clone();
    info!("Capture source: {:?}", capture.source);

    let mut state = AppState::new(
        Arc::new(move || CaptureDeviceFactory::create(&capture)),
        session_template(&cfg),
    )
    .with_ffprobe(cfg.capture.ffprobe_path.clone());

    // The HTTP scorer uploads both videos itself as part of scoring
    if let Some(client) = scoring_client(&cfg)? {
        state = state.with_scorer(client);
    }

    if let Some(nats) = events(&cfg).await {
        state = state.with_events(nats);
    }

    let app = create_router(state);
    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("HTTP server listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn run_once(cfg: Config, reference: PathBuf, output: Option<PathBuf>) -> Result<()> {
    let device = CaptureDeviceFactory::create(&cfg.capture)?;
    let media = FileMediaSource::load(&reference)?.with_ffprobe(cfg.capture.ffprobe_path.clone());

    let (mut orchestrator, handle) = SyncOrchestrator::new(session_template(&cfg), device);
    let scorer = scoring_client(&cfg)?;
    if let Some(client) = &scorer {
        orchestrator = orchestrator.with_scorer(client.clone());
    }

    let forwarder = events(&cfg)
        .await
        .map(|nats| nats.forward_snapshots(handle.subscribe()));

    let asset = orchestrator.select_reference(Box::new(media)).await?;
    info!("Reference {} ({:.1}s)", asset.identity, asset.duration_seconds);

    orchestrator.start().await?;

    if let (Some(path), Some(artifact)) = (&output, orchestrator.artifact()) {
        tokio::fs::write(path, artifact.bytes())
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Recording written to {} ({} bytes)", path.display(), artifact.len());
    }

    if scorer.is_some() {
        let score = orchestrator.score().await?;
        println!("Score: {:.1}", score);
    }

    let snapshot = orchestrator.snapshot().clone();
    drop(orchestrator);
    if let Some(forwarder) = forwarder {
        let _ = forwarder.await;
    }

    if snapshot.state == SessionState::Errored {
        bail!("Session ended in error");
    }

    Ok(())
}
