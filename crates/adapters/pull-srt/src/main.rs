//! SRT pull service binary
//!
//! Pulls every configured stream from its SRT origin and logs what the
//! router receives.
//!
//! # Usage
//!
//! ```bash
//! # Streams from a config file
//! cargo run -p remotemedia-pull-srt -- --config pull-srt.toml
//!
//! # Single stream from the environment
//! PULL_SRT_URLS="srt://10.0.0.5:9000?streamid=cam1" cargo run -p remotemedia-pull-srt
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use remotemedia_pull_srt::{
    ChannelRouter, Config, Metrics, RouterEvent, SrtPullApplication, StreamMotor,
};

/// RemoteMedia SRT pull service
///
/// Connects to SRT origins in caller mode and ingests their MPEG-TS streams.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "PULL_SRT_CONFIG")]
    config: Option<PathBuf>,

    /// Application name used in logs
    #[arg(long, default_value = "live", env = "PULL_SRT_APPLICATION")]
    application: String,

    /// Emit logs as JSON
    #[arg(long, default_value_t = false, env = "PULL_SRT_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    if args.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!("Starting SRT pull service...");

    let config = Config::load(args.config.as_ref())?;
    if config.streams.is_empty() {
        anyhow::bail!("no streams configured; use --config or set PULL_SRT_URLS");
    }

    tracing::info!(
        "Configuration: streams={}, latency={}ms, connect_timeout={}ms, max_reconnects={}",
        config.streams.len(),
        config.srt.latency_ms,
        config.srt.connect_timeout_ms,
        config.reconnect.max_attempts
    );

    let metrics = Arc::new(Metrics::new());
    let (router, mut events) = ChannelRouter::new();
    let app = SrtPullApplication::new(args.application, &config, Arc::new(router), metrics.clone());

    let motor = StreamMotor::new(&config.motor);
    let mut motors = Vec::with_capacity(config.streams.len());
    for (index, stream) in config.streams.iter().enumerate() {
        let session = app.create_stream(
            (index + 1).to_string(),
            stream.name.clone(),
            stream.urls.clone(),
            &stream.properties,
        )?;
        motors.push(motor.spawn(session));
    }

    let events_handle = tokio::spawn(async move {
        let mut frames: u64 = 0;
        while let Some(event) = events.recv().await {
            match event {
                RouterEvent::TrackAdded { stream, track } => {
                    tracing::info!(
                        stream = %stream.name,
                        pid = track.id,
                        kind = %track.kind,
                        codec = ?track.codec,
                        "Track added"
                    );
                }
                RouterEvent::StreamUpdated { stream } => {
                    tracing::info!(stream = %stream.name, msid = stream.msid, "Stream updated");
                }
                RouterEvent::Frame(packet) => {
                    frames += 1;
                    tracing::trace!(
                        msid = packet.msid,
                        pid = packet.track_id,
                        pts = packet.pts,
                        size = packet.payload.len(),
                        "Frame"
                    );
                }
            }
        }
        frames
    });

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, terminating streams...");

    for handle in motors {
        let name = handle.name().to_string();
        let state = handle.terminate().await;
        tracing::debug!(stream = %name, %state, "Stream finished");
    }

    // Last router sender goes away with the application
    drop(app);
    let frames = events_handle.await.unwrap_or_default();

    let snapshot = serde_json::to_string(&metrics.snapshot())?;
    tracing::info!(frames, metrics = %snapshot, "SRT pull service shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
