mod config;
use config::ServiceConfig;
use herald_audio::{CommandOutput, MediaRegistry, MediaRouter, SpeechService};
use herald_core::telemetry::init_tracing;
use herald_core::EventBus;
use std::sync::Arc;
use tokio::signal;
use tokio::time::Duration;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logging / tracing
    init_tracing(Some(
        "info,herald_core=info,herald_audio=info,speech_service=info",
    ))?;

    info!(target: "speech_service", "Starting Herald audio service");

    let bus = Arc::new(EventBus::new().await?);
    bus.start().await?;

    // Load configuration (defaults + env + optional TOML overlay)
    let cfg = ServiceConfig::load();
    let grace = Duration::from_millis(cfg.speech.stop_grace_ms);

    // 1) Speech: speak / get_tts / stop / mute
    let speech = Arc::new(SpeechService::from_config(
        Arc::clone(&bus),
        cfg.speech.clone(),
    )?);
    speech.start().await?;

    // 2) Media router: play / queue / transport controls, ducking under speech
    let media = if cfg.media_enabled {
        let router = Arc::new(MediaRouter::from_config(
            Arc::clone(&bus),
            cfg.media.clone(),
            &MediaRegistry::with_defaults(),
            Arc::new(CommandOutput::new()),
            grace,
        )?);
        router.start().await?;
        Some(router)
    } else {
        info!(target: "speech_service", "Media router disabled");
        None
    };

    // Ctrl+C shuts down; SIGHUP reloads the speech configuration
    #[cfg(unix)]
    {
        let mut hangup = signal::unix::signal(signal::unix::SignalKind::hangup())?;
        loop {
            tokio::select! {
                res = signal::ctrl_c() => {
                    res?;
                    break;
                }
                _ = hangup.recv() => {
                    let fresh = ServiceConfig::load();
                    match speech.reload(fresh.speech).await {
                        Ok(true) => info!(target: "speech_service", "Speech configuration reloaded"),
                        Ok(false) => info!(target: "speech_service", "Speech configuration unchanged"),
                        Err(e) => error!(target: "speech_service", error = %e, "Reload failed; keeping current pipelines"),
                    }
                    if fresh.media != cfg.media || fresh.media_enabled != cfg.media_enabled {
                        warn!(target: "speech_service", "Media configuration changes apply after restart");
                    }
                }
            }
        }
    }
    #[cfg(not(unix))]
    signal::ctrl_c().await?;

    info!(target: "speech_service", "Shutting down...");
    if let Some(router) = media {
        if let Err(e) = router.shutdown().await {
            warn!(target: "speech_service", error = %e, "Media router shutdown failed");
        }
    }
    speech.shutdown().await?;
    bus.shutdown().await?;
    Ok(())
}
