//! Process-per-track playlist backend driven by a fake audio output.

mod common;

use common::FakeOutput;
use herald_audio::media::{BackendContext, MediaBackend, SimpleBackend, Track, TrackEvent};
use herald_audio::{AudioResult, BackendConfig};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Duration};

fn backend(
    track_len: Duration,
    cfg: BackendConfig,
) -> (SimpleBackend, Arc<FakeOutput>, mpsc::UnboundedReceiver<TrackEvent>) {
    let output = FakeOutput::new(track_len);
    let (tx, rx) = mpsc::unbounded_channel();
    let ctx = BackendContext {
        output: output.clone(),
        events: tx,
        grace: Duration::from_millis(10),
    };
    (SimpleBackend::new("local", &cfg, ctx), output, rx)
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<TrackEvent>) -> Option<TrackEvent> {
    timeout(Duration::from_secs(2), rx.recv()).await.ok().flatten()
}

#[tokio::test]
async fn playlist_plays_through_and_reports_end() -> AudioResult<()> {
    let (b, output, mut events) = backend(Duration::from_millis(20), BackendConfig::default());
    b.add_list(vec![Track::new("/a.mp3"), Track::new("/b.mp3")]).await;
    b.play(false).await?;

    assert_eq!(
        next_event(&mut events).await,
        Some(TrackEvent::Started {
            backend: "local".into(),
            track: "/a.mp3".into()
        })
    );
    assert!(matches!(
        next_event(&mut events).await,
        Some(TrackEvent::Started { ref track, .. }) if track == "/b.mp3"
    ));
    assert_eq!(
        next_event(&mut events).await,
        Some(TrackEvent::QueueEnded {
            backend: "local".into()
        })
    );
    assert_eq!(output.played(), vec!["/a.mp3", "/b.mp3"]);
    // Playlist ran out on its own
    assert!(!b.stop().await);
    Ok(())
}

#[tokio::test]
async fn stop_terminates_current_track() -> AudioResult<()> {
    let (b, output, mut events) = backend(Duration::from_secs(10), BackendConfig::default());
    b.add_list(vec![Track::new("/long.mp3"), Track::new("/never.mp3")]).await;
    b.play(false).await?;
    assert!(next_event(&mut events).await.is_some());

    assert!(b.stop().await);
    assert_eq!(output.terminated(), vec!["/long.mp3"]);
    assert_eq!(output.played(), vec!["/long.mp3"]);
    assert_eq!(b.track_info().await, serde_json::json!({}));
    Ok(())
}

#[tokio::test]
async fn next_skips_to_following_track() -> AudioResult<()> {
    let (b, output, mut events) = backend(Duration::from_secs(10), BackendConfig::default());
    b.add_list(vec![Track::new("/1.mp3"), Track::new("/2.mp3")]).await;
    b.play(false).await?;
    assert!(next_event(&mut events).await.is_some());

    b.next().await;
    assert!(matches!(
        next_event(&mut events).await,
        Some(TrackEvent::Started { ref track, .. }) if track == "/2.mp3"
    ));
    assert_eq!(output.terminated(), vec!["/1.mp3"]);
    let info = b.track_info().await;
    assert_eq!(info["uri"], "/2.mp3");
    assert_eq!(info["index"], 1);

    b.stop().await;
    Ok(())
}

#[tokio::test]
async fn ducking_suspends_and_restores_playback() -> AudioResult<()> {
    let (b, output, mut events) = backend(Duration::from_secs(10), BackendConfig::default());
    b.add_list(vec![Track::new("/song.mp3")]).await;
    b.play(false).await?;
    assert!(next_event(&mut events).await.is_some());
    sleep(Duration::from_millis(20)).await;

    b.lower_volume().await;
    sleep(Duration::from_millis(20)).await;
    assert_eq!(output.paused(), vec!["/song.mp3"]);
    assert_eq!(b.track_info().await["volume"], 30);

    b.restore_volume().await;
    sleep(Duration::from_millis(20)).await;
    assert_eq!(output.log.lock().unwrap().resumed, vec!["/song.mp3"]);
    assert_eq!(b.track_info().await["volume"], 100);

    b.stop().await;
    Ok(())
}

#[tokio::test]
async fn ducking_can_be_disabled() -> AudioResult<()> {
    let cfg = BackendConfig {
        duck: Some(false),
        ..Default::default()
    };
    let (b, output, mut events) = backend(Duration::from_secs(10), cfg);
    b.add_list(vec![Track::new("/song.mp3")]).await;
    b.play(false).await?;
    assert!(next_event(&mut events).await.is_some());

    b.lower_volume().await;
    sleep(Duration::from_millis(20)).await;
    assert!(output.paused().is_empty());

    b.stop().await;
    Ok(())
}
