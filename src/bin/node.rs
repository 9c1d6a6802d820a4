//! Voicemesh Node
//!
//! Starts a mesh node: advertises and browses for peers, streams the
//! microphone to connected peers, and plays back whatever connected peers
//! stream here. Commands arrive on stdin.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use voicemesh::{
    audio::PlaybackEngine,
    companion::{AudioClip, ClipRecorder},
    config::AppConfig,
    relay::StreamRelay,
    session::{PeerConnectionState, SessionLayer},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting voicemesh node");

    let mut config = AppConfig::load()?;
    if let Some(name) = std::env::args().nth(1) {
        config.device_name = name;
    }

    let session = Arc::new(SessionLayer::bind(&config).await?);
    tracing::info!(
        "This device: {} ({})",
        session.local_identity().name,
        session.local_identity().short_id()
    );

    // Playback sink; a missing output device is reported but not fatal
    let mut playback = PlaybackEngine::new(session.queues());
    match playback.start() {
        Ok(()) => tracing::info!("Playback sink running"),
        Err(e) => tracing::warn!("Playback disabled: {}", e),
    }
    let playback = Arc::new(playback);

    let relay = Arc::new(StreamRelay::new(&session, config.audio.frame_samples));
    let recorder = ClipRecorder::new(config.audio.frame_samples);
    let mut last_clip: Option<AudioClip> = None;

    session.start_advertising();
    session.start_browsing();

    // Print session events as they happen
    {
        let mut events = session.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        println!("* {}", voicemesh::session::events::render_status(&event))
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::debug!("Event printer lagged by {} events", n);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    print_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await? {
            Some(line) => line,
            None => break,
        };
        let mut parts = line.split_whitespace();
        let cmd = parts.next().unwrap_or("");

        match cmd {
            "peers" => {
                let peers = session.peers();
                if peers.is_empty() {
                    println!("No peers known");
                }
                for (index, (peer, state)) in peers.iter().enumerate() {
                    println!("  [{index}] {peer} - {state}");
                }
            }
            "connect" => {
                let Some(index) = parts.next().and_then(|s| s.parse::<usize>().ok()) else {
                    println!("usage: connect <index>");
                    continue;
                };
                let peers = session.peers();
                let Some((peer, state)) = peers.get(index) else {
                    println!("No peer at index {index}");
                    continue;
                };
                if *state != PeerConnectionState::Discovered {
                    println!("{peer} is {state}, not connectable");
                    continue;
                }
                let session = session.clone();
                let peer = peer.clone();
                tokio::spawn(async move {
                    match session.connect(peer.id).await {
                        Ok(()) => println!("Connected to {peer}"),
                        Err(e) => println!("Connect failed: {e}"),
                    }
                });
            }
            "disconnect" => {
                session.disconnect().await;
                println!("Disconnected all sessions");
            }
            "stream" => match parts.next() {
                Some("on") => match relay.start_stream() {
                    Ok(()) => println!("Streaming microphone"),
                    Err(e) => println!("Cannot stream: {e}"),
                },
                Some("off") => {
                    relay.stop_stream();
                    println!("Streaming stopped");
                }
                _ => println!("usage: stream on|off"),
            },
            "record" => match parts.next() {
                Some("on") => match recorder.start() {
                    Ok(()) => println!("Recording clip"),
                    Err(e) => println!("Cannot record: {e}"),
                },
                Some("off") => match recorder.stop(format!("{}-clip", config.device_name)) {
                    Some(clip) => {
                        println!(
                            "Recorded {} samples ({} bytes)",
                            clip.samples.len(),
                            clip.byte_len()
                        );
                        last_clip = Some(clip);
                    }
                    None => println!("Nothing recorded"),
                },
                _ => println!("usage: record on|off"),
            },
            "sendclip" => {
                let Some(index) = parts.next().and_then(|s| s.parse::<usize>().ok()) else {
                    println!("usage: sendclip <index>");
                    continue;
                };
                let Some(clip) = last_clip.clone() else {
                    println!("No recorded clip (use 'record on' then 'record off')");
                    continue;
                };
                let peers = session.peers();
                let Some((peer, _)) = peers.get(index) else {
                    println!("No peer at index {index}");
                    continue;
                };
                let session = session.clone();
                let peer = peer.clone();
                tokio::spawn(async move {
                    match session.send_clip(peer.id, clip).await {
                        Ok(bytes) => println!("Clip sent to {peer} ({bytes} bytes)"),
                        Err(e) => println!("Clip send failed: {e}"),
                    }
                });
            }
            "pause" => {
                playback.pause();
                println!("Playback paused (queues kept)");
            }
            "resume" => {
                playback.resume();
                println!("Playback resumed");
            }
            "vol" => match parts.next().and_then(|s| s.parse::<f32>().ok()) {
                Some(gain) => {
                    playback.set_gain(gain);
                    println!("Gain set to {:.2}", playback.gain());
                }
                None => println!("usage: vol <gain>"),
            },
            "status" => {
                println!("{}", session.status());
                println!(
                    "connected={} streaming={} relayed={} skipped={} sent={} dropped={}",
                    session.connected_peers().len(),
                    relay.is_streaming(),
                    relay.frames_relayed(),
                    relay.frames_skipped(),
                    session.transmitter().frames_sent(),
                    session.transmitter().frames_dropped(),
                );
                if let Some(e) = relay.check_capture_error() {
                    println!("capture error: {e}");
                }
            }
            "quit" | "exit" => break,
            "help" => print_help(),
            "" => {}
            other => println!("Unknown command: {other} (try 'help')"),
        }
    }

    tracing::info!("Shutting down");
    relay.stop_stream();
    session.shutdown().await;
    // Give the endpoint a moment to flush its close frames
    tokio::time::sleep(Duration::from_millis(200)).await;
    Ok(())
}

fn print_help() {
    println!("Commands:");
    println!("  peers             list known peers and states");
    println!("  connect <index>   invite a discovered peer");
    println!("  disconnect        tear down all sessions");
    println!("  stream on|off     start/stop microphone streaming");
    println!("  record on|off     record a clip from the microphone");
    println!("  sendclip <index>  send the last recorded clip to a peer");
    println!("  pause / resume    pause/resume playback (queues kept)");
    println!("  vol <gain>        playback gain (0.0 - 4.0)");
    println!("  status            current status line and counters");
    println!("  quit              exit");
}
