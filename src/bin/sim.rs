use anyhow::{anyhow, bail, Context, Result};
use crabcall::testing::{LoopbackTransport, SyntheticCaptureProvider};
use crabcall::{
    Coordinator, CoordinatorConfig, CoordinatorSnapshot, LocalIdentity, RoomCode, SessionState,
};
use serde_json::json;
use std::env;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    crabcall::init_logging();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: crabcall-sim <join|print-config> [args]");
        std::process::exit(1);
    }

    let command = &args[1];
    match command.as_str() {
        "join" => cmd_join(&args).await,
        "print-config" => cmd_print_config(&args),
        _ => {
            eprintln!("Unknown command: {}", command);
            std::process::exit(1);
        }
    }
}

fn load_config(path: Option<&str>) -> Result<CoordinatorConfig> {
    match path {
        Some(path) => CoordinatorConfig::load_from_file(path)
            .with_context(|| format!("loading config from {}", path)),
        None => Ok(CoordinatorConfig::load_or_default()),
    }
}

fn cmd_print_config(args: &[String]) -> Result<()> {
    let path = args.get(2).map(String::as_str);
    let config = load_config(path)?;
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

async fn cmd_join(args: &[String]) -> Result<()> {
    // Parse args: join <room_code> [--identity <id>] [--peers a,b] [--size WxH]
    //             [--mic] [--config <path>] [--timeout <ms>] [--json]
    let mut room_code = None;
    let mut identity = None;
    let mut peers: Vec<String> = Vec::new();
    let mut size = (1280.0, 720.0);
    let mut toggle_mic = false;
    let mut config_path = None;
    let mut timeout_ms = 2000;
    let mut as_json = false;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--identity" => {
                i += 1;
                identity = Some(value_at(args, i, "--identity")?.to_string());
            }
            "--peers" => {
                i += 1;
                peers = value_at(args, i, "--peers")?
                    .split(',')
                    .filter(|peer| !peer.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            "--size" => {
                i += 1;
                size = parse_size(value_at(args, i, "--size")?)?;
            }
            "--config" => {
                i += 1;
                config_path = Some(value_at(args, i, "--config")?.to_string());
            }
            "--timeout" => {
                i += 1;
                timeout_ms = value_at(args, i, "--timeout")?.parse()?;
            }
            "--mic" => toggle_mic = true,
            "--json" => as_json = true,
            other => {
                if room_code.is_none() {
                    room_code = Some(other.to_string());
                } else {
                    bail!("unexpected argument: {}", other);
                }
            }
        }
        i += 1;
    }

    let room_code = RoomCode::new(room_code.ok_or_else(|| anyhow!("room_code required"))?)?;
    let identity = match identity {
        Some(id) => LocalIdentity::new(id)?,
        None => LocalIdentity::generate(),
    };
    let config = load_config(config_path.as_deref())?;

    let provider = Arc::new(SyntheticCaptureProvider::new());
    let transport = Arc::new(
        LoopbackTransport::new()
            .with_auto_ack()
            .with_event_names(config.signaling.events.clone())
            .with_room(peers),
    );

    let mut coordinator = Coordinator::builder(provider.clone(), transport.clone())
        .config(config)
        .identity(identity)
        .room_code(room_code)
        .build()?;

    coordinator.report_surface_size(size.0, size.1)?;
    if toggle_mic {
        coordinator.toggle_mic()?;
    }
    coordinator.request_join().await?;

    let (handle, task) = coordinator.spawn();
    let joined = tokio::time::timeout(
        Duration::from_millis(timeout_ms),
        handle.wait_for(|snapshot| {
            snapshot.session_state == SessionState::Joined && !snapshot.capture_pending
        }),
    )
    .await
    .map_err(|_| anyhow!("not joined after {} ms", timeout_ms))??;

    // Let the roster answer arrive.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let snapshot = handle.snapshot();

    handle.shutdown()?;
    task.await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&summary(&snapshot))?);
    } else {
        print_summary(&snapshot);
        println!(
            "Joined: {} | capture requests: {} | live streams after shutdown: {} | messages sent: {}",
            joined.session_state,
            provider.request_count(),
            provider.live_stream_count(),
            transport.emitted().len()
        );
    }
    Ok(())
}

fn value_at<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str> {
    args.get(i)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("{} requires a value", flag))
}

fn parse_size(s: &str) -> Result<(f64, f64)> {
    let (w, h) = s
        .split_once('x')
        .ok_or_else(|| anyhow!("size must be WIDTHxHEIGHT, got {}", s))?;
    Ok((w.parse()?, h.parse()?))
}

fn summary(snapshot: &CoordinatorSnapshot) -> serde_json::Value {
    json!({
        "intent": snapshot.intent,
        "aspectRatio": snapshot.aspect_ratio,
        "captureConfig": snapshot.capture_config,
        "stream": snapshot.capture_stream.as_ref().map(|s| s.id().to_string()),
        "sessionState": snapshot.session_state,
        "peers": snapshot.peer_roster,
        "captureError": snapshot.capture_error,
        "transportError": snapshot.transport_error,
        "protocolError": snapshot.protocol_error,
    })
}

fn print_summary(snapshot: &CoordinatorSnapshot) {
    println!(
        "Intent: mic={} cam={}",
        snapshot.intent.mic_enabled, snapshot.intent.cam_enabled
    );
    println!("Aspect ratio: {:.6}", snapshot.aspect_ratio);
    if let Some(stream) = &snapshot.capture_stream {
        for track in stream.tracks() {
            println!("Track: {} {} live={}", track.kind(), track.label(), track.is_live());
        }
    }
    println!("Session: {}", snapshot.session_state);
    if snapshot.peer_roster.is_empty() {
        println!("Peers: none");
    } else {
        let peers: Vec<&str> = snapshot.peer_roster.iter().map(|p| p.as_str()).collect();
        println!("Peers: {}", peers.join(", "));
    }
    if let Some(error) = &snapshot.capture_error {
        println!("Capture error: {}", error);
    }
}
