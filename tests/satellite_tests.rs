//! End-to-end satellite tests
//!
//! A fake satellite listens on loopback and the assist pipeline is a script,
//! so the whole path from TCP audio to `play-tts` runs without Home Assistant.

use async_trait::async_trait;
use futures::StreamExt;
use hassmic::config::{AppConfig, ConfigEntry, EntryData, FlowResult, ZeroconfServiceInfo};
use hassmic::integration::Bridge;
use hassmic::pipeline::{AssistPipeline, AudioStream, EventCallback, PipelineEvent, PipelineEventType, PipelineRun};
use hassmic::satellite::{PipelinePhase, Satellite, SatelliteEvent, SatelliteSettings};
use hassmic::Result;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

const TTS_PATH: &str = "/api/tts_proxy/abc123.mp3";

/// First run plays a full conversation on one chunk of audio, later runs idle
#[derive(Default)]
struct ScriptedPipeline {
    runs: AtomicUsize,
    chunks: Mutex<Vec<Vec<u8>>>,
}

fn event(event_type: PipelineEventType, data: Value) -> PipelineEvent {
    let data: Map<String, Value> = data.as_object().cloned().unwrap_or_default();
    PipelineEvent::new(event_type, data)
}

#[async_trait]
impl AssistPipeline for ScriptedPipeline {
    async fn run(&self, _run: PipelineRun, mut audio: AudioStream, on_event: EventCallback) -> Result<()> {
        if self.runs.fetch_add(1, Ordering::SeqCst) > 0 {
            futures::future::pending::<()>().await;
        }

        on_event(event(PipelineEventType::RunStart, json!({})));
        if let Some(chunk) = audio.next().await {
            self.chunks.lock().push(chunk);
        }
        on_event(event(
            PipelineEventType::WakeWordEnd,
            json!({ "wake_word_output": { "wake_word_id": "ok_nabu" } }),
        ));
        on_event(event(PipelineEventType::SttStart, json!({})));
        on_event(event(
            PipelineEventType::SttEnd,
            json!({ "stt_output": { "text": "turn off the kitchen light" } }),
        ));
        on_event(event(
            PipelineEventType::IntentEnd,
            json!({ "intent_output": { "response": { "speech": { "plain": { "speech": "Turned off the light" } } } } }),
        ));
        on_event(event(
            PipelineEventType::TtsEnd,
            json!({ "tts_output": { "url": TTS_PATH, "mime_type": "audio/mpeg" } }),
        ));
        on_event(event(PipelineEventType::RunEnd, json!({})));
        Ok(())
    }
}

fn settings() -> SatelliteSettings {
    SatelliteSettings {
        timeout: Duration::from_secs(5),
        reconnect_delay: Duration::from_millis(50),
        url_base: Some("http://ha.local:8123".to_string()),
        ..Default::default()
    }
}

fn entry(port: u16) -> ConfigEntry {
    ConfigEntry::new("dev-kitchen", "Kitchen", EntryData::new("Kitchen", "127.0.0.1", port))
}

async fn listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

async fn send_audio_chunk(socket: &mut TcpStream, format: Value, pcm: &[u8]) {
    let header = json!({ "type": "audio-chunk", "data": format, "payload_length": pcm.len() });
    socket.write_all(format!("{}\n", header).as_bytes()).await.unwrap();
    socket.write_all(pcm).await.unwrap();
}

async fn read_json_line<R: tokio::io::AsyncBufRead + Unpin>(reader: &mut R) -> Value {
    let mut line = String::new();
    tokio::time::timeout(Duration::from_secs(3), reader.read_line(&mut line))
        .await
        .expect("no line from the bridge")
        .unwrap();
    serde_json::from_str(&line).unwrap()
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(3), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_conversation_ends_with_play_tts() {
    let (listener, port) = listener().await;
    let pipeline = Arc::new(ScriptedPipeline::default());
    let satellite = Satellite::new(entry(port), settings(), pipeline.clone()).unwrap();
    let events = satellite.events();
    satellite.start();

    let (socket, _) = listener.accept().await.unwrap();
    let (read_half, mut write_half) = socket.into_split();
    write_half
        .write_all(b"{\"type\":\"client-info\",\"data\":{\"uuid\":\"dev-kitchen\",\"version\":\"1.2\"}}\n")
        .await
        .unwrap();

    let header = json!({ "type": "audio-chunk", "data": { "rate": 16000, "width": 2, "channels": 1 }, "payload_length": 4 });
    write_half.write_all(format!("{}\n", header).as_bytes()).await.unwrap();
    write_half.write_all(&[1, 0, 2, 0]).await.unwrap();

    let mut reader = BufReader::new(read_half);
    let play = read_json_line(&mut reader).await;
    assert_eq!(play["type"], "play-tts");
    assert_eq!(play["data"]["url"], format!("http://ha.local:8123{}", TTS_PATH));

    // Pipeline-format audio goes through untouched
    assert_eq!(*pipeline.chunks.lock(), vec![vec![1, 0, 2, 0]]);

    wait_until(|| satellite.snapshot().completed_runs == 1).await;
    let snapshot = satellite.snapshot();
    assert_eq!(snapshot.phase, PipelinePhase::Idle);
    assert_eq!(snapshot.audio_chunks, 1);
    assert_eq!(
        snapshot.client_info.and_then(|c| c.uuid).as_deref(),
        Some("dev-kitchen")
    );

    let sensors = satellite.sensors();
    let state = |key: &str| {
        sensors
            .iter()
            .find(|s| s.key == key)
            .and_then(|s| s.state.clone())
    };
    assert_eq!(state("mic").as_deref(), Some("connected"));
    assert_eq!(state("wake").as_deref(), Some("ok_nabu"));
    assert_eq!(state("stt").as_deref(), Some("turn off the kitchen light"));
    assert_eq!(state("intent").as_deref(), Some("Turned off the light"));
    assert_eq!(state("tts").as_deref(), Some(TTS_PATH));

    let published: Vec<SatelliteEvent> = events.try_iter().collect();
    assert!(published.iter().any(|e| matches!(
        e,
        SatelliteEvent::PlaybackRequested { url, .. } if url.ends_with(TTS_PATH)
    )));
    assert!(published
        .iter()
        .any(|e| matches!(e, SatelliteEvent::ConnectionChanged { connected: true, .. })));

    satellite.stop().await;
}

#[tokio::test]
async fn test_missing_url_base_skips_playback() {
    let (listener, port) = listener().await;
    let pipeline = Arc::new(ScriptedPipeline::default());
    let settings = SatelliteSettings {
        url_base: None,
        ..settings()
    };
    let satellite = Satellite::new(entry(port), settings, pipeline.clone()).unwrap();
    let events = satellite.events();
    satellite.start();

    let (mut socket, _) = listener.accept().await.unwrap();
    send_audio_chunk(&mut socket, json!({}), &[0, 0]).await;

    wait_until(|| satellite.snapshot().completed_runs == 1).await;
    assert!(!events
        .try_iter()
        .any(|e| matches!(e, SatelliteEvent::PlaybackRequested { .. })));

    satellite.stop().await;
}

#[tokio::test]
async fn test_foreign_audio_format_is_normalized() {
    let (listener, port) = listener().await;
    let pipeline = Arc::new(ScriptedPipeline::default());
    let satellite = Satellite::new(entry(port), settings(), pipeline.clone()).unwrap();
    satellite.start();

    let (mut socket, _) = listener.accept().await.unwrap();

    // 48 kHz stereo, 4096 frames of a quiet square wave
    let mut pcm = Vec::new();
    for i in 0..4096 {
        let sample: i16 = if (i / 48) % 2 == 0 { 1000 } else { -1000 };
        for _ in 0..2 {
            pcm.extend_from_slice(&sample.to_le_bytes());
        }
    }
    send_audio_chunk(&mut socket, json!({ "rate": 48000, "width": 2, "channels": 2 }), &pcm).await;

    wait_until(|| !pipeline.chunks.lock().is_empty()).await;
    let chunk = pipeline.chunks.lock()[0].clone();
    assert!(!chunk.is_empty());
    assert_eq!(chunk.len() % 2, 0);
    // A third of the rate and half the channels
    assert!(chunk.len() < pcm.len() / 4, "len = {}", chunk.len());

    satellite.stop().await;
}

#[tokio::test]
async fn test_unknown_and_ping_messages_keep_connection() {
    let (listener, port) = listener().await;
    let pipeline = Arc::new(ScriptedPipeline::default());
    let satellite = Satellite::new(entry(port), settings(), pipeline).unwrap();
    satellite.start();

    let (mut socket, _) = listener.accept().await.unwrap();
    socket
        .write_all(b"{\"type\":\"reboot\"}\n{\"type\":\"ping\"}\n\n{\"type\":\"ping\"}\n")
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(satellite.is_connected());
    assert_eq!(satellite.snapshot().connects, 1);

    satellite.stop().await;
    assert!(!satellite.is_connected());
}

#[tokio::test]
async fn test_satellite_reconnects_after_device_restart() {
    let (listener, port) = listener().await;
    let pipeline = Arc::new(ScriptedPipeline::default());
    let satellite = Satellite::new(entry(port), settings(), pipeline).unwrap();
    satellite.start();

    let (first, _) = listener.accept().await.unwrap();
    wait_until(|| satellite.is_connected()).await;
    drop(first);

    let (_second, _) = tokio::time::timeout(Duration::from_secs(3), listener.accept())
        .await
        .expect("satellite did not reconnect")
        .unwrap();
    wait_until(|| satellite.snapshot().connects == 2).await;

    satellite.stop().await;
}

fn pcm16_mono(frames: usize, sample: i16) -> Vec<u8> {
    (0..frames).flat_map(|_| sample.to_le_bytes()).collect()
}

#[tokio::test]
async fn test_reconnect_discards_audio_held_from_previous_session() {
    let (listener, port) = listener().await;
    let pipeline = Arc::new(ScriptedPipeline::default());
    let satellite = Satellite::new(entry(port), settings(), pipeline.clone()).unwrap();
    satellite.start();
    let format = json!({ "rate": 48000, "width": 2, "channels": 1 });

    // Too short for a resampler block; nothing reaches the pipeline yet
    let (mut first, _) = listener.accept().await.unwrap();
    send_audio_chunk(&mut first, format.clone(), &pcm16_mono(1000, 8000)).await;
    wait_until(|| satellite.snapshot().audio_chunks == 1).await;
    assert_eq!(satellite.queued_chunks(), 0);
    assert!(pipeline.chunks.lock().is_empty());
    drop(first);

    let (mut second, _) = tokio::time::timeout(Duration::from_secs(3), listener.accept())
        .await
        .expect("satellite did not reconnect")
        .unwrap();
    wait_until(|| satellite.snapshot().connects == 2).await;
    send_audio_chunk(&mut second, format, &pcm16_mono(2048, 0)).await;

    wait_until(|| !pipeline.chunks.lock().is_empty()).await;
    let chunk = pipeline.chunks.lock()[0].clone();
    assert!(!chunk.is_empty());
    assert!(chunk.iter().all(|b| *b == 0), "audio from the first session leaked through");
    assert_eq!(satellite.snapshot().audio_chunks, 2);

    satellite.stop().await;
}

#[tokio::test]
async fn test_audio_dump_is_written() {
    let dir = tempfile::tempdir().unwrap();
    let (listener, port) = listener().await;
    let pipeline = Arc::new(ScriptedPipeline::default());
    let settings = SatelliteSettings {
        dump_dir: Some(dir.path().to_path_buf()),
        ..settings()
    };
    let satellite = Satellite::new(entry(port), settings, pipeline.clone()).unwrap();
    satellite.start();

    let (mut socket, _) = listener.accept().await.unwrap();
    send_audio_chunk(&mut socket, json!({ "rate": 16000, "width": 2, "channels": 1 }), &[10, 0, 20, 0, 30, 0]).await;
    wait_until(|| !pipeline.chunks.lock().is_empty()).await;
    satellite.stop().await;

    let wav = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .find(|p| p.extension().is_some_and(|ext| ext == "wav"))
        .expect("no dump written");
    let (samples, rate, channels) = hassmic::audio::wav::read_wav_pcm16(&wav).unwrap();
    assert_eq!(samples, vec![10, 20, 30]);
    assert_eq!(rate, 16000);
    assert_eq!(channels, 1);
}

fn bridge_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.home_assistant.internal_url = "http://ha.local:8123".into();
    config.connection.reconnect_delay_secs = 0;
    config
}

#[tokio::test]
async fn test_bridge_setup_is_idempotent_and_reload_moves_satellite() {
    let (first_listener, first_port) = listener().await;
    let (second_listener, second_port) = listener().await;

    let bridge = Bridge::new(bridge_config(), Arc::new(ScriptedPipeline::default()));
    let entry = entry(first_port);

    assert!(bridge.setup_entry(entry.clone()).unwrap());
    assert!(!bridge.setup_entry(entry.clone()).unwrap());
    assert_eq!(bridge.running_entries(), vec![entry.entry_id]);
    assert_eq!(bridge.url_base().as_deref(), Some("http://ha.local:8123"));

    let _first = tokio::time::timeout(Duration::from_secs(3), first_listener.accept())
        .await
        .expect("no connection to first address")
        .unwrap();

    let mut moved = entry.clone();
    moved.data.port = second_port;
    bridge.reload_entry(moved).await.unwrap();

    let _second = tokio::time::timeout(Duration::from_secs(3), second_listener.accept())
        .await
        .expect("no connection to new address")
        .unwrap();
    assert_eq!(bridge.registry().get(&entry.entry_id).unwrap().data.port, second_port);

    assert!(bridge.unload_entry(&entry.entry_id).await);
    assert!(!bridge.unload_entry(&entry.entry_id).await);
    assert!(bridge.running_entries().is_empty());
}

#[tokio::test]
async fn test_bridge_start_all_and_shutdown() {
    let (_l1, p1) = listener().await;
    let (_l2, p2) = listener().await;

    let mut config = bridge_config();
    config.entries.push(entry(p1));
    config.entries.push(ConfigEntry::new("dev-hall", "Hall", EntryData::new("Hall", "127.0.0.1", p2)));

    let bridge = Bridge::new(config, Arc::new(ScriptedPipeline::default()));
    assert_eq!(bridge.start_all(), 2);
    assert_eq!(bridge.start_all(), 0);

    bridge.shutdown().await;
    assert!(bridge.running_entries().is_empty());
}

#[tokio::test]
async fn test_bridge_discovery_filters_services_and_reloads_moved_device() {
    let (first_listener, first_port) = listener().await;
    let (second_listener, second_port) = listener().await;
    let localhost = IpAddr::V4(Ipv4Addr::LOCALHOST);

    let mut config = bridge_config();
    let entry = entry(first_port);
    config.entries.push(entry.clone());
    let bridge = Bridge::new(config, Arc::new(ScriptedPipeline::default()));
    assert_eq!(bridge.start_all(), 1);
    let _first = tokio::time::timeout(Duration::from_secs(3), first_listener.accept())
        .await
        .expect("no connection to first address")
        .unwrap();

    // Another service type sharing the device's first label leaves it alone
    let foreign = ZeroconfServiceInfo::new("dev-kitchen._http._tcp.local.", IpAddr::V4(Ipv4Addr::new(10, 9, 9, 9)), 80);
    assert!(matches!(
        bridge.handle_discovery(foreign).await,
        FlowResult::Abort { reason: "not_hassmic_device", entry: None, reload: false }
    ));
    assert_eq!(bridge.registry().get(&entry.entry_id).unwrap().addr(), entry.addr());

    // Same address: nothing to do
    let same = ZeroconfServiceInfo::for_device("dev-kitchen", localhost, first_port);
    assert!(matches!(
        bridge.handle_discovery(same).await,
        FlowResult::Abort { reason: "already_configured", reload: false, .. }
    ));

    let moved = ZeroconfServiceInfo::for_device("dev-kitchen", localhost, second_port);
    match bridge.handle_discovery(moved).await {
        FlowResult::Abort { reason, entry: Some(updated), reload } => {
            assert_eq!(reason, "already_configured");
            assert!(reload);
            assert_eq!(updated.data.port, second_port);
        }
        other => panic!("unexpected {:?}", other),
    }
    let _second = tokio::time::timeout(Duration::from_secs(3), second_listener.accept())
        .await
        .expect("no connection to new address")
        .unwrap();
    assert_eq!(bridge.registry().get(&entry.entry_id).unwrap().data.port, second_port);
    assert_eq!(bridge.running_entries(), vec![entry.entry_id]);

    bridge.shutdown().await;
}
