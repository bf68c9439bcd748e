//! Audio-rendering primitive.
//!
//! The player core drives playback through the [`AudioControl`] seam
//! and reacts to typed [`PlayerEvent`]s; it never assumes a command
//! succeeded — actual state flows back as events.  The production
//! implementation runs an mpv subprocess over its JSON IPC socket:
//!
//! ```text
//!   MpvPlayer::ensure_handle()
//!         │
//!         ├── writer_task   ← receives requests via mpsc, serialises → socket
//!         └── reader_task   ← reads JSON lines from socket
//!                                ├── response (has request_id) → matched oneshot::Sender
//!                                └── event / property-change   → translate_events task
//! ```
//!
//! Platform notes:
//! - Unix:    Unix domain sockets
//! - Windows: named pipes  \\.\pipe\<name>

use moodflow_proto::error::PlaybackErrorKind;
use moodflow_proto::platform;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

// ── the seam to the player core ───────────────────────────────────────────────

/// Notifications from the audio primitive, in the order they happen.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    /// Playback position advanced.  Duration may lag behind position
    /// for a moment after a track loads.
    PositionChanged {
        position: f64,
        duration: Option<f64>,
    },
    /// Audio is actually flowing.
    Playing,
    Paused,
    /// The current track reached its natural end (end-of-file).
    TrackEnded,
    PlaybackError(PlaybackErrorKind),
}

/// What the player core needs from an audio backend.  Tests substitute
/// a recording fake.
pub trait AudioControl {
    async fn load(&mut self, url: &str) -> anyhow::Result<()>;
    async fn set_pause(&mut self, paused: bool) -> anyhow::Result<()>;
    async fn stop(&mut self) -> anyhow::Result<()>;
}

// ── global request-id counter ─────────────────────────────────────────────────

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

// ── observation property IDs ──────────────────────────────────────────────────

/// Fixed observe_property IDs.  We match on these in property-change events.
const OBS_CORE_IDLE: u64 = 1;
const OBS_PAUSE: u64 = 2;
const OBS_TIME_POS: u64 = 3;
const OBS_DURATION: u64 = 4;

// ── internal channel types ────────────────────────────────────────────────────

struct PendingRequest {
    req_id: u64,
    payload: String, // serialised JSON line (already has '\n')
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// An mpv event / property-change that arrived unsolicited (no request_id).
#[derive(Debug, Clone)]
struct MpvEvent {
    raw: Value,
}

impl MpvEvent {
    /// Returns `Some((obs_id, data))` if this is a property-change event.
    fn as_property_change(&self) -> Option<(u64, &Value)> {
        if self.raw.get("event")?.as_str()? == "property-change" {
            let id = self.raw.get("id")?.as_u64()?;
            let data = self.raw.get("data").unwrap_or(&Value::Null);
            Some((id, data))
        } else {
            None
        }
    }

    /// Returns the event name, e.g. "end-file", "start-file", "file-loaded".
    fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }
}

// ── handle ────────────────────────────────────────────────────────────────────

/// Cloneable handle to the mpv writer task.  `send()` fires a command
/// and awaits the matched response.
#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<PendingRequest>,
}

impl MpvHandle {
    async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = serde_json::to_string(&msg)?;
        raw.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                req_id,
                payload: raw,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(tokio::time::Duration::from_secs(5), reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    async fn load_track(&self, url: &str, volume: f32) -> anyhow::Result<()> {
        self.send(json!(["loadfile", url])).await?;
        let vol_pct = (volume * 100.0).clamp(0.0, 100.0);
        let _ = self.send(json!(["set_property", "volume", vol_pct])).await;
        // Start (or resume) playback for the fresh source.
        self.send(json!(["set_property", "pause", false])).await?;
        Ok(())
    }

    async fn set_pause(&self, paused: bool) -> anyhow::Result<()> {
        self.send(json!(["set_property", "pause", paused])).await?;
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        let _ = self.send(json!(["stop"])).await;
        Ok(())
    }

    /// Register observe_property for everything the core consumes.
    /// Must be re-issued after every fresh connection and file load so
    /// mpv pushes current values immediately.
    async fn observe_all_properties(&self) {
        let props = [
            (OBS_CORE_IDLE, "core-idle"),
            (OBS_PAUSE, "pause"),
            (OBS_TIME_POS, "time-pos"),
            (OBS_DURATION, "duration"),
        ];
        for (id, name) in &props {
            match self.send(json!(["observe_property", id, name])).await {
                Ok(_) => debug!("mpv: observe_property id={} name={}", id, name),
                Err(e) => warn!("mpv: observe_property {} failed: {}", name, e),
            }
        }
    }
}

// ── driver ────────────────────────────────────────────────────────────────────

/// Owns the mpv child process.  `spawn_and_connect` yields a fresh
/// handle; if the process dies, the next `ensure_handle` respawns it.
struct MpvDriver {
    socket_name: String,
    process: Option<tokio::process::Child>,
}

impl MpvDriver {
    fn new() -> Self {
        Self {
            socket_name: platform::mpv_socket_name(),
            process: None,
        }
    }

    fn process_alive(&mut self) -> bool {
        if let Some(ref mut child) = self.process {
            child.try_wait().ok().flatten().is_none()
        } else {
            false
        }
    }

    async fn kill(&mut self) {
        if let Some(mut p) = self.process.take() {
            let _ = p.kill().await;
        }
    }

    async fn spawn_process(&mut self, volume: f32) -> anyhow::Result<()> {
        if let Some(mut p) = self.process.take() {
            let _ = p.kill().await;
        }

        info!("mpv: spawning new process");
        let mpv_binary = platform::find_mpv_binary()
            .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;

        let vol_arg = format!(
            "--volume={}",
            (volume * 100.0).clamp(0.0, 100.0).round() as i64
        );

        let child = tokio::process::Command::new(mpv_binary)
            .arg("--no-video")
            .arg("--idle=yes")
            .arg(platform::mpv_socket_arg())
            .arg("--quiet")
            .arg(vol_arg)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()?;
        self.process = Some(child);
        Ok(())
    }

    #[cfg(unix)]
    async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
        volume: f32,
    ) -> anyhow::Result<MpvHandle> {
        let socket_path = std::path::PathBuf::from(&self.socket_name);
        let _ = tokio::fs::remove_file(&socket_path).await;

        self.spawn_process(volume).await?;

        // Wait for socket to appear
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if socket_path.exists() {
                break;
            }
        }
        if !socket_path.exists() {
            anyhow::bail!("mpv IPC socket did not appear");
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;

        let stream = UnixStream::connect(&socket_path).await?;
        info!("mpv: connected to IPC socket");
        let (read_half, write_half) = stream.into_split();
        Ok(start_io_tasks(read_half, write_half, event_tx))
    }

    #[cfg(windows)]
    async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
        volume: f32,
    ) -> anyhow::Result<MpvHandle> {
        self.spawn_process(volume).await?;

        let pipe_path = format!(r"\\.\pipe\{}", self.socket_name);
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if let Ok(client) = ClientOptions::new().open(&pipe_path) {
                info!("mpv: connected to named pipe");
                let (read_half, write_half) = tokio::io::split(client);
                return Ok(start_io_tasks(read_half, write_half, event_tx));
            }
        }
        anyhow::bail!("mpv named pipe did not appear")
    }
}

fn start_io_tasks<R, W>(
    read_half: R,
    write_half: W,
    event_tx: mpsc::Sender<MpvEvent>,
) -> MpvHandle
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let reader = BufReader::new(read_half);

    // pending map: req_id → reply channel.  Shared between writer
    // (inserts) and reader (resolves).
    let pending: Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>> =
        Arc::new(Mutex::new(HashMap::new()));

    let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);

    tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(reader, pending, event_tx));

    MpvHandle { tx: cmd_tx }
}

// ── reader task ───────────────────────────────────────────────────────────────

async fn reader_task<R>(
    mut reader: BufReader<R>,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>,
    event_tx: mpsc::Sender<MpvEvent>,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                let mut map = pending.lock().await;
                for (_, tx) in map.drain() {
                    let _ = tx.send(Err(anyhow::anyhow!("mpv IPC connection closed")));
                }
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(req_id) = val.get("request_id").and_then(|v| v.as_u64()) {
                    // Command response — route to the pending request
                    let mut map = pending.lock().await;
                    if let Some(tx) = map.remove(&req_id) {
                        let result = if val["error"].as_str() == Some("success") {
                            Ok(val)
                        } else {
                            let err = val["error"]
                                .as_str()
                                .unwrap_or("unknown error")
                                .to_string();
                            debug!("mpv reader: response req={} err={}", req_id, err);
                            Err(anyhow::anyhow!("mpv error: {}", err))
                        };
                        let _ = tx.send(result);
                    } else {
                        debug!("mpv reader: response for unknown req={}", req_id);
                    }
                } else {
                    // Unsolicited event / property-change
                    let _ = event_tx.send(MpvEvent { raw: val }).await;
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                let mut map = pending.lock().await;
                for (_, tx) in map.drain() {
                    let _ = tx.send(Err(anyhow::anyhow!("mpv IPC read error: {}", e)));
                }
                break;
            }
        }
    }
}

// ── writer task ───────────────────────────────────────────────────────────────

async fn writer_task<W>(
    mut writer: W,
    mut rx: mpsc::Receiver<PendingRequest>,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>,
) where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // Register the reply channel before writing so the reader can match it
        {
            let mut map = pending.lock().await;
            map.insert(req.req_id, req.reply);
        }
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            let mut map = pending.lock().await;
            if let Some(tx) = map.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

// ── event translation ─────────────────────────────────────────────────────────

/// Classify mpv's `file_error` text into the playback error taxonomy.
fn classify_file_error(detail: Option<&str>) -> PlaybackErrorKind {
    let Some(detail) = detail else {
        return PlaybackErrorKind::Unknown;
    };
    let lower = detail.to_ascii_lowercase();
    if lower.contains("abort") {
        PlaybackErrorKind::Aborted
    } else if lower.contains("network")
        || lower.contains("resolve")
        || lower.contains("connect")
        || lower.contains("http")
    {
        PlaybackErrorKind::NetworkDecode
    } else if lower.contains("unsupported") || lower.contains("format") || lower.contains("recogni")
    {
        PlaybackErrorKind::Unsupported
    } else {
        PlaybackErrorKind::Unknown
    }
}

/// Turn raw mpv events into the typed notifications the core consumes.
/// Runs until the mpv connection closes.
async fn translate_events(
    mut mpv_rx: mpsc::Receiver<MpvEvent>,
    handle: MpvHandle,
    out: mpsc::Sender<PlayerEvent>,
) {
    let mut paused = false;
    let mut core_idle: Option<bool> = None;
    let mut position: Option<f64> = None;
    let mut duration: Option<f64> = None;

    while let Some(evt) = mpv_rx.recv().await {
        if let Some((obs_id, data)) = evt.as_property_change() {
            match obs_id {
                OBS_CORE_IDLE => {
                    let val = data.as_bool();
                    if val != core_idle {
                        debug!("mpv: core-idle → {:?}", val);
                        core_idle = val;
                        if core_idle == Some(false) && !paused {
                            let _ = out.send(PlayerEvent::Playing).await;
                        }
                    }
                }
                OBS_PAUSE => {
                    let val = data.as_bool().unwrap_or(false);
                    if val != paused {
                        debug!("mpv: pause → {}", val);
                        paused = val;
                        let event = if paused {
                            PlayerEvent::Paused
                        } else if core_idle == Some(false) {
                            PlayerEvent::Playing
                        } else {
                            continue;
                        };
                        let _ = out.send(event).await;
                    }
                }
                OBS_TIME_POS => {
                    position = if data.is_null() { None } else { data.as_f64() };
                    if let Some(pos) = position {
                        let _ = out
                            .send(PlayerEvent::PositionChanged {
                                position: pos,
                                duration,
                            })
                            .await;
                    }
                }
                OBS_DURATION => {
                    duration = if data.is_null() { None } else { data.as_f64() };
                }
                _ => {}
            }
            continue;
        }

        match evt.event_name() {
            Some("end-file") => {
                let reason = evt
                    .raw
                    .get("reason")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown");
                info!("mpv: end-file reason={}", reason);
                position = None;
                duration = None;
                core_idle = Some(true);
                match reason {
                    // Natural end of the clip — the handoff point.
                    "eof" => {
                        let _ = out.send(PlayerEvent::TrackEnded).await;
                    }
                    "error" => {
                        let detail = evt.raw.get("file_error").and_then(|v| v.as_str());
                        let kind = classify_file_error(detail);
                        let _ = out.send(PlayerEvent::PlaybackError(kind)).await;
                    }
                    // stop / redirect / quit are consequences of our own
                    // commands, not track boundaries.
                    _ => {}
                }
            }
            Some("file-loaded") => {
                // Re-register observations so mpv pushes current values for
                // the new file.  Wait a moment so mpv has settled on it.
                let h = handle.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
                    h.observe_all_properties().await;
                });
            }
            _ => {}
        }
    }
    debug!("mpv translator: task exiting");
}

// ── the production AudioControl ───────────────────────────────────────────────

/// mpv-backed audio player.  Lazily spawns the process on first load
/// and respawns it if it dies.
pub struct MpvPlayer {
    driver: MpvDriver,
    handle: Option<MpvHandle>,
    event_tx: mpsc::Sender<PlayerEvent>,
    volume: f32,
}

impl MpvPlayer {
    pub fn new(event_tx: mpsc::Sender<PlayerEvent>, volume: f32) -> Self {
        Self {
            driver: MpvDriver::new(),
            handle: None,
            event_tx,
            volume,
        }
    }

    async fn ensure_handle(&mut self) -> anyhow::Result<MpvHandle> {
        if self.handle.is_some() && !self.driver.process_alive() {
            warn!("mpv process died, respawning");
            self.handle = None;
        }

        if let Some(handle) = &self.handle {
            return Ok(handle.clone());
        }

        let (mpv_tx, mpv_rx) = mpsc::channel::<MpvEvent>(64);
        let handle = self.driver.spawn_and_connect(mpv_tx, self.volume).await?;
        tokio::spawn(translate_events(mpv_rx, handle.clone(), self.event_tx.clone()));
        handle.observe_all_properties().await;
        self.handle = Some(handle.clone());
        Ok(handle)
    }

    pub async fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.stop().await;
        }
        self.driver.kill().await;
    }
}

impl AudioControl for MpvPlayer {
    async fn load(&mut self, url: &str) -> anyhow::Result<()> {
        let handle = self.ensure_handle().await?;
        handle.load_track(url, self.volume).await
    }

    async fn set_pause(&mut self, paused: bool) -> anyhow::Result<()> {
        match &self.handle {
            Some(handle) => handle.set_pause(paused).await,
            None => Ok(()),
        }
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        match &self.handle {
            Some(handle) => handle.stop().await,
            None => Ok(()),
        }
    }
}
