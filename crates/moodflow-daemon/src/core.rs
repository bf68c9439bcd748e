//! Player core: the single owner of session state.
//!
//! Everything flows through one event loop.  Commands arrive from the
//! HTTP API, typed notifications arrive from the audio primitive, and
//! finished generations arrive from the fetch worker.  The core never
//! performs network I/O itself; it emits [`FetchRequest`]s and consumes
//! the results, which keeps the scheduling logic testable without a
//! live service.
//!
//! Staleness is handled with a session counter: selecting a mood (or
//! stopping) bumps `session`, and any generation result stamped with an
//! older session is discarded on arrival.

use moodflow_proto::config::PlayerConfig;
use moodflow_proto::credentials::CredentialStore;
use moodflow_proto::error::GenerateError;
use moodflow_proto::mood::Mood;
use moodflow_proto::protocol::{Command, Phase, StatusMessage};
use moodflow_proto::state::StateManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::audio::{AudioControl, PlayerEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPurpose {
    /// First track of a session, or a refetch after the stream ran dry.
    Initial,
    /// Background prefetch of the next track.
    Next,
}

/// Work order for the fetch worker.  `session` stamps the result so
/// the core can discard it if the session moved on meanwhile.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub session: u64,
    pub purpose: FetchPurpose,
    pub mood: Mood,
}

pub enum CoreEvent {
    ClientCommand(Command),
    Player(PlayerEvent),
    Generated {
        session: u64,
        purpose: FetchPurpose,
        result: Result<String, GenerateError>,
    },
    RetryTick {
        session: u64,
    },
    Shutdown,
}

pub struct PlayerCore<A: AudioControl> {
    advance_threshold: f64,
    retry_delay: Duration,

    audio: A,
    credentials: Arc<CredentialStore>,
    state: StateManager,
    broadcast_tx: broadcast::Sender<StatusMessage>,
    fetch_tx: mpsc::Sender<FetchRequest>,
    /// Loopback for delayed events (retry ticks).
    event_tx: mpsc::Sender<CoreEvent>,

    session: u64,
    current_mood: Option<Mood>,
    phase: Phase,
    current_url: Option<String>,
    /// The single-slot queue.
    pending_url: Option<String>,
    fetching_next: bool,

    // Last observed playback properties.
    obs_paused: bool,
    obs_position: Option<f64>,
    obs_duration: Option<f64>,
}

impl<A: AudioControl> PlayerCore<A> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        player: &PlayerConfig,
        audio: A,
        credentials: Arc<CredentialStore>,
        state: StateManager,
        broadcast_tx: broadcast::Sender<StatusMessage>,
        fetch_tx: mpsc::Sender<FetchRequest>,
        event_tx: mpsc::Sender<CoreEvent>,
    ) -> Self {
        Self {
            advance_threshold: player.advance_threshold_secs,
            retry_delay: Duration::from_secs(player.retry_delay_secs),
            audio,
            credentials,
            state,
            broadcast_tx,
            fetch_tx,
            event_tx,
            session: 0,
            current_mood: None,
            phase: Phase::Idle,
            current_url: None,
            pending_url: None,
            fetching_next: false,
            obs_paused: false,
            obs_position: None,
            obs_duration: None,
        }
    }

    pub async fn run(mut self, mut event_rx: mpsc::Receiver<CoreEvent>) {
        info!("player core started");
        while let Some(event) = event_rx.recv().await {
            if !self.handle_event(event).await {
                break;
            }
        }
        if let Err(e) = self.audio.stop().await {
            debug!("audio stop on shutdown failed: {}", e);
        }
        info!("player core stopped");
    }

    /// Returns false when the loop should exit.
    async fn handle_event(&mut self, event: CoreEvent) -> bool {
        match event {
            CoreEvent::ClientCommand(cmd) => self.handle_command(cmd).await,
            CoreEvent::Player(evt) => self.handle_player_event(evt).await,
            CoreEvent::Generated {
                session,
                purpose,
                result,
            } => self.handle_generated(session, purpose, result).await,
            CoreEvent::RetryTick { session } => {
                if session == self.session {
                    if let Some(mood) = self.current_mood {
                        info!("retrying after playback error");
                        self.start_mood(mood).await;
                    }
                } else {
                    debug!("dropping retry tick for stale session {}", session);
                }
            }
            CoreEvent::Shutdown => return false,
        }
        true
    }

    // ── commands ─────────────────────────────────────────────────────────────

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::SelectMood { mood } => match mood.parse::<Mood>() {
                Ok(mood) => self.start_mood(mood).await,
                Err(e) => {
                    warn!("{}", e);
                    self.broadcast(StatusMessage::Error {
                        message: e.to_string(),
                        guidance: format!(
                            "Valid moods: {}",
                            Mood::ALL
                                .iter()
                                .map(|m| m.slug())
                                .collect::<Vec<_>>()
                                .join(", ")
                        ),
                        needs_credential: false,
                    });
                }
            },
            Command::TogglePause => {
                // Nothing loaded yet; a pause would race the pending load.
                if self.current_url.is_none() {
                    debug!("toggle ignored, no track loaded");
                    return;
                }
                let target = !self.obs_paused;
                if let Err(e) = self.audio.set_pause(target).await {
                    warn!("set_pause failed: {}", e);
                }
            }
            Command::Stop => {
                info!("stopping session");
                self.stop_session().await;
            }
            Command::SetCredential { token } => {
                self.credentials.set(&token);
                let present = self.credentials.has();
                self.state.set_credential_set(present).await;
                self.broadcast(StatusMessage::StateUpdated);
                self.broadcast(StatusMessage::Status {
                    message: if present {
                        "API token saved.".to_string()
                    } else {
                        "API token cleared.".to_string()
                    },
                });
            }
            Command::GetState => self.broadcast(StatusMessage::StateUpdated),
        }
    }

    // ── audio events ─────────────────────────────────────────────────────────

    async fn handle_player_event(&mut self, evt: PlayerEvent) {
        // Events from a track we already abandoned.
        if self.current_mood.is_none() {
            debug!("ignoring player event outside a session: {:?}", evt);
            return;
        }

        match evt {
            PlayerEvent::PositionChanged { position, duration } => {
                self.obs_position = Some(position);
                if duration.is_some() {
                    self.obs_duration = duration;
                }
                self.state
                    .set_timeline(self.obs_position, self.obs_duration)
                    .await;
                self.broadcast(StatusMessage::StateUpdated);
                self.maybe_prefetch().await;
            }
            PlayerEvent::Playing => {
                self.obs_paused = false;
                self.set_phase(Phase::Playing).await;
            }
            PlayerEvent::Paused => {
                self.obs_paused = true;
                self.set_phase(Phase::Paused).await;
            }
            PlayerEvent::TrackEnded => self.handle_track_ended().await,
            PlayerEvent::PlaybackError(kind) => {
                warn!("playback error: {}", kind.message());
                self.broadcast(StatusMessage::Error {
                    message: kind.message().to_string(),
                    guidance: "Recovering automatically.".to_string(),
                    needs_credential: false,
                });
                if let Some(url) = self.pending_url.take() {
                    // Skip forward instead of fighting the broken track.
                    self.state.set_pending_ready(false).await;
                    self.play_url(url).await;
                } else {
                    self.schedule_retry();
                }
            }
        }
    }

    /// Natural end of a track: hand off to the queued one, or bridge
    /// the gap.
    async fn handle_track_ended(&mut self) {
        info!("track ended");
        self.obs_position = None;
        self.obs_duration = None;
        self.state.set_timeline(None, None).await;

        if let Some(url) = self.pending_url.take() {
            self.state.set_pending_ready(false).await;
            self.play_url(url).await;
            return;
        }

        // The queue is empty.  If a prefetch is still in flight, wait
        // for it; otherwise generate anew.  Either way there is an
        // audible gap, which loading state makes visible.
        self.current_url = None;
        self.set_phase(Phase::Loading).await;
        if self.fetching_next {
            self.broadcast(StatusMessage::Status {
                message: "Next track is still generating...".to_string(),
            });
        } else {
            self.broadcast(StatusMessage::Status {
                message: "Generating the next track...".to_string(),
            });
            self.request_fetch(FetchPurpose::Initial).await;
        }
    }

    // ── generation results ───────────────────────────────────────────────────

    async fn handle_generated(
        &mut self,
        session: u64,
        purpose: FetchPurpose,
        result: Result<String, GenerateError>,
    ) {
        if session != self.session {
            debug!(
                "dropping stale generation result (session {} != {})",
                session, self.session
            );
            return;
        }

        match purpose {
            FetchPurpose::Initial => match result {
                Ok(url) => self.play_url(url).await,
                Err(e) => self.fail_session(e).await,
            },
            FetchPurpose::Next => {
                self.fetching_next = false;
                self.state.set_fetching_next(false).await;
                match result {
                    Ok(url) => {
                        if self.phase == Phase::Loading {
                            // The current track already ended; play
                            // straight away instead of queueing.
                            self.play_url(url).await;
                        } else if self.pending_url.is_none() {
                            debug!("next track ready");
                            self.pending_url = Some(url);
                            self.state.set_pending_ready(true).await;
                            self.broadcast(StatusMessage::StateUpdated);
                        } else {
                            warn!("discarding extra generation result, queue slot is full");
                        }
                    }
                    Err(e) => {
                        if self.phase == Phase::Loading {
                            // We were waiting on this one to keep the
                            // stream alive, so the failure is fatal.
                            self.fail_session(e).await;
                        } else {
                            // Playback continues; the next trigger will
                            // try again.
                            warn!("prefetch failed: {}", e);
                            self.broadcast(StatusMessage::Status {
                                message: format!("Prefetch failed, will retry: {e}"),
                            });
                        }
                    }
                }
            }
        }
    }

    // ── transitions ──────────────────────────────────────────────────────────

    /// Begin a fresh session for `mood`.  Re-selecting the current mood
    /// restarts it.
    async fn start_mood(&mut self, mood: Mood) {
        self.session += 1;
        self.current_mood = Some(mood);
        self.phase = Phase::Loading;
        self.current_url = None;
        self.pending_url = None;
        self.fetching_next = false;
        self.obs_paused = false;
        self.obs_position = None;
        self.obs_duration = None;

        if let Err(e) = self.audio.stop().await {
            warn!("audio stop failed: {}", e);
        }

        info!("starting session {} for {}", self.session, mood);
        self.state.set_loading(mood).await;
        self.broadcast(StatusMessage::StateUpdated);
        self.broadcast(StatusMessage::Status {
            message: format!("Generating {} music...", mood.label()),
        });
        self.request_fetch(FetchPurpose::Initial).await;
    }

    async fn stop_session(&mut self) {
        self.session += 1;
        self.current_mood = None;
        self.phase = Phase::Idle;
        self.current_url = None;
        self.pending_url = None;
        self.fetching_next = false;
        self.obs_paused = false;
        self.obs_position = None;
        self.obs_duration = None;

        if let Err(e) = self.audio.stop().await {
            warn!("audio stop failed: {}", e);
        }
        self.state.set_idle().await;
        self.broadcast(StatusMessage::StateUpdated);
    }

    /// A generation the stream depended on failed: surface it and fall
    /// back to mood selection.
    async fn fail_session(&mut self, error: GenerateError) {
        warn!("generation failed: {}", error);
        self.broadcast(StatusMessage::Error {
            message: error.to_string(),
            guidance: error.guidance(),
            needs_credential: error.needs_credential(),
        });
        self.stop_session().await;
    }

    /// Load `url` as the current track.  The phase stays `Loading`
    /// until the audio primitive reports that audio actually flows.
    async fn play_url(&mut self, url: String) {
        debug!("loading track {}", url);
        self.current_url = Some(url.clone());
        self.obs_paused = false;
        self.obs_position = None;
        self.obs_duration = None;
        self.set_phase(Phase::Loading).await;

        if let Err(e) = self.audio.load(&url).await {
            warn!("track load failed: {}", e);
            self.broadcast(StatusMessage::Error {
                message: format!("Could not start playback: {e}"),
                guidance: "Recovering automatically.".to_string(),
                needs_credential: false,
            });
            self.schedule_retry();
        }
    }

    async fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            self.phase = phase;
            self.state.set_phase(phase).await;
            self.broadcast(StatusMessage::StateUpdated);
        }
    }

    /// Trigger the background prefetch once the remaining time falls
    /// inside the advance window.  At most one prefetch per window: the
    /// `fetching_next` guard and the occupied queue slot both block a
    /// second trigger.
    async fn maybe_prefetch(&mut self) {
        if self.phase != Phase::Playing || self.fetching_next || self.pending_url.is_some() {
            return;
        }
        let (Some(position), Some(duration)) = (self.obs_position, self.obs_duration) else {
            return;
        };
        if duration - position > self.advance_threshold {
            return;
        }

        info!(
            "{}s left, prefetching the next track",
            (duration - position).round()
        );
        self.fetching_next = true;
        self.state.set_fetching_next(true).await;
        self.broadcast(StatusMessage::StateUpdated);
        self.request_fetch(FetchPurpose::Next).await;
    }

    async fn request_fetch(&mut self, purpose: FetchPurpose) {
        let Some(mood) = self.current_mood else {
            return;
        };
        let request = FetchRequest {
            session: self.session,
            purpose,
            mood,
        };
        if self.fetch_tx.send(request).await.is_err() {
            warn!("fetch worker is gone");
        }
    }

    fn schedule_retry(&self) {
        let session = self.session;
        let delay = self.retry_delay;
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(CoreEvent::RetryTick { session }).await;
        });
    }

    fn broadcast(&self, msg: StatusMessage) {
        // Fails only when nobody is listening, which is fine.
        let _ = self.broadcast_tx.send(msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use moodflow_proto::error::PlaybackErrorKind;
    use std::path::PathBuf;

    struct FakeAudio {
        calls: Vec<String>,
    }

    impl FakeAudio {
        fn new() -> Self {
            Self { calls: Vec::new() }
        }
    }

    impl AudioControl for FakeAudio {
        async fn load(&mut self, url: &str) -> anyhow::Result<()> {
            self.calls.push(format!("load {url}"));
            Ok(())
        }
        async fn set_pause(&mut self, paused: bool) -> anyhow::Result<()> {
            self.calls.push(format!("pause {paused}"));
            Ok(())
        }
        async fn stop(&mut self) -> anyhow::Result<()> {
            self.calls.push("stop".to_string());
            Ok(())
        }
    }

    struct Harness {
        core: PlayerCore<FakeAudio>,
        fetch_rx: mpsc::Receiver<FetchRequest>,
        broadcast_rx: broadcast::Receiver<StatusMessage>,
        event_rx: mpsc::Receiver<CoreEvent>,
    }

    fn harness() -> Harness {
        harness_with(PlayerConfig::default())
    }

    fn harness_with(player: PlayerConfig) -> Harness {
        let credential_path = PathBuf::from(std::env::temp_dir()).join(format!(
            "moodflow-core-test-{}-{:p}.json",
            std::process::id(),
            &player
        ));
        let _ = std::fs::remove_file(&credential_path);

        let (broadcast_tx, broadcast_rx) = broadcast::channel(64);
        let (fetch_tx, fetch_rx) = mpsc::channel(16);
        let (event_tx, event_rx) = mpsc::channel(64);
        let core = PlayerCore::new(
            &player,
            FakeAudio::new(),
            Arc::new(CredentialStore::new(credential_path)),
            StateManager::new(),
            broadcast_tx,
            fetch_tx,
            event_tx,
        );
        Harness {
            core,
            fetch_rx,
            broadcast_rx,
            event_rx,
        }
    }

    async fn select(h: &mut Harness, slug: &str) {
        h.core
            .handle_event(CoreEvent::ClientCommand(Command::SelectMood {
                mood: slug.to_string(),
            }))
            .await;
    }

    /// Drive a harness to the Playing phase with a loaded track.
    async fn play_first_track(h: &mut Harness) -> FetchRequest {
        select(h, "calm-focus").await;
        let req = h.fetch_rx.try_recv().expect("initial fetch requested");
        h.core
            .handle_event(CoreEvent::Generated {
                session: req.session,
                purpose: req.purpose,
                result: Ok("https://cdn.example/track-1.mp3".to_string()),
            })
            .await;
        h.core
            .handle_event(CoreEvent::Player(PlayerEvent::Playing))
            .await;
        req
    }

    fn next_error(h: &mut Harness) -> StatusMessage {
        loop {
            match h.broadcast_rx.try_recv() {
                Ok(msg @ StatusMessage::Error { .. }) => return msg,
                Ok(_) => continue,
                Err(e) => panic!("no error broadcast: {e}"),
            }
        }
    }

    #[tokio::test]
    async fn test_select_mood_requests_initial_fetch() {
        let mut h = harness();
        select(&mut h, "energetic-morning").await;

        let req = h.fetch_rx.try_recv().expect("fetch requested");
        assert_eq!(req.purpose, FetchPurpose::Initial);
        assert_eq!(req.mood, Mood::EnergeticMorning);

        let snap = h.core.state.snapshot().await;
        assert_eq!(snap.phase, Phase::Loading);
        assert_eq!(snap.mood, Some(Mood::EnergeticMorning));
        assert!(h.core.audio.calls.contains(&"stop".to_string()));
    }

    #[tokio::test]
    async fn test_unknown_mood_is_rejected() {
        let mut h = harness();
        select(&mut h, "doom-metal").await;

        assert!(h.fetch_rx.try_recv().is_err());
        match next_error(&mut h) {
            StatusMessage::Error {
                needs_credential, ..
            } => assert!(!needs_credential),
            other => panic!("unexpected message: {:?}", other),
        }
        assert_eq!(h.core.state.snapshot().await.phase, Phase::Idle);
    }

    #[tokio::test]
    async fn test_credential_failure_resets_to_idle() {
        let mut h = harness();
        select(&mut h, "calm-focus").await;
        let req = h.fetch_rx.try_recv().unwrap();

        h.core
            .handle_event(CoreEvent::Generated {
                session: req.session,
                purpose: req.purpose,
                result: Err(GenerateError::CredentialMissing),
            })
            .await;

        match next_error(&mut h) {
            StatusMessage::Error {
                needs_credential, ..
            } => assert!(needs_credential),
            other => panic!("unexpected message: {:?}", other),
        }
        let snap = h.core.state.snapshot().await;
        assert_eq!(snap.phase, Phase::Idle);
        assert!(snap.mood.is_none());
    }

    #[tokio::test]
    async fn test_initial_success_loads_and_plays() {
        let mut h = harness();
        play_first_track(&mut h).await;

        assert!(h
            .core
            .audio
            .calls
            .contains(&"load https://cdn.example/track-1.mp3".to_string()));
        assert_eq!(h.core.state.snapshot().await.phase, Phase::Playing);
    }

    #[tokio::test]
    async fn test_prefetch_fires_once_per_window() {
        let mut h = harness();
        play_first_track(&mut h).await;

        h.core
            .handle_event(CoreEvent::Player(PlayerEvent::PositionChanged {
                position: 65.0,
                duration: Some(90.0),
            }))
            .await;
        let req = h.fetch_rx.try_recv().expect("prefetch requested");
        assert_eq!(req.purpose, FetchPurpose::Next);

        // Later ticks inside the same window must not fetch again.
        h.core
            .handle_event(CoreEvent::Player(PlayerEvent::PositionChanged {
                position: 70.0,
                duration: Some(90.0),
            }))
            .await;
        assert!(h.fetch_rx.try_recv().is_err());
        assert!(h.core.state.snapshot().await.fetching_next);
    }

    #[tokio::test]
    async fn test_no_prefetch_outside_window() {
        let mut h = harness();
        play_first_track(&mut h).await;

        h.core
            .handle_event(CoreEvent::Player(PlayerEvent::PositionChanged {
                position: 10.0,
                duration: Some(90.0),
            }))
            .await;
        assert!(h.fetch_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_handoff_uses_queued_track_without_new_fetch() {
        let mut h = harness();
        play_first_track(&mut h).await;
        h.core
            .handle_event(CoreEvent::Player(PlayerEvent::PositionChanged {
                position: 65.0,
                duration: Some(90.0),
            }))
            .await;
        let req = h.fetch_rx.try_recv().unwrap();
        h.core
            .handle_event(CoreEvent::Generated {
                session: req.session,
                purpose: FetchPurpose::Next,
                result: Ok("https://cdn.example/track-2.mp3".to_string()),
            })
            .await;
        assert!(h.core.state.snapshot().await.pending_ready);

        h.core
            .handle_event(CoreEvent::Player(PlayerEvent::TrackEnded))
            .await;

        assert!(h
            .core
            .audio
            .calls
            .contains(&"load https://cdn.example/track-2.mp3".to_string()));
        assert!(h.fetch_rx.try_recv().is_err());
        assert!(!h.core.state.snapshot().await.pending_ready);
    }

    #[tokio::test]
    async fn test_queue_holds_at_most_one_track() {
        let mut h = harness();
        let first = play_first_track(&mut h).await;
        h.core
            .handle_event(CoreEvent::Generated {
                session: first.session,
                purpose: FetchPurpose::Next,
                result: Ok("https://cdn.example/track-2.mp3".to_string()),
            })
            .await;
        // A second result with the slot occupied is dropped.
        h.core
            .handle_event(CoreEvent::Generated {
                session: first.session,
                purpose: FetchPurpose::Next,
                result: Ok("https://cdn.example/track-3.mp3".to_string()),
            })
            .await;

        h.core
            .handle_event(CoreEvent::Player(PlayerEvent::TrackEnded))
            .await;
        assert!(h
            .core
            .audio
            .calls
            .contains(&"load https://cdn.example/track-2.mp3".to_string()));
        assert!(!h
            .core
            .audio
            .calls
            .iter()
            .any(|c| c.contains("track-3")));
    }

    #[tokio::test]
    async fn test_gap_recovery_refetches_when_queue_is_empty() {
        let mut h = harness();
        play_first_track(&mut h).await;

        h.core
            .handle_event(CoreEvent::Player(PlayerEvent::TrackEnded))
            .await;

        let req = h.fetch_rx.try_recv().expect("refetch requested");
        assert_eq!(req.purpose, FetchPurpose::Initial);
        assert_eq!(h.core.state.snapshot().await.phase, Phase::Loading);
    }

    #[tokio::test]
    async fn test_track_end_waits_for_inflight_prefetch() {
        let mut h = harness();
        play_first_track(&mut h).await;
        h.core
            .handle_event(CoreEvent::Player(PlayerEvent::PositionChanged {
                position: 65.0,
                duration: Some(90.0),
            }))
            .await;
        let req = h.fetch_rx.try_recv().unwrap();

        // Track ends before the prefetch lands: no duplicate fetch.
        h.core
            .handle_event(CoreEvent::Player(PlayerEvent::TrackEnded))
            .await;
        assert!(h.fetch_rx.try_recv().is_err());
        assert_eq!(h.core.state.snapshot().await.phase, Phase::Loading);

        // When it lands it plays immediately instead of queueing.
        h.core
            .handle_event(CoreEvent::Generated {
                session: req.session,
                purpose: FetchPurpose::Next,
                result: Ok("https://cdn.example/track-2.mp3".to_string()),
            })
            .await;
        assert!(h
            .core
            .audio
            .calls
            .contains(&"load https://cdn.example/track-2.mp3".to_string()));
        assert!(!h.core.state.snapshot().await.pending_ready);
    }

    #[tokio::test]
    async fn test_results_from_an_old_session_are_discarded() {
        let mut h = harness();
        select(&mut h, "calm-focus").await;
        let old = h.fetch_rx.try_recv().unwrap();

        // Switch moods before the first generation finishes.
        select(&mut h, "cafe-vibe").await;
        let fresh = h.fetch_rx.try_recv().unwrap();
        assert_eq!(fresh.mood, Mood::CafeVibe);

        h.core
            .handle_event(CoreEvent::Generated {
                session: old.session,
                purpose: old.purpose,
                result: Ok("https://cdn.example/stale.mp3".to_string()),
            })
            .await;

        assert!(!h.core.audio.calls.iter().any(|c| c.contains("stale")));
        let snap = h.core.state.snapshot().await;
        assert_eq!(snap.mood, Some(Mood::CafeVibe));
        assert_eq!(snap.phase, Phase::Loading);
    }

    #[tokio::test]
    async fn test_toggle_is_a_noop_without_a_track() {
        let mut h = harness();
        h.core
            .handle_event(CoreEvent::ClientCommand(Command::TogglePause))
            .await;
        assert!(h.core.audio.calls.is_empty());

        play_first_track(&mut h).await;
        h.core
            .handle_event(CoreEvent::ClientCommand(Command::TogglePause))
            .await;
        assert!(h.core.audio.calls.contains(&"pause true".to_string()));

        h.core
            .handle_event(CoreEvent::Player(PlayerEvent::Paused))
            .await;
        assert_eq!(h.core.state.snapshot().await.phase, Phase::Paused);

        h.core
            .handle_event(CoreEvent::ClientCommand(Command::TogglePause))
            .await;
        assert!(h.core.audio.calls.contains(&"pause false".to_string()));
    }

    #[tokio::test]
    async fn test_playback_error_skips_to_queued_track() {
        let mut h = harness();
        let first = play_first_track(&mut h).await;
        h.core
            .handle_event(CoreEvent::Generated {
                session: first.session,
                purpose: FetchPurpose::Next,
                result: Ok("https://cdn.example/track-2.mp3".to_string()),
            })
            .await;

        h.core
            .handle_event(CoreEvent::Player(PlayerEvent::PlaybackError(
                PlaybackErrorKind::NetworkDecode,
            )))
            .await;

        assert!(h
            .core
            .audio
            .calls
            .contains(&"load https://cdn.example/track-2.mp3".to_string()));
    }

    #[tokio::test]
    async fn test_playback_error_without_queue_retries_after_delay() {
        let mut h = harness_with(PlayerConfig {
            retry_delay_secs: 0,
            ..PlayerConfig::default()
        });
        play_first_track(&mut h).await;

        h.core
            .handle_event(CoreEvent::Player(PlayerEvent::PlaybackError(
                PlaybackErrorKind::Unknown,
            )))
            .await;

        let tick = tokio::time::timeout(Duration::from_secs(2), h.event_rx.recv())
            .await
            .expect("retry tick scheduled")
            .expect("event channel open");
        let CoreEvent::RetryTick { session } = tick else {
            panic!("expected a retry tick");
        };

        h.core.handle_event(CoreEvent::RetryTick { session }).await;
        let req = h.fetch_rx.try_recv().expect("session restarted");
        assert_eq!(req.purpose, FetchPurpose::Initial);
        assert_eq!(req.mood, Mood::CalmFocus);
    }

    #[tokio::test]
    async fn test_prefetch_failure_does_not_interrupt_playback() {
        let mut h = harness();
        let first = play_first_track(&mut h).await;

        h.core
            .handle_event(CoreEvent::Generated {
                session: first.session,
                purpose: FetchPurpose::Next,
                result: Err(GenerateError::Timeout),
            })
            .await;

        let snap = h.core.state.snapshot().await;
        assert_eq!(snap.phase, Phase::Playing);
        assert!(!snap.fetching_next);
    }

    #[tokio::test]
    async fn test_stop_resets_everything() {
        let mut h = harness();
        play_first_track(&mut h).await;

        h.core
            .handle_event(CoreEvent::ClientCommand(Command::Stop))
            .await;

        let snap = h.core.state.snapshot().await;
        assert_eq!(snap.phase, Phase::Idle);
        assert!(snap.mood.is_none());
        assert!(snap.position_secs.is_none());
        assert_eq!(h.core.audio.calls.last(), Some(&"stop".to_string()));
    }
}
