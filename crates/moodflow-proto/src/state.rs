use crate::mood::Mood;
use crate::protocol::{Phase, PlayerSnapshot};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared, read-mostly view of the player session for the HTTP API.
/// The player core is the only writer; every mutation bumps `rev`.
#[derive(Clone)]
pub struct StateManager {
    state: Arc<RwLock<PlayerSnapshot>>,
}

impl StateManager {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(PlayerSnapshot {
                rev: 1,
                ..PlayerSnapshot::default()
            })),
        }
    }

    pub async fn snapshot(&self) -> PlayerSnapshot {
        self.state.read().await.clone()
    }

    /// A new session started for `mood`: everything except the
    /// credential flag resets, phase becomes `Loading`.
    pub async fn set_loading(&self, mood: Mood) {
        let mut state = self.state.write().await;
        state.mood = Some(mood);
        state.mood_label = Some(mood.label().to_string());
        state.phase = Phase::Loading;
        state.is_playing = false;
        state.pending_ready = false;
        state.fetching_next = false;
        state.position_secs = None;
        state.duration_secs = None;
        state.rev += 1;
    }

    /// Back to mood selection: reset to idle defaults.
    pub async fn set_idle(&self) {
        let mut state = self.state.write().await;
        state.mood = None;
        state.mood_label = None;
        state.phase = Phase::Idle;
        state.is_playing = false;
        state.pending_ready = false;
        state.fetching_next = false;
        state.position_secs = None;
        state.duration_secs = None;
        state.rev += 1;
    }

    pub async fn set_phase(&self, phase: Phase) {
        let mut state = self.state.write().await;
        state.phase = phase;
        state.is_playing = phase == Phase::Playing;
        state.rev += 1;
    }

    pub async fn set_timeline(&self, position_secs: Option<f64>, duration_secs: Option<f64>) {
        let mut state = self.state.write().await;
        state.position_secs = position_secs;
        state.duration_secs = duration_secs;
        state.rev += 1;
    }

    pub async fn set_fetching_next(&self, fetching: bool) {
        let mut state = self.state.write().await;
        state.fetching_next = fetching;
        state.rev += 1;
    }

    pub async fn set_pending_ready(&self, ready: bool) {
        let mut state = self.state.write().await;
        state.pending_ready = ready;
        state.rev += 1;
    }

    pub async fn set_credential_set(&self, set: bool) {
        let mut state = self.state.write().await;
        state.credential_set = set;
        state.rev += 1;
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_mutation_bumps_rev() {
        let mgr = StateManager::new();
        let r0 = mgr.snapshot().await.rev;
        mgr.set_loading(Mood::CalmFocus).await;
        mgr.set_phase(Phase::Playing).await;
        mgr.set_timeline(Some(12.0), Some(90.0)).await;
        let snap = mgr.snapshot().await;
        assert_eq!(snap.rev, r0 + 3);
        assert!(snap.is_playing);
        assert_eq!(snap.mood, Some(Mood::CalmFocus));
    }

    #[tokio::test]
    async fn test_idle_resets_everything_but_credential() {
        let mgr = StateManager::new();
        mgr.set_credential_set(true).await;
        mgr.set_loading(Mood::CafeVibe).await;
        mgr.set_pending_ready(true).await;
        mgr.set_fetching_next(true).await;
        mgr.set_idle().await;

        let snap = mgr.snapshot().await;
        assert_eq!(snap.phase, Phase::Idle);
        assert!(snap.mood.is_none());
        assert!(!snap.pending_ready);
        assert!(!snap.fetching_next);
        assert!(snap.position_secs.is_none());
        assert!(snap.credential_set);
    }
}
