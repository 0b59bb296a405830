use std::collections::HashMap;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::catalog::ClipId;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlaybackState {
    pub paused: bool,
    pub elapsed: f64,
    /// Set by natural end, media error or auto-pause; cleared by replay.
    pub ended: bool,
}

/// Per-clip pause/progress, kept for the whole session regardless of
/// whether the clip is mounted. Observers receive the id of every clip
/// whose state actually changed.
#[derive(Debug, Default)]
pub struct PlaybackStore {
    states: HashMap<ClipId, PlaybackState>,
    observers: Vec<Sender<ClipId>>,
}

impl PlaybackStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self) -> Receiver<ClipId> {
        let (tx, rx) = unbounded();
        self.observers.push(tx);
        rx
    }

    pub fn get(&self, id: &ClipId) -> PlaybackState {
        self.states.get(id).copied().unwrap_or_default()
    }

    pub fn contains(&self, id: &ClipId) -> bool {
        self.states.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Creates the default entry the first time a clip is shown.
    pub fn ensure(&mut self, id: &ClipId) {
        if !self.states.contains_key(id) {
            self.states.insert(id.clone(), PlaybackState::default());
        }
    }

    pub fn set_paused(&mut self, id: &ClipId, paused: bool) {
        self.update(id, |state| state.paused = paused);
    }

    pub fn set_elapsed(&mut self, id: &ClipId, seconds: f64) {
        let seconds = sanitize_seconds(seconds);
        self.update(id, |state| state.elapsed = seconds);
    }

    /// Active-Ended: paused with the replay affordance.
    pub fn finish(&mut self, id: &ClipId) {
        self.update(id, |state| {
            state.paused = true;
            state.ended = true;
        });
    }

    /// Media failure: ended with progress discarded.
    pub fn fail(&mut self, id: &ClipId) {
        self.update(id, |state| {
            state.paused = true;
            state.ended = true;
            state.elapsed = 0.0;
        });
    }

    pub fn reset(&mut self, id: &ClipId) {
        self.update(id, |state| *state = PlaybackState::default());
    }

    fn update(&mut self, id: &ClipId, apply: impl FnOnce(&mut PlaybackState)) {
        let entry = self.states.entry(id.clone()).or_default();
        let before = *entry;
        apply(entry);
        if *entry != before {
            self.notify(id);
        }
    }

    fn notify(&mut self, id: &ClipId) {
        self.observers.retain(|tx| tx.send(id.clone()).is_ok());
    }
}

fn sanitize_seconds(seconds: f64) -> f64 {
    if seconds.is_finite() {
        seconds.max(0.0)
    } else {
        0.0
    }
}
