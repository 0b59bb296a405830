//! Decides which single clip plays.
//!
//! A clip plays exactly when it is the current clip and its stored state
//! is not paused. Everything else (scrolling away, taps, progress, end and
//! error signals) only edits the [`PlaybackStore`] and the current id, then
//! pushes the resulting intent to whatever transport is mounted.

use std::collections::HashSet;
use std::time::Duration;

use log::{debug, warn};

use crate::catalog::ClipId;
use crate::store::{PlaybackState, PlaybackStore};
use crate::transport::{Intent, Transport, TransportError, TransportRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlaybackPolicy {
    /// Force-pause once this much of a clip has played. `None` plays to the end.
    pub auto_pause_after: Option<Duration>,
}

impl PlaybackPolicy {
    fn threshold_secs(&self) -> Option<f64> {
        self.auto_pause_after.map(|limit| limit.as_secs_f64())
    }

    fn reached(&self, elapsed: f64) -> bool {
        self.threshold_secs()
            .is_some_and(|threshold| elapsed >= threshold)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipPhase {
    Inactive,
    Playing,
    Paused,
    Ended,
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapOutcome {
    Paused,
    Resumed,
    Replayed,
    Ignored,
}

#[derive(Debug)]
pub struct Coordinator {
    store: PlaybackStore,
    transports: TransportRegistry,
    current: Option<ClipId>,
    unavailable: HashSet<ClipId>,
    policy: PlaybackPolicy,
}

impl Coordinator {
    pub fn new(policy: PlaybackPolicy) -> Self {
        Self {
            store: PlaybackStore::new(),
            transports: TransportRegistry::new(),
            current: None,
            unavailable: HashSet::new(),
            policy,
        }
    }

    pub fn policy(&self) -> PlaybackPolicy {
        self.policy
    }

    pub fn store(&self) -> &PlaybackStore {
        &self.store
    }

    pub fn subscribe(&mut self) -> crossbeam_channel::Receiver<ClipId> {
        self.store.subscribe()
    }

    pub fn current(&self) -> Option<&ClipId> {
        self.current.as_ref()
    }

    pub fn state(&self, id: &ClipId) -> PlaybackState {
        self.store.get(id)
    }

    pub fn is_mounted(&self, id: &ClipId) -> bool {
        self.transports.contains(id)
    }

    pub fn mounted(&self) -> impl Iterator<Item = &ClipId> {
        self.transports.ids()
    }

    pub fn is_playing(&self, id: &ClipId) -> bool {
        self.current.as_ref() == Some(id)
            && !self.unavailable.contains(id)
            && !self.store.get(id).paused
    }

    pub fn phase(&self, id: &ClipId) -> ClipPhase {
        if self.unavailable.contains(id) {
            return ClipPhase::Unavailable;
        }
        if self.current.as_ref() != Some(id) {
            return ClipPhase::Inactive;
        }
        let state = self.store.get(id);
        if !state.paused {
            ClipPhase::Playing
        } else if state.ended || self.policy.reached(state.elapsed) {
            ClipPhase::Ended
        } else {
            ClipPhase::Paused
        }
    }

    /// Marks a clip that has nothing to play; it may be current but never plays.
    pub fn mark_unavailable(&mut self, id: &ClipId) {
        self.unavailable.insert(id.clone());
    }

    /// Makes the store entry exist for a clip that is being shown.
    pub fn touch(&mut self, id: &ClipId) {
        self.store.ensure(id);
    }

    pub fn set_current(&mut self, next: Option<ClipId>) {
        if next == self.current {
            return;
        }
        debug!(
            "current clip {} -> {}",
            display_id(self.current.as_ref()),
            display_id(next.as_ref())
        );

        if let Some(previous) = self.current.take() {
            self.dispatch(&previous, Intent::Pause);
        }
        self.current = next;
        if let Some(id) = self.current.clone() {
            self.store.ensure(&id);
            let state = self.store.get(&id);
            if !state.ended && self.policy.reached(state.elapsed) {
                debug!("clip {id} is already past the auto-pause threshold");
                self.store.finish(&id);
            }
            self.sync(&id);
        }
    }

    pub fn tap(&mut self, id: &ClipId) -> TapOutcome {
        match self.phase(id) {
            ClipPhase::Playing => {
                self.store.set_paused(id, true);
                self.dispatch(id, Intent::Pause);
                TapOutcome::Paused
            }
            ClipPhase::Paused => {
                self.store.set_paused(id, false);
                self.dispatch(id, Intent::Play);
                TapOutcome::Resumed
            }
            ClipPhase::Ended => {
                self.replay(id);
                TapOutcome::Replayed
            }
            ClipPhase::Inactive | ClipPhase::Unavailable => TapOutcome::Ignored,
        }
    }

    /// Rewinds a clip to the start and, if it is current, plays it again.
    pub fn replay(&mut self, id: &ClipId) {
        debug!("replay clip {id}");
        self.store.reset(id);
        self.dispatch(id, Intent::Seek(0.0));
        self.sync_play_state(id);
    }

    pub fn on_progress(&mut self, id: &ClipId, seconds: f64) {
        let state = self.store.get(id);
        if state.ended {
            return;
        }
        self.store.set_elapsed(id, seconds);

        if self.is_playing(id) && self.policy.reached(self.store.get(id).elapsed) {
            debug!("clip {id} reached the auto-pause threshold");
            self.store.finish(id);
            self.dispatch(id, Intent::Pause);
        }
    }

    pub fn on_end(&mut self, id: &ClipId) {
        debug!("clip {id} ended");
        self.store.finish(id);
        if self.transports.contains(id) {
            self.dispatch(id, Intent::Pause);
        }
    }

    pub fn on_error(&mut self, id: &ClipId, reason: &str) {
        warn!("playback failed for clip {id}: {reason}");
        self.store.fail(id);
    }

    /// Registers a player handle and brings it in line with the stored state.
    pub fn mount(&mut self, id: ClipId, handle: Box<dyn Transport>) {
        self.store.ensure(&id);
        self.transports.insert(id.clone(), handle);
        let elapsed = self.store.get(&id).elapsed;
        if elapsed > 0.0 {
            self.dispatch(&id, Intent::Seek(elapsed));
        }
        self.sync_play_state(&id);
    }

    pub fn unmount(&mut self, id: &ClipId) {
        if self.transports.remove(id).is_some() {
            debug!("unmounted player for clip {id}");
        }
    }

    fn sync(&mut self, id: &ClipId) {
        if self.unavailable.contains(id) {
            return;
        }
        self.sync_play_state(id);
    }

    fn sync_play_state(&mut self, id: &ClipId) {
        let intent = if self.is_playing(id) {
            Intent::Play
        } else {
            Intent::Pause
        };
        self.dispatch(id, intent);
    }

    fn dispatch(&mut self, id: &ClipId, intent: Intent) {
        match self.transports.dispatch(id, intent) {
            Ok(()) => debug!("clip {id}: {intent:?}"),
            Err(err) => {
                if matches!(
                    err.downcast_ref::<TransportError>(),
                    Some(TransportError::NotMounted(_))
                ) {
                    debug!("clip {id}: dropped {intent:?} (not mounted)");
                    return;
                }
                if intent == Intent::Play {
                    self.on_error(id, &format!("{err:#}"));
                } else {
                    warn!("clip {id}: {intent:?} failed: {err:#}");
                }
            }
        }
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new(PlaybackPolicy::default())
    }
}

fn display_id(id: Option<&ClipId>) -> String {
    id.map(ToString::to_string)
        .unwrap_or_else(|| "none".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::{recording, Log, RecordingTransport};

    fn id(raw: &str) -> ClipId {
        ClipId::from(raw)
    }

    fn playing_count(coordinator: &Coordinator, ids: &[ClipId]) -> usize {
        ids.iter().filter(|id| coordinator.is_playing(id)).count()
    }

    #[test]
    fn scroll_scenario_preserves_user_pause() {
        let mut c = Coordinator::default();
        let (a, b, clip_c) = (id("A"), id("B"), id("C"));
        let all = [a.clone(), b.clone(), clip_c.clone()];

        c.set_current(Some(a.clone()));
        assert_eq!(c.phase(&a), ClipPhase::Playing);
        assert_eq!(c.phase(&b), ClipPhase::Inactive);
        assert_eq!(c.phase(&clip_c), ClipPhase::Inactive);

        assert_eq!(c.tap(&a), TapOutcome::Paused);
        assert_eq!(c.phase(&a), ClipPhase::Paused);

        c.set_current(Some(b.clone()));
        assert!(c.state(&a).paused);
        assert_eq!(c.phase(&b), ClipPhase::Playing);
        assert_eq!(playing_count(&c, &all), 1);

        c.set_current(Some(a.clone()));
        assert_eq!(c.phase(&a), ClipPhase::Paused);
        assert_eq!(playing_count(&c, &all), 0);
    }

    #[test]
    fn scrolling_away_and_back_restores_progress() {
        let mut c = Coordinator::default();
        let (a, b) = (id("A"), id("B"));
        c.set_current(Some(a.clone()));
        c.on_progress(&a, 4.25);
        let before = c.state(&a);

        c.set_current(Some(b.clone()));
        c.on_progress(&b, 1.0);
        c.set_current(Some(a.clone()));

        assert_eq!(c.state(&a), before);
        assert_eq!(c.phase(&a), ClipPhase::Playing);
    }

    #[test]
    fn even_number_of_taps_restores_pause_flag() {
        let mut c = Coordinator::default();
        let a = id("A");
        c.set_current(Some(a.clone()));
        for _ in 0..4 {
            c.tap(&a);
        }
        assert!(!c.state(&a).paused);
        c.tap(&a);
        assert!(c.state(&a).paused);
    }

    #[test]
    fn taps_on_inactive_clips_are_ignored() {
        let mut c = Coordinator::default();
        c.set_current(Some(id("A")));
        assert_eq!(c.tap(&id("B")), TapOutcome::Ignored);
        assert!(!c.store().contains(&id("B")));
    }

    #[test]
    fn media_error_then_replay() {
        let log = Log::default();
        let mut c = Coordinator::default();
        let (a, b) = (id("A"), id("B"));
        c.mount(a.clone(), recording("A", &log));
        c.mount(b.clone(), recording("B", &log));
        c.set_current(Some(b.clone()));
        c.on_progress(&b, 2.0);
        c.set_current(Some(a.clone()));
        c.on_progress(&a, 3.0);

        c.on_error(&a, "decode failure");
        assert_eq!(c.state(&a).elapsed, 0.0);
        assert!(c.state(&a).paused);
        assert_eq!(c.phase(&a), ClipPhase::Ended);

        let b_before = c.state(&b);
        log.lock().clear();
        assert_eq!(c.tap(&a), TapOutcome::Replayed);
        assert_eq!(c.phase(&a), ClipPhase::Playing);
        assert_eq!(c.state(&a).elapsed, 0.0);
        assert_eq!(c.state(&b), b_before);
        assert_eq!(
            log.lock().as_slice(),
            &[(a.clone(), Intent::Seek(0.0)), (a, Intent::Play)]
        );
    }

    #[test]
    fn natural_end_waits_for_replay() {
        let mut c = Coordinator::default();
        let a = id("A");
        c.set_current(Some(a.clone()));
        c.on_progress(&a, 11.9);
        c.on_end(&a);
        assert_eq!(c.phase(&a), ClipPhase::Ended);
        assert_eq!(c.current(), Some(&a));

        c.on_progress(&a, 12.0);
        assert_eq!(c.state(&a).elapsed, 11.9);

        assert_eq!(c.tap(&a), TapOutcome::Replayed);
        assert_eq!(c.state(&a), PlaybackState::default());
    }

    #[test]
    fn auto_pause_threshold_policy() {
        let mut c = Coordinator::new(PlaybackPolicy {
            auto_pause_after: Some(Duration::from_secs(8)),
        });
        let a = id("A");
        c.set_current(Some(a.clone()));
        c.on_progress(&a, 7.5);
        assert_eq!(c.phase(&a), ClipPhase::Playing);
        c.on_progress(&a, 8.1);
        assert_eq!(c.phase(&a), ClipPhase::Ended);
        assert_eq!(c.state(&a).elapsed, 8.1);
        assert_eq!(c.tap(&a), TapOutcome::Replayed);
        assert_eq!(c.phase(&a), ClipPhase::Playing);
    }

    #[test]
    fn paused_past_threshold_taps_replay() {
        let mut c = Coordinator::new(PlaybackPolicy {
            auto_pause_after: Some(Duration::from_secs(8)),
        });
        let a = id("A");
        c.set_current(Some(a.clone()));
        c.on_progress(&a, 7.0);
        assert_eq!(c.tap(&a), TapOutcome::Paused);
        c.on_progress(&a, 9.0);
        assert!(!c.state(&a).ended);
        assert_eq!(c.phase(&a), ClipPhase::Ended);
        assert_eq!(c.tap(&a), TapOutcome::Replayed);
        assert_eq!(c.phase(&a), ClipPhase::Playing);
    }

    #[test]
    fn becoming_current_past_threshold_finishes_the_clip() {
        let log = Log::default();
        let mut c = Coordinator::new(PlaybackPolicy {
            auto_pause_after: Some(Duration::from_secs(8)),
        });
        let (a, b) = (id("A"), id("B"));
        c.mount(a.clone(), recording("A", &log));
        c.set_current(Some(b.clone()));
        c.on_progress(&a, 9.0);
        log.lock().clear();

        c.set_current(Some(a.clone()));
        assert!(c.state(&a).ended);
        assert_eq!(c.phase(&a), ClipPhase::Ended);
        assert!(!c.is_playing(&a));
        assert!(!log.lock().contains(&(a.clone(), Intent::Play)));
        assert_eq!(c.tap(&a), TapOutcome::Replayed);
        assert!(c.is_playing(&a));
    }

    #[test]
    fn disabled_policy_plays_past_eight_seconds() {
        let mut c = Coordinator::default();
        let a = id("A");
        c.set_current(Some(a.clone()));
        c.on_progress(&a, 30.0);
        assert_eq!(c.phase(&a), ClipPhase::Playing);
    }

    #[test]
    fn stale_progress_updates_store_without_playing() {
        let mut c = Coordinator::new(PlaybackPolicy {
            auto_pause_after: Some(Duration::from_secs(8)),
        });
        let (a, b) = (id("A"), id("B"));
        c.set_current(Some(a.clone()));
        c.set_current(Some(b.clone()));
        c.on_progress(&a, 9.0);
        assert_eq!(c.state(&a).elapsed, 9.0);
        assert!(!c.state(&a).ended);
        assert_eq!(c.phase(&b), ClipPhase::Playing);
        assert!(!c.is_playing(&a));
    }

    #[test]
    fn no_current_means_nothing_plays() {
        let mut c = Coordinator::default();
        let a = id("A");
        c.set_current(Some(a.clone()));
        c.set_current(None);
        assert_eq!(c.phase(&a), ClipPhase::Inactive);
        assert!(!c.is_playing(&a));
    }

    #[test]
    fn scrolling_pauses_previous_transport() {
        let log = Log::default();
        let mut c = Coordinator::default();
        let (a, b) = (id("A"), id("B"));
        c.mount(a.clone(), recording("A", &log));
        c.mount(b.clone(), recording("B", &log));
        log.lock().clear();

        c.set_current(Some(a.clone()));
        c.set_current(Some(b.clone()));
        assert_eq!(
            log.lock().as_slice(),
            &[
                (a.clone(), Intent::Play),
                (a, Intent::Pause),
                (b, Intent::Play)
            ]
        );
    }

    #[test]
    fn mounting_resumes_stored_position() {
        let log = Log::default();
        let mut c = Coordinator::default();
        let a = id("A");
        c.set_current(Some(a.clone()));
        c.on_progress(&a, 5.0);
        c.mount(a.clone(), recording("A", &log));
        assert_eq!(
            log.lock().as_slice(),
            &[(a.clone(), Intent::Seek(5.0)), (a, Intent::Play)]
        );
    }

    #[test]
    fn failed_play_dispatch_becomes_media_error() {
        let log = Log::default();
        let mut c = Coordinator::default();
        let a = id("A");
        c.mount(
            a.clone(),
            Box::new(RecordingTransport {
                id: a.clone(),
                log: log.clone(),
                fail_play: true,
            }),
        );
        c.set_current(Some(a.clone()));
        assert_eq!(c.phase(&a), ClipPhase::Ended);
        assert!(!c.is_playing(&a));
    }

    #[test]
    fn unavailable_clip_never_plays() {
        let mut c = Coordinator::default();
        let a = id("A");
        c.mark_unavailable(&a);
        c.set_current(Some(a.clone()));
        assert_eq!(c.current(), Some(&a));
        assert_eq!(c.phase(&a), ClipPhase::Unavailable);
        assert!(!c.is_playing(&a));
        assert_eq!(c.tap(&a), TapOutcome::Ignored);
    }
}
