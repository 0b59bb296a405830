use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;
use log::{debug, warn};

use crate::catalog::ClipId;
use crate::coordinator::{ClipPhase, Coordinator, PlaybackPolicy, TapOutcome};
use crate::feed::{Clip, Feed, FeedCursor};
use crate::store::PlaybackState;
use crate::transport::{PlayerEvent, PlayerEventKind, TransportFactory};
use crate::viewport::{Geometry, LatestWins, ViewportTracker, DEFAULT_VISIBILITY_THRESHOLD};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionOptions {
    pub policy: PlaybackPolicy,
    pub visibility_threshold: f64,
    pub window_radius: usize,
    pub prefetch_distance: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            policy: PlaybackPolicy::default(),
            visibility_threshold: DEFAULT_VISIBILITY_THRESHOLD,
            window_radius: 2,
            prefetch_distance: 5,
        }
    }
}

/// Everything the render layer may touch: it reports scroll geometry and
/// taps, and reads back what to draw. Playback state is only changed here.
pub struct FeedSession {
    feed: Feed,
    coordinator: Coordinator,
    tracker: ViewportTracker,
    pending_current: LatestWins<Option<usize>>,
    current_index: Option<usize>,
    /// Last index that was current; the mounted window stays around it
    /// while nothing qualifies.
    window_center: Option<usize>,
    factory: Option<Arc<dyn TransportFactory>>,
    events: Option<Receiver<PlayerEvent>>,
    changes: Receiver<ClipId>,
    known_clips: usize,
    options: SessionOptions,
}

impl FeedSession {
    pub fn new(
        feed: Feed,
        factory: Option<Arc<dyn TransportFactory>>,
        events: Option<Receiver<PlayerEvent>>,
        options: SessionOptions,
    ) -> Self {
        let mut coordinator = Coordinator::new(options.policy);
        let changes = coordinator.subscribe();
        Self {
            feed,
            coordinator,
            tracker: ViewportTracker::new(options.visibility_threshold),
            pending_current: LatestWins::new(),
            current_index: None,
            window_center: None,
            factory,
            events,
            changes,
            known_clips: 0,
            options,
        }
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn feed(&self) -> &Feed {
        &self.feed
    }

    pub fn clips(&self) -> &[Clip] {
        self.feed.clips()
    }

    pub fn cursor(&self) -> FeedCursor {
        self.feed.cursor(self.coordinator.current().cloned())
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current_index
    }

    pub fn current_clip(&self) -> Option<&Clip> {
        self.current_index.and_then(|index| self.feed.get(index))
    }

    pub fn phase(&self, id: &ClipId) -> ClipPhase {
        self.coordinator.phase(id)
    }

    pub fn state(&self, id: &ClipId) -> PlaybackState {
        self.coordinator.state(id)
    }

    pub fn is_playing(&self, id: &ClipId) -> bool {
        self.coordinator.is_playing(id)
    }

    pub fn is_mounted(&self, id: &ClipId) -> bool {
        self.coordinator.is_mounted(id)
    }

    pub fn start(&mut self) -> bool {
        self.feed.ensure_started()
    }

    /// Feeds a new scroll position to the tracker. The resulting current
    /// item is only applied by [`FeedSession::settle`].
    pub fn observe_viewport(&mut self, geometry: &Geometry) {
        if let Some(change) = self.tracker.observe(geometry) {
            self.pending_current.publish(change);
        }
    }

    /// Applies the most recent viewport report, dropping older ones.
    pub fn settle(&mut self) -> bool {
        let Some(index) = self.pending_current.take() else {
            return false;
        };
        let index = index.filter(|i| *i < self.feed.len());
        let id = index.and_then(|i| self.feed.get(i)).map(|clip| clip.id().clone());
        let changed = self.coordinator.current() != id.as_ref();
        self.current_index = index;
        if index.is_some() {
            self.window_center = index;
        }
        self.coordinator.set_current(id);
        self.sync_window();
        self.maybe_prefetch();
        changed
    }

    pub fn tap_current(&mut self) -> TapOutcome {
        let Some(id) = self.coordinator.current().cloned() else {
            return TapOutcome::Ignored;
        };
        self.tap(&id)
    }

    pub fn tap(&mut self, id: &ClipId) -> TapOutcome {
        let outcome = self.coordinator.tap(id);
        if outcome == TapOutcome::Replayed {
            self.sync_window();
        }
        outcome
    }

    pub fn retry(&mut self) -> bool {
        self.feed.retry()
    }

    pub fn load_more(&mut self) -> bool {
        self.feed.load_more()
    }

    /// Drops the loaded list and starts again from page 1. Playback state
    /// is kept, so clips that come back resume where they were.
    pub fn reload(&mut self) -> bool {
        self.coordinator.set_current(None);
        let mounted: Vec<ClipId> = self.coordinator.mounted().cloned().collect();
        for id in &mounted {
            self.coordinator.unmount(id);
        }
        self.feed.reset();
        self.tracker.reset();
        self.pending_current.take();
        self.current_index = None;
        self.window_center = None;
        self.known_clips = 0;
        self.feed.ensure_started()
    }

    /// Applies finished page fetches and player signals. Returns true when
    /// anything visible changed.
    pub fn poll(&mut self) -> bool {
        let mut changed = false;
        if self.feed.poll() {
            self.absorb_clips();
            changed = true;
        }
        changed |= self.drain_player_events();
        changed |= self.changes.try_iter().count() > 0;
        changed
    }

    /// Blocks until the in-flight page fetch completes or `timeout` passes.
    pub fn wait_for_page(&mut self, timeout: Duration) -> bool {
        let applied = self.feed.wait(timeout);
        if applied {
            self.absorb_clips();
        }
        applied
    }

    pub fn handle_player_event(&mut self, event: PlayerEvent) {
        let PlayerEvent { clip, kind } = event;
        match kind {
            PlayerEventKind::Progress(seconds) => self.coordinator.on_progress(&clip, seconds),
            PlayerEventKind::Ended => self.coordinator.on_end(&clip),
            PlayerEventKind::Failed(reason) => self.coordinator.on_error(&clip, &reason),
        }
    }

    fn drain_player_events(&mut self) -> bool {
        let Some(events) = &self.events else {
            return false;
        };
        let pending: Vec<PlayerEvent> = events.try_iter().collect();
        let changed = !pending.is_empty();
        for event in pending {
            self.handle_player_event(event);
        }
        changed
    }

    fn absorb_clips(&mut self) {
        let clips = self.feed.clips();
        let fresh: Vec<ClipId> = clips[self.known_clips.min(clips.len())..]
            .iter()
            .filter(|clip| !clip.resolution.is_playable())
            .map(|clip| clip.id().clone())
            .collect();
        self.known_clips = clips.len();
        for id in &fresh {
            debug!("clip {id} has no playable media");
            self.coordinator.mark_unavailable(id);
        }
        self.sync_window();
    }

    fn maybe_prefetch(&mut self) {
        let Some(index) = self.window_center else {
            return;
        };
        if self
            .feed
            .should_prefetch(index, self.options.prefetch_distance)
        {
            debug!("prefetching next page near clip index {index}");
            self.feed.load_more();
        }
    }

    /// Mounts players for the clips around the current one and releases
    /// the rest.
    fn sync_window(&mut self) {
        let Some(center) = self.window_center else {
            return;
        };
        let len = self.feed.len();
        if len == 0 {
            return;
        }
        let radius = self.options.window_radius;
        let start = center.saturating_sub(radius);
        let end = center.saturating_add(radius).min(len - 1);

        let mut wanted = HashSet::new();
        let mut to_mount = Vec::new();
        for clip in &self.feed.clips()[start..=end] {
            wanted.insert(clip.id().clone());
            if let Some(source) = clip.resolution.source() {
                if !self.coordinator.is_mounted(clip.id()) {
                    to_mount.push((clip.id().clone(), source.clone()));
                }
            }
        }

        let stale: Vec<ClipId> = self
            .coordinator
            .mounted()
            .filter(|id| !wanted.contains(*id))
            .cloned()
            .collect();
        for id in &stale {
            self.coordinator.unmount(id);
        }

        for id in &wanted {
            self.coordinator.touch(id);
        }

        let Some(factory) = self.factory.clone() else {
            return;
        };
        for (id, source) in to_mount {
            match factory.open(&id, &source) {
                Ok(handle) => self.coordinator.mount(id, handle),
                Err(err) => {
                    warn!("could not open player for clip {id}: {err:#}");
                    if self.coordinator.current() == Some(&id) {
                        self.coordinator.on_error(&id, &format!("{err:#}"));
                    }
                }
            }
        }
    }
}
