use std::collections::HashMap;

use anyhow::Result;

use crate::catalog::ClipId;
use crate::media::VideoSource;

/// What the coordinator asks a mounted player to do.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Intent {
    Play,
    Pause,
    Seek(f64),
}

/// Imperative handle to one mounted player. Dropping it stops playback.
pub trait Transport: Send {
    fn play(&mut self) -> Result<()>;
    fn pause(&mut self) -> Result<()>;
    fn seek(&mut self, seconds: f64) -> Result<()>;

    fn apply(&mut self, intent: Intent) -> Result<()> {
        match intent {
            Intent::Play => self.play(),
            Intent::Pause => self.pause(),
            Intent::Seek(seconds) => self.seek(seconds),
        }
    }
}

/// Signals a player reports back, in the order it produced them.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEventKind {
    Progress(f64),
    Ended,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerEvent {
    pub clip: ClipId,
    pub kind: PlayerEventKind,
}

pub trait TransportFactory: Send + Sync {
    fn open(&self, id: &ClipId, source: &VideoSource) -> Result<Box<dyn Transport>>;
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("no player mounted for clip {0}")]
    NotMounted(ClipId),
}

/// Clip id -> mounted player handle, filled and cleared as the list
/// window moves.
#[derive(Default)]
pub struct TransportRegistry {
    handles: HashMap<ClipId, Box<dyn Transport>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: ClipId, handle: Box<dyn Transport>) -> Option<Box<dyn Transport>> {
        self.handles.insert(id, handle)
    }

    pub fn remove(&mut self, id: &ClipId) -> Option<Box<dyn Transport>> {
        self.handles.remove(id)
    }

    pub fn contains(&self, id: &ClipId) -> bool {
        self.handles.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &ClipId> {
        self.handles.keys()
    }

    pub fn dispatch(&mut self, id: &ClipId, intent: Intent) -> Result<()> {
        let handle = self
            .handles
            .get_mut(id)
            .ok_or_else(|| TransportError::NotMounted(id.clone()))?;
        handle.apply(intent)
    }
}

impl std::fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportRegistry")
            .field("mounted", &self.handles.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use anyhow::bail;
    use parking_lot::Mutex;

    use super::*;

    pub type Log = Arc<Mutex<Vec<(ClipId, Intent)>>>;

    /// Records every intent it receives; optionally refuses to play.
    pub struct RecordingTransport {
        pub id: ClipId,
        pub log: Log,
        pub fail_play: bool,
    }

    impl Transport for RecordingTransport {
        fn play(&mut self) -> Result<()> {
            if self.fail_play {
                bail!("decoder unavailable");
            }
            self.log.lock().push((self.id.clone(), Intent::Play));
            Ok(())
        }

        fn pause(&mut self) -> Result<()> {
            self.log.lock().push((self.id.clone(), Intent::Pause));
            Ok(())
        }

        fn seek(&mut self, seconds: f64) -> Result<()> {
            self.log.lock().push((self.id.clone(), Intent::Seek(seconds)));
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct RecordingFactory {
        pub log: Log,
        pub opened: Arc<Mutex<Vec<ClipId>>>,
    }

    impl TransportFactory for RecordingFactory {
        fn open(&self, id: &ClipId, _source: &VideoSource) -> Result<Box<dyn Transport>> {
            self.opened.lock().push(id.clone());
            Ok(Box::new(RecordingTransport {
                id: id.clone(),
                log: self.log.clone(),
                fail_play: false,
            }))
        }
    }

    pub fn recording(id: &str, log: &Log) -> Box<dyn Transport> {
        Box::new(RecordingTransport {
            id: ClipId::from(id),
            log: log.clone(),
            fail_play: false,
        })
    }
}
