use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, info, warn};

use crate::catalog::{CatalogPage, ClipDescriptor, ClipId, DEFAULT_PER_PAGE};
use crate::data::CatalogService;
use crate::media::{self, Resolution, DEFAULT_FILE_TYPE};

/// Snapshot of where the feed stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedCursor {
    pub current_id: Option<ClipId>,
    pub page: u32,
    pub has_more: bool,
    pub loading: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Clip {
    pub descriptor: ClipDescriptor,
    pub resolution: Resolution,
}

impl Clip {
    pub fn new(descriptor: ClipDescriptor, file_type: &str) -> Self {
        let resolution = media::resolve(&descriptor, file_type);
        Self {
            descriptor,
            resolution,
        }
    }

    pub fn id(&self) -> &ClipId {
        &self.descriptor.id
    }
}

#[derive(Debug, Clone)]
pub struct FeedOptions {
    pub per_page: u32,
    pub file_type: String,
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self {
            per_page: DEFAULT_PER_PAGE,
            file_type: DEFAULT_FILE_TYPE.to_string(),
        }
    }
}

struct Completion {
    request_id: u64,
    page: u32,
    result: Result<CatalogPage>,
}

/// Paged clip list. At most one fetch is in flight; results are applied
/// on the caller's thread by [`Feed::poll`].
pub struct Feed {
    service: Arc<dyn CatalogService>,
    options: FeedOptions,
    clips: Vec<Clip>,
    page: u32,
    has_more: bool,
    error: Option<String>,
    pending: Option<u64>,
    next_request_id: u64,
    requests_issued: u64,
    response_tx: Sender<Completion>,
    response_rx: Receiver<Completion>,
}

impl Feed {
    pub fn new(service: Arc<dyn CatalogService>, options: FeedOptions) -> Self {
        let (response_tx, response_rx) = unbounded();
        let mut options = options;
        options.per_page = options.per_page.max(1);
        Self {
            service,
            options,
            clips: Vec::new(),
            page: 1,
            has_more: true,
            error: None,
            pending: None,
            next_request_id: 0,
            requests_issued: 0,
            response_tx,
            response_rx,
        }
    }

    pub fn clips(&self) -> &[Clip] {
        &self.clips
    }

    pub fn len(&self) -> usize {
        self.clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Clip> {
        self.clips.get(index)
    }

    pub fn index_of(&self, id: &ClipId) -> Option<usize> {
        self.clips.iter().position(|clip| clip.id() == id)
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn per_page(&self) -> u32 {
        self.options.per_page
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn is_loading(&self) -> bool {
        self.pending.is_some()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn requests_issued(&self) -> u64 {
        self.requests_issued
    }

    pub fn cursor(&self, current_id: Option<ClipId>) -> FeedCursor {
        FeedCursor {
            current_id,
            page: self.page,
            has_more: self.has_more,
            loading: self.is_loading(),
            error: self.error.clone(),
        }
    }

    /// Requests the next page. No-op while a fetch is in flight or once
    /// the catalog is exhausted.
    pub fn load_more(&mut self) -> bool {
        if self.is_loading() || !self.has_more {
            return false;
        }
        self.issue(self.page);
        true
    }

    /// Starts the first fetch for an empty feed.
    pub fn ensure_started(&mut self) -> bool {
        if !self.clips.is_empty() || self.error.is_some() {
            return false;
        }
        self.load_more()
    }

    /// Re-requests the page that last failed, or page 1 for a feed that never
    /// loaded. Does nothing otherwise.
    pub fn retry(&mut self) -> bool {
        if self.is_loading() {
            return false;
        }
        let never_loaded = self.clips.is_empty() && self.has_more;
        if self.error.is_none() && !never_loaded {
            return false;
        }
        self.issue(self.page);
        true
    }

    pub fn reset(&mut self) {
        debug!("feed reset");
        self.clips.clear();
        self.page = 1;
        self.has_more = true;
        self.error = None;
        self.pending = None;
    }

    pub fn should_prefetch(&self, index: usize, distance: usize) -> bool {
        self.has_more
            && !self.is_loading()
            && self.error.is_none()
            && index.saturating_add(distance) + 1 >= self.clips.len()
    }

    /// Applies finished fetches. Returns true when anything changed.
    pub fn poll(&mut self) -> bool {
        let mut changed = false;
        while let Ok(completion) = self.response_rx.try_recv() {
            changed |= self.apply(completion);
        }
        changed
    }

    /// Blocks for up to `timeout` for the in-flight fetch to finish.
    pub fn wait(&mut self, timeout: Duration) -> bool {
        if !self.is_loading() {
            return false;
        }
        match self.response_rx.recv_timeout(timeout) {
            Ok(completion) => self.apply(completion),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    fn issue(&mut self, page: u32) {
        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        self.pending = Some(request_id);
        self.error = None;
        self.requests_issued += 1;
        debug!("requesting catalog page {page} (request {request_id})");

        let tx = self.response_tx.clone();
        let service = self.service.clone();
        let per_page = self.options.per_page;
        thread::spawn(move || {
            let result = service.fetch_page(page, per_page);
            let _ = tx.send(Completion {
                request_id,
                page,
                result,
            });
        });
    }

    fn apply(&mut self, completion: Completion) -> bool {
        if self.pending != Some(completion.request_id) {
            debug!(
                "discarding stale catalog response for page {}",
                completion.page
            );
            return false;
        }
        self.pending = None;

        match completion.result {
            Ok(batch) => {
                let count = batch.items.len();
                let file_type = self.options.file_type.clone();
                self.clips.extend(
                    batch
                        .items
                        .into_iter()
                        .map(|descriptor| Clip::new(descriptor, &file_type)),
                );
                self.page = batch.page.max(completion.page) + 1;
                self.has_more = !batch.exhausted;
                self.error = None;
                info!(
                    "loaded catalog page {} ({count} clips, {} total, more: {})",
                    completion.page,
                    self.clips.len(),
                    self.has_more
                );
            }
            Err(err) => {
                warn!("catalog page {} failed: {err:#}", completion.page);
                self.error = Some(format!("{err:#}"));
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::bail;
    use crossbeam_channel::bounded;
    use parking_lot::Mutex;

    use super::*;
    use crate::catalog::MediaVariant;

    const WAIT: Duration = Duration::from_secs(5);

    fn descriptor(id: usize, with_media: bool) -> ClipDescriptor {
        ClipDescriptor {
            id: ClipId::new(id.to_string()),
            width: None,
            height: None,
            duration: None,
            url: String::new(),
            image: String::new(),
            user: Default::default(),
            video_files: if with_media {
                vec![MediaVariant {
                    link: format!("https://cdn.test/{id}.mp4"),
                    ..MediaVariant::default()
                }]
            } else {
                Vec::new()
            },
        }
    }

    /// Serves `sizes[page - 1]` items per page; pages listed in `failing`
    /// fail once.
    struct ScriptedService {
        sizes: Vec<usize>,
        failing: Mutex<Vec<u32>>,
        calls: AtomicUsize,
        gate: Option<Receiver<()>>,
    }

    impl ScriptedService {
        fn new(sizes: Vec<usize>) -> Self {
            Self {
                sizes,
                failing: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
                gate: None,
            }
        }
    }

    impl CatalogService for ScriptedService {
        fn fetch_page(&self, page: u32, per_page: u32) -> Result<CatalogPage> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                let _ = gate.recv_timeout(WAIT);
            }
            {
                let mut failing = self.failing.lock();
                if let Some(pos) = failing.iter().position(|p| *p == page) {
                    failing.remove(pos);
                    bail!("connection reset");
                }
            }
            let size = self.sizes.get(page as usize - 1).copied().unwrap_or(0);
            let base = (page as usize - 1) * per_page as usize;
            let items = (0..size)
                .map(|i| descriptor(base + i, (base + i) % 7 != 0))
                .collect();
            Ok(CatalogPage::new(items, page, per_page))
        }
    }

    fn feed_with(service: Arc<ScriptedService>) -> Feed {
        Feed::new(service, FeedOptions::default())
    }

    #[test]
    fn pages_accumulate_until_short_page() {
        let service = Arc::new(ScriptedService::new(vec![50, 50, 50, 12]));
        let mut feed = feed_with(service.clone());

        for k in 1..=3 {
            assert!(feed.load_more());
            assert!(feed.wait(WAIT));
            assert_eq!(feed.len(), 50 * k);
            assert!(feed.has_more());
            assert_eq!(feed.page(), k as u32 + 1);
        }
        assert!(feed.clips().iter().any(|clip| !clip.resolution.is_playable()));

        assert!(feed.load_more());
        assert!(feed.wait(WAIT));
        assert_eq!(feed.len(), 162);
        assert!(!feed.has_more());
        assert!(!feed.load_more());
        assert_eq!(service.calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn second_trigger_while_loading_is_a_no_op() {
        let (release, gate) = bounded(1);
        let service = Arc::new(ScriptedService {
            gate: Some(gate),
            ..ScriptedService::new(vec![50])
        });
        let mut feed = feed_with(service.clone());

        assert!(feed.load_more());
        assert!(!feed.load_more());
        assert!(!feed.retry());
        assert!(feed.cursor(None).loading);
        assert_eq!(feed.requests_issued(), 1);

        release.send(()).unwrap();
        assert!(feed.wait(WAIT));
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
        assert_eq!(feed.len(), 50);
    }

    #[test]
    fn failure_keeps_page_and_retry_refetches_it() {
        let service = Arc::new(ScriptedService::new(vec![50, 50]));
        service.failing.lock().push(2);
        let mut feed = feed_with(service.clone());

        feed.load_more();
        feed.wait(WAIT);
        feed.load_more();
        feed.wait(WAIT);

        let cursor = feed.cursor(None);
        assert_eq!(cursor.page, 2);
        assert!(!cursor.loading);
        assert!(cursor.error.as_deref().unwrap().contains("connection reset"));
        assert_eq!(feed.len(), 50);
        assert!(!feed.should_prefetch(49, 5));

        assert!(feed.retry());
        assert!(feed.wait(WAIT));
        assert_eq!(feed.len(), 100);
        assert_eq!(feed.page(), 3);
        assert!(feed.error().is_none());
    }

    #[test]
    fn retry_without_a_failure_fetches_nothing() {
        let service = Arc::new(ScriptedService::new(vec![50, 12]));
        let mut feed = feed_with(service.clone());
        feed.load_more();
        feed.wait(WAIT);
        assert!(!feed.retry());

        feed.load_more();
        feed.wait(WAIT);
        assert!(!feed.has_more());
        assert_eq!(feed.page(), 3);

        assert!(!feed.retry());
        assert!(!feed.is_loading());
        assert_eq!(feed.page(), 3);
        assert_eq!(feed.len(), 62);
        assert_eq!(feed.requests_issued(), 2);
        assert_eq!(service.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failed_first_page_can_be_retried() {
        let service = Arc::new(ScriptedService::new(vec![5]));
        service.failing.lock().push(1);
        let mut feed = feed_with(service);
        assert!(feed.ensure_started());
        feed.wait(WAIT);
        assert!(feed.error().is_some());
        assert!(!feed.ensure_started());

        assert!(feed.retry());
        assert!(feed.wait(WAIT));
        assert_eq!(feed.len(), 5);
        assert_eq!(feed.page(), 2);
    }

    #[test]
    fn empty_feed_starts_once() {
        let service = Arc::new(ScriptedService::new(vec![3]));
        let mut feed = feed_with(service);
        assert!(feed.ensure_started());
        assert!(!feed.ensure_started());
        feed.wait(WAIT);
        assert!(!feed.ensure_started());
        assert_eq!(feed.len(), 3);
    }

    #[test]
    fn reset_discards_in_flight_response() {
        let (release, gate) = bounded(1);
        let service = Arc::new(ScriptedService {
            gate: Some(gate),
            ..ScriptedService::new(vec![50])
        });
        let mut feed = feed_with(service);
        feed.load_more();
        feed.reset();
        release.send(()).unwrap();

        // the stale completion arrives but is not applied
        thread::sleep(Duration::from_millis(50));
        assert!(!feed.poll());
        assert!(feed.is_empty());
        assert_eq!(feed.page(), 1);
    }

    #[test]
    fn prefetch_near_end() {
        let service = Arc::new(ScriptedService::new(vec![50, 50]));
        let mut feed = feed_with(service);
        feed.load_more();
        feed.wait(WAIT);
        assert!(!feed.should_prefetch(10, 5));
        assert!(feed.should_prefetch(44, 5));
    }
}
