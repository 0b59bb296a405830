use std::sync::Arc;

use anyhow::{Context, Result};

use crate::catalog::{self, CatalogPage, ClipDescriptor, ClipId, Creator, MediaVariant};

/// Source of clip descriptor pages.
pub trait CatalogService: Send + Sync {
    fn fetch_page(&self, page: u32, per_page: u32) -> Result<CatalogPage>;
}

pub struct HttpCatalogService {
    client: Arc<catalog::Client>,
}

impl HttpCatalogService {
    pub fn new(client: Arc<catalog::Client>) -> Self {
        Self { client }
    }
}

impl CatalogService for HttpCatalogService {
    fn fetch_page(&self, page: u32, per_page: u32) -> Result<CatalogPage> {
        self.client
            .fetch_page(page, per_page)
            .context("fetch catalog page")
    }
}

pub const SAMPLE_CLIP_COUNT: usize = 1000;
pub const SAMPLE_VIDEO_URL: &str =
    "https://commondatastorage.googleapis.com/gtv-videos-bucket/sample/ForBiggerJoyrides.mp4";

/// Offline catalog of public sample clips, paged like the real one.
pub struct SampleCatalogService {
    total: usize,
}

impl Default for SampleCatalogService {
    fn default() -> Self {
        Self::new(SAMPLE_CLIP_COUNT)
    }
}

impl SampleCatalogService {
    pub fn new(total: usize) -> Self {
        Self { total }
    }
}

impl CatalogService for SampleCatalogService {
    fn fetch_page(&self, page: u32, per_page: u32) -> Result<CatalogPage> {
        let page = page.max(1);
        let per_page = per_page.max(1);
        let start = (page as usize - 1).saturating_mul(per_page as usize);
        let end = start.saturating_add(per_page as usize).min(self.total);
        let items = (start..end.max(start)).map(sample_clip).collect();
        Ok(CatalogPage::new(items, page, per_page))
    }
}

fn sample_clip(index: usize) -> ClipDescriptor {
    ClipDescriptor {
        id: ClipId::new(index.to_string()),
        width: Some(1280),
        height: Some(720),
        duration: Some(15),
        url: format!("https://clip-feed.test/video/sample-clip-{}-{index}/", index + 1),
        image: String::new(),
        user: Creator {
            id: None,
            name: "Sample".into(),
            url: String::new(),
        },
        video_files: vec![MediaVariant {
            id: Some(index as u64),
            quality: Some("hd".into()),
            file_type: "video/mp4".into(),
            width: Some(1280),
            height: Some(720),
            fps: Some(24.0),
            link: SAMPLE_VIDEO_URL.into(),
            size: None,
        }],
    }
}
