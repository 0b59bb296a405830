use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::{AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

pub const DEFAULT_CATALOG_URL: &str = "https://api.pexels.com/videos/popular";
pub const DEFAULT_PER_PAGE: u32 = 50;

const ERROR_BODY_LIMIT: usize = 200;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog api key required")]
    MissingApiKey,
    #[error("catalog rejected the api key ({0})")]
    Unauthorized(StatusCode),
    #[error("rate limited by the catalog")]
    RateLimited,
    #[error("catalog request failed with status {status}: {body}")]
    Status { status: StatusCode, body: String },
}

/// Opaque clip identity. The catalog sends numbers, but anything unique works.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ClipId(String);

impl ClipId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for ClipId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl From<&str> for ClipId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl<'de> Deserialize<'de> for ClipId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Number(u64),
            Text(String),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Number(value) => ClipId::from(value),
            RawId::Text(value) => ClipId(value),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaVariant {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub quality: Option<String>,
    #[serde(default)]
    pub file_type: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub fps: Option<f64>,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub size: Option<u64>,
}

impl MediaVariant {
    pub fn is_portrait(&self) -> bool {
        matches!((self.width, self.height), (Some(w), Some(h)) if h > w)
    }

    pub fn is_hd(&self) -> bool {
        self.quality
            .as_deref()
            .is_some_and(|quality| quality.eq_ignore_ascii_case("hd"))
    }

    pub fn label(&self) -> String {
        let quality = self.quality.as_deref().unwrap_or("sd");
        match (self.width, self.height) {
            (Some(w), Some(h)) => format!("{quality} {w}x{h}"),
            _ => quality.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Creator {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipDescriptor {
    pub id: ClipId,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub duration: Option<u32>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub user: Creator,
    #[serde(default)]
    pub video_files: Vec<MediaVariant>,
}

impl ClipDescriptor {
    /// Human title derived from the page URL slug (`/video/woman-on-beach-123/`).
    pub fn title(&self) -> String {
        let slug = Url::parse(self.url.trim()).ok().and_then(|url| {
            url.path_segments()
                .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
                .map(str::to_string)
        });

        let mut words: Vec<&str> = slug
            .as_deref()
            .unwrap_or_default()
            .split('-')
            .filter(|word| !word.is_empty())
            .collect();
        if words
            .last()
            .is_some_and(|last| last.chars().all(|c| c.is_ascii_digit()))
        {
            words.pop();
        }
        if words.is_empty() {
            return format!("Clip {}", self.id);
        }

        let joined = words.join(" ");
        let mut chars = joined.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => format!("Clip {}", self.id),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct PageResponse {
    #[serde(default)]
    page: u32,
    #[serde(default)]
    per_page: u32,
    #[serde(default)]
    total_results: Option<u64>,
    #[serde(default)]
    next_page: Option<String>,
    #[serde(default)]
    videos: Vec<ClipDescriptor>,
}

/// One page of clip descriptors as the feed consumes it.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogPage {
    pub items: Vec<ClipDescriptor>,
    pub page: u32,
    pub total_results: Option<u64>,
    pub exhausted: bool,
}

impl CatalogPage {
    pub fn new(items: Vec<ClipDescriptor>, page: u32, per_page: u32) -> Self {
        let exhausted = items.len() != per_page as usize;
        Self {
            items,
            page,
            total_results: None,
            exhausted,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub api_key: String,
    pub base_url: Option<String>,
    pub user_agent: String,
    pub timeout: Option<Duration>,
    pub http_client: Option<HttpClient>,
}

pub struct Client {
    http: HttpClient,
    api_key: String,
    user_agent: String,
    base_url: Url,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(CatalogError::MissingApiKey.into());
        }

        let base = config
            .base_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or(DEFAULT_CATALOG_URL);
        let base_url =
            Url::parse(base.trim()).with_context(|| format!("parse catalog url {base:?}"))?;

        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(config.timeout.unwrap_or(Duration::from_secs(20)))
                .build()
                .context("build catalog HTTP client")?,
        };

        let user_agent = if config.user_agent.trim().is_empty() {
            format!("clip-feed/{}", crate::VERSION)
        } else {
            config.user_agent
        };

        Ok(Client {
            http,
            api_key: config.api_key.trim().to_string(),
            user_agent,
            base_url,
        })
    }

    pub fn fetch_page(&self, page: u32, per_page: u32) -> Result<CatalogPage> {
        let page = page.max(1);
        let per_page = per_page.max(1);
        let response = self
            .http
            .get(self.base_url.clone())
            .query(&[("page", page), ("per_page", per_page)])
            .header(AUTHORIZATION, &self.api_key)
            .header(USER_AGENT, &self.user_agent)
            .send()
            .with_context(|| format!("request catalog page {page}"))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(CatalogError::Unauthorized(status).into());
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(CatalogError::RateLimited.into());
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(CatalogError::Status {
                status,
                body: truncate_body(&body),
            }
            .into());
        }

        let body: PageResponse = response
            .json()
            .with_context(|| format!("decode catalog page {page}"))?;
        Ok(body.into_page(page, per_page))
    }
}

impl PageResponse {
    fn into_page(self, requested: u32, per_page: u32) -> CatalogPage {
        let echoed = if self.page == 0 { requested } else { self.page };
        let mut page = CatalogPage::new(self.videos, echoed, per_page);
        page.total_results = self.total_results;
        if self.per_page != 0 && self.per_page != per_page {
            log::debug!(
                "catalog echoed per_page={} for requested {}",
                self.per_page,
                per_page
            );
        }
        if self.next_page.is_none() && !page.exhausted {
            log::debug!("catalog page {echoed} is full but has no next_page link");
        }
        page
    }
}

fn truncate_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= ERROR_BODY_LIMIT {
        return trimmed.to_string();
    }
    let mut cut: String = trimmed.chars().take(ERROR_BODY_LIMIT).collect();
    cut.push('…');
    cut
}
