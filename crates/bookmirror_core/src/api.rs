use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use log::debug;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::config::{ExportFormat, ExportLevel, MirrorConfig};
use crate::rate_limit::RateLimiter;

pub const LISTING_PAGE_SIZE: usize = 50;
pub const MAX_STALLED_LISTING_REQUESTS: usize = 3;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{status} Forbidden, check your token (while requesting {url})")]
    Forbidden { status: u16, url: String },
    #[error("HTTP {status} while requesting {url}")]
    HttpStatus { status: u16, url: String },
    #[error(
        "listing {endpoint} stopped making progress at {collected} of {total} items after {attempts} requests"
    )]
    ListingStalled {
        endpoint: String,
        collected: usize,
        total: usize,
        attempts: usize,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListingPage<T> {
    pub total: usize,
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ShelfItem {
    pub id: i64,
    pub name: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BookItem {
    pub id: i64,
    pub name: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChapterItem {
    pub id: i64,
    pub name: String,
    pub book_id: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PageItem {
    pub id: i64,
    pub name: String,
    pub book_id: i64,
    #[serde(default)]
    pub chapter_id: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AttachmentItem {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub extension: String,
    pub uploaded_to: i64,
    pub updated_at: DateTime<Utc>,
}

/// Body of the attachment detail endpoint. `content` is a URL for external
/// attachments and base64 data otherwise.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AttachmentContent {
    #[serde(default)]
    pub external: bool,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ImageItem {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub path: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct ShelfDetail {
    #[serde(default)]
    books: Option<Vec<BookItem>>,
}

/// Read access to a BookStack instance.
pub trait ContentApi {
    fn list_shelves(&mut self) -> Result<Vec<ShelfItem>>;
    fn shelf_books(&mut self, shelf_id: i64) -> Result<Vec<BookItem>>;
    fn list_books(&mut self) -> Result<Vec<BookItem>>;
    fn list_chapters(&mut self) -> Result<Vec<ChapterItem>>;
    fn list_pages(&mut self) -> Result<Vec<PageItem>>;
    fn list_attachments(&mut self) -> Result<Vec<AttachmentItem>>;
    fn list_images(&mut self) -> Result<Vec<ImageItem>>;
    fn attachment_content(&mut self, attachment_id: i64) -> Result<AttachmentContent>;
    fn export(&mut self, level: ExportLevel, id: i64, format: ExportFormat) -> Result<Vec<u8>>;
    /// Fetch an absolute URL outside the API prefix. Credentials and static
    /// headers are only sent when `authenticated` is set.
    fn download(&mut self, url: &str, authenticated: bool) -> Result<Vec<u8>>;
    fn request_count(&self) -> usize;
}

/// Collect a paginated listing. `fetch_page` receives the offset to request;
/// the declared total is re-read from every response.
pub fn collect_listing<T, F>(endpoint: &str, mut fetch_page: F) -> Result<Vec<T>>
where
    F: FnMut(usize) -> Result<ListingPage<T>>,
{
    let mut items: Vec<T> = Vec::new();
    let mut total = LISTING_PAGE_SIZE;
    let mut stalled = 0usize;
    let mut attempts = 0usize;

    while total > items.len() {
        let page = fetch_page(items.len())?;
        attempts += 1;
        total = page.total;
        let received = page.data.len();
        items.extend(page.data);
        debug!(
            "API listing {endpoint} got {} items out of {total}",
            items.len()
        );

        if received == 0 && total > items.len() {
            stalled += 1;
            if stalled >= MAX_STALLED_LISTING_REQUESTS {
                return Err(ApiError::ListingStalled {
                    endpoint: endpoint.to_string(),
                    collected: items.len(),
                    total,
                    attempts,
                }
                .into());
            }
        } else {
            stalled = 0;
        }
    }

    Ok(items)
}

#[derive(Debug, Clone)]
pub struct BookStackClientConfig {
    pub host: String,
    pub token: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit: usize,
    pub extra_headers: Vec<(String, String)>,
}

impl BookStackClientConfig {
    pub fn from_config(config: &MirrorConfig, token: String) -> Self {
        Self {
            host: config.host(),
            token,
            user_agent: config.user_agent(),
            timeout_ms: config.timeout_ms(),
            rate_limit: config.rate_limit(),
            extra_headers: config
                .remote
                .headers
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
        }
    }

    pub fn api_prefix(&self) -> String {
        format!("{}/api", self.host.trim_end_matches('/'))
    }
}

pub struct BookStackClient {
    client: Client,
    config: BookStackClientConfig,
    api_headers: HeaderMap,
    base_url: Url,
    limiter: RateLimiter,
    request_count: usize,
}

impl BookStackClient {
    pub fn new(config: BookStackClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build BookStack HTTP client")?;
        let api_headers = build_api_headers(&config)?;
        let base_url = Url::parse(&config.host)
            .with_context(|| format!("invalid BookStack host: {}", config.host))?;
        let limiter = RateLimiter::new(config.rate_limit);

        Ok(Self {
            client,
            config,
            api_headers,
            base_url,
            limiter,
            request_count: 0,
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_prefix(), path.trim_start_matches('/'))
    }

    fn send(&mut self, request: RequestBuilder, url: &str) -> Result<Vec<u8>> {
        self.limiter.acquire();
        self.request_count += 1;
        debug!("Making http request: {url}");

        let response = request
            .send()
            .with_context(|| format!("failed to request {url}"))?;
        let status = response.status();
        if status == StatusCode::FORBIDDEN {
            return Err(ApiError::Forbidden {
                status: status.as_u16(),
                url: url.to_string(),
            }
            .into());
        }
        if !status.is_success() {
            return Err(ApiError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            }
            .into());
        }
        let bytes = response
            .bytes()
            .with_context(|| format!("failed to read response body from {url}"))?;
        Ok(bytes.to_vec())
    }

    fn api_get_bytes(&mut self, path: &str, query: &[(&str, String)]) -> Result<Vec<u8>> {
        let url = self.api_url(path);
        let request = self
            .client
            .get(&url)
            .headers(self.api_headers.clone())
            .query(query);
        self.send(request, &url)
    }

    fn api_get_json<T: DeserializeOwned>(&mut self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let bytes = self.api_get_bytes(path, query)?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("failed to decode JSON response from {path}"))
    }

    fn api_listing<T: DeserializeOwned>(&mut self, endpoint: &str) -> Result<Vec<T>> {
        collect_listing(endpoint, |offset| {
            self.api_get_json(
                endpoint,
                &[
                    ("count", LISTING_PAGE_SIZE.to_string()),
                    ("offset", offset.to_string()),
                ],
            )
        })
    }

    /// Scheme, host and port must all match the configured wiki.
    fn is_same_origin(&self, url: &Url) -> bool {
        url.origin() == self.base_url.origin()
    }

    /// Requests outside the API carry only the user agent unless they are
    /// authenticated and go to the wiki's own origin.
    fn download_request(&self, url: &Url, authenticated: bool) -> RequestBuilder {
        let request = self
            .client
            .get(url.clone())
            .header(USER_AGENT, self.config.user_agent.clone());
        if authenticated && self.is_same_origin(url) {
            request.headers(self.api_headers.clone())
        } else {
            request
        }
    }
}

impl ContentApi for BookStackClient {
    fn list_shelves(&mut self) -> Result<Vec<ShelfItem>> {
        self.api_listing("shelves")
    }

    fn shelf_books(&mut self, shelf_id: i64) -> Result<Vec<BookItem>> {
        let detail: ShelfDetail = self.api_get_json(&format!("shelves/{shelf_id}"), &[])?;
        Ok(detail.books.unwrap_or_default())
    }

    fn list_books(&mut self) -> Result<Vec<BookItem>> {
        self.api_listing("books")
    }

    fn list_chapters(&mut self) -> Result<Vec<ChapterItem>> {
        self.api_listing("chapters")
    }

    fn list_pages(&mut self) -> Result<Vec<PageItem>> {
        self.api_listing("pages")
    }

    fn list_attachments(&mut self) -> Result<Vec<AttachmentItem>> {
        self.api_listing("attachments")
    }

    fn list_images(&mut self) -> Result<Vec<ImageItem>> {
        self.api_listing("image-gallery")
    }

    fn attachment_content(&mut self, attachment_id: i64) -> Result<AttachmentContent> {
        self.api_get_json(&format!("attachments/{attachment_id}"), &[])
    }

    fn export(&mut self, level: ExportLevel, id: i64, format: ExportFormat) -> Result<Vec<u8>> {
        self.api_get_bytes(
            &format!("{}/{id}/export/{}", level.as_str(), format.as_str()),
            &[],
        )
    }

    fn download(&mut self, url: &str, authenticated: bool) -> Result<Vec<u8>> {
        let Ok(parsed) = Url::parse(url) else {
            bail!("invalid download URL: {url}");
        };
        let request = self.download_request(&parsed, authenticated);
        self.send(request, url)
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

fn build_api_headers(config: &BookStackClientConfig) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/json; charset=utf-8"),
    );
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&config.user_agent)
            .with_context(|| format!("invalid user agent: {}", config.user_agent))?,
    );
    let mut authorization = HeaderValue::from_str(&format!("Token {}", config.token))
        .context("API token contains characters not allowed in a header")?;
    authorization.set_sensitive(true);
    headers.insert(AUTHORIZATION, authorization);

    for (name, value) in &config.extra_headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("invalid header name: {name}"))?;
        let value = HeaderValue::from_str(value)
            .with_context(|| format!("invalid value for header {}", name.as_str()))?;
        headers.insert(name, value);
    }
    Ok(headers)
}
