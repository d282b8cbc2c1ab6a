use crate::config::Config;
use crate::work_item::WorkItem;
use crate::TrawlError;
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

/// Inclusive date window for the listing endpoint.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, TrawlError> {
        if start > end {
            return Err(TrawlError::Config(format!(
                "date range start {} is after end {}",
                start, end
            )));
        }
        Ok(DateRange { start, end })
    }

    pub fn parse(start: &str, end: &str) -> Result<Self, TrawlError> {
        let start = NaiveDate::parse_from_str(start, "%Y-%m-%d")
            .map_err(|e| TrawlError::Config(format!("bad start date {}: {}", start, e)))?;
        let end = NaiveDate::parse_from_str(end, "%Y-%m-%d")
            .map_err(|e| TrawlError::Config(format!("bad end date {}: {}", end, e)))?;
        DateRange::new(start, end)
    }
}

/// A well-formed response to a single-entity fetch.
#[derive(PartialEq, Eq, Debug, Clone)]
pub enum FetchReply {
    Payload(String),
    NotFound,
}

/// A failed fetch, classified for the retry logic.
#[derive(PartialEq, Eq, Debug, Clone)]
pub enum FetchFailure {
    Transient(String),
    RateLimited { retry_after_secs: u64 },
    Auth(String),
    BadRequest(String),
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchFailure::Transient(m) => write!(f, "transient failure: {}", m),
            FetchFailure::RateLimited { retry_after_secs } => {
                write!(f, "rate limited, retry after {}s", retry_after_secs)
            }
            FetchFailure::Auth(m) => write!(f, "authentication failure: {}", m),
            FetchFailure::BadRequest(m) => write!(f, "bad request: {}", m),
        }
    }
}

/// One page from the listing endpoint.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct ListingPage {
    pub items: Vec<WorkItem>,
    pub next_page_token: Option<String>,
    pub total_count: usize,
}

pub trait RegisterClientLike: Send + Sync {
    fn fetch(&self, id: &str) -> Result<FetchReply, FetchFailure>;
    fn list(
        &self,
        range: &DateRange,
        page_token: Option<&str>,
    ) -> Result<ListingPage, FetchFailure>;
}

#[derive(Debug, Deserialize)]
struct ListingResponse {
    #[serde(default)]
    items: Vec<ListingEntry>,
    #[serde(default, alias = "hits")]
    total_results: usize,
}

#[derive(Debug, Deserialize)]
struct ListingEntry {
    #[serde(alias = "company_number")]
    id: String,
    #[serde(default, alias = "company_name")]
    name: Option<String>,
}

/// Register client backed by the real HTTP API. The API key is sent as the
/// basic-auth username with an empty password.
pub struct HttpRegisterClient {
    http: reqwest::blocking::Client,
    base_url: String,
    listing_url: String,
    api_key: Option<String>,
    page_size: usize,
}

impl HttpRegisterClient {
    pub fn new(config: &Config) -> Result<Self, TrawlError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| TrawlError::Http(e.to_string()))?;
        Ok(HttpRegisterClient {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            listing_url: config.listing_url.clone(),
            api_key: config.api_key.clone(),
            page_size: config.page_size,
        })
    }

    fn get(&self, url: &str, query: &[(&str, String)]) -> Result<GetOutcome, FetchFailure> {
        let mut request = self.http.get(url).query(query);
        if let Some(key) = &self.api_key {
            request = request.basic_auth(key, Some(""));
        }

        let response = request
            .send()
            .map_err(|e| FetchFailure::Transient(e.to_string()))?;

        let status = response.status();
        match status.as_u16() {
            200..=299 => response
                .text()
                .map(GetOutcome::Body)
                .map_err(|e| FetchFailure::Transient(format!("body read failed: {}", e))),
            404 => Ok(GetOutcome::NotFound),
            401 | 403 => Err(FetchFailure::Auth(format!("status {}", status))),
            400 => Err(FetchFailure::BadRequest(format!("status {}", status))),
            429 => {
                let retry_after_secs = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(20);
                Err(FetchFailure::RateLimited { retry_after_secs })
            }
            _ => Err(FetchFailure::Transient(format!("status {}", status))),
        }
    }
}

enum GetOutcome {
    Body(String),
    NotFound,
}

impl RegisterClientLike for HttpRegisterClient {
    fn fetch(&self, id: &str) -> Result<FetchReply, FetchFailure> {
        let url = format!("{}/{}", self.base_url, id);
        match self.get(&url, &[])? {
            GetOutcome::Body(body) => Ok(FetchReply::Payload(body)),
            GetOutcome::NotFound => Ok(FetchReply::NotFound),
        }
    }

    fn list(
        &self,
        range: &DateRange,
        page_token: Option<&str>,
    ) -> Result<ListingPage, FetchFailure> {
        let offset: usize = page_token.and_then(|t| t.parse().ok()).unwrap_or(0);
        let query = [
            ("incorporated_from", range.start.format("%Y-%m-%d").to_string()),
            ("incorporated_to", range.end.format("%Y-%m-%d").to_string()),
            ("size", self.page_size.to_string()),
            ("start_index", offset.to_string()),
        ];
        let body = match self.get(&self.listing_url, &query)? {
            GetOutcome::Body(body) => body,
            GetOutcome::NotFound => {
                return Err(FetchFailure::BadRequest("listing endpoint returned 404".to_string()));
            }
        };
        let parsed: ListingResponse = serde_json::from_str(&body)
            .map_err(|e| FetchFailure::Transient(format!("listing parse failed: {}", e)))?;

        let items: Vec<WorkItem> = parsed
            .items
            .into_iter()
            .map(|entry| WorkItem {
                id: entry.id,
                name: entry.name,
            })
            .collect();

        let consumed = offset + items.len();
        let next_page_token = if !items.is_empty() && consumed < parsed.total_results {
            Some(consumed.to_string())
        } else {
            None
        };

        Ok(ListingPage {
            items,
            next_page_token,
            total_count: parsed.total_results,
        })
    }
}

/// Scripted in-memory register for tests. Each id carries a queue of replies;
/// the last reply sticks, so a single scripted success can be fetched any
/// number of times.
pub struct MockRegisterClient {
    scripts: Mutex<HashMap<String, VecDeque<Result<FetchReply, FetchFailure>>>>,
    listing: Mutex<Vec<WorkItem>>,
    page_size: usize,
    fetch_log: Mutex<Vec<String>>,
}

impl MockRegisterClient {
    pub fn new() -> Self {
        MockRegisterClient {
            scripts: Mutex::new(HashMap::new()),
            listing: Mutex::new(Vec::new()),
            page_size: 100,
            fetch_log: Mutex::new(Vec::new()),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn script(&self, id: &str, replies: Vec<Result<FetchReply, FetchFailure>>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(id.to_string(), replies.into());
    }

    pub fn succeed(&self, id: &str, payload: &str) {
        self.script(id, vec![Ok(FetchReply::Payload(payload.to_string()))]);
    }

    pub fn not_found(&self, id: &str) {
        self.script(id, vec![Ok(FetchReply::NotFound)]);
    }

    pub fn set_listing(&self, items: Vec<WorkItem>) {
        *self.listing.lock().unwrap() = items;
    }

    pub fn fetch_calls(&self) -> Vec<String> {
        self.fetch_log.lock().unwrap().clone()
    }

    pub fn fetch_count(&self, id: &str) -> usize {
        self.fetch_log.lock().unwrap().iter().filter(|i| *i == id).count()
    }
}

impl Default for MockRegisterClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterClientLike for MockRegisterClient {
    fn fetch(&self, id: &str) -> Result<FetchReply, FetchFailure> {
        self.fetch_log.lock().unwrap().push(id.to_string());
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(id) {
            Some(queue) => {
                if queue.len() > 1 {
                    queue.pop_front().unwrap()
                } else {
                    queue.front().cloned().unwrap_or(Ok(FetchReply::NotFound))
                }
            }
            None => Ok(FetchReply::NotFound),
        }
    }

    fn list(
        &self,
        _range: &DateRange,
        page_token: Option<&str>,
    ) -> Result<ListingPage, FetchFailure> {
        let all = self.listing.lock().unwrap();
        let offset: usize = page_token.and_then(|t| t.parse().ok()).unwrap_or(0);
        let end = (offset + self.page_size).min(all.len());
        let items = all[offset.min(all.len())..end].to_vec();
        let next_page_token = if end < all.len() {
            Some(end.to_string())
        } else {
            None
        };
        Ok(ListingPage {
            items,
            next_page_token,
            total_count: all.len(),
        })
    }
}
