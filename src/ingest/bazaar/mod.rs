
use async_trait::async_trait;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

use super::ServiceSource;
use crate::config::BazaarConfig;
use crate::database::sqlite::Source;
use crate::normalizer::RawServiceRecord;
use crate::{IndexError, Result};

const USER_AGENT: &str = concat!("x402-search/", env!("CARGO_PKG_VERSION"));

/// Paginated client for the Bazaar directory of x402 resources
#[derive(Debug, Clone)]
pub struct BazaarClient {
    base_url: Url,
    page_size: u32,
    max_pages: u32,
    page_delay: Duration,
    retry_attempts: u32,
    retry_delay: Duration,
    agent: ureq::Agent,
}

impl BazaarClient {
    #[inline]
    pub fn new(config: &BazaarConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            IndexError::Config(format!("Invalid Bazaar URL {}: {}", config.base_url, e))
        })?;

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_secs.max(1))))
            .build()
            .into();

        Ok(Self {
            base_url,
            page_size: config.page_size.max(1),
            max_pages: config.max_pages.max(1),
            page_delay: Duration::from_millis(config.page_delay_ms),
            retry_attempts: config.retry_attempts.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            agent,
        })
    }

    fn page_url(&self, offset: u64) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("resources");
        }
        url.query_pairs_mut()
            .append_pair("limit", &self.page_size.to_string())
            .append_pair("offset", &offset.to_string());
        url
    }

    /// Fetch every listing. A failure on the first page is fatal; a failure
    /// on a later page ends pagination with what has been collected.
    #[inline]
    pub fn fetch_all(&self) -> Result<Vec<RawServiceRecord>> {
        let start = Instant::now();
        info!("Fetching services from Bazaar at {}", self.base_url);

        let page_size = u64::from(self.page_size);
        let first = self.fetch_page(0).map_err(|e| {
            IndexError::Source(format!("Bazaar request failed: {}", e))
        })?;

        let first_items = listing_items(&first);
        let total = first
            .pointer("/pagination/total")
            .and_then(Value::as_u64)
            .unwrap_or(first_items.len() as u64);

        let mut records: Vec<RawServiceRecord> = first_items
            .into_iter()
            .map(RawServiceRecord::from_listing)
            .collect();

        info!(
            "Page 1: fetched {} services ({}/{})",
            records.len(),
            records.len(),
            total
        );

        let mut offset = page_size;
        let mut page = 2;
        let mut last_page_len = records.len() as u64;

        while (records.len() as u64) < total {
            if last_page_len < page_size {
                debug!("Short page, stopping pagination");
                break;
            }

            if page > self.max_pages {
                warn!(
                    "Reached max page limit ({}), stopping pagination",
                    self.max_pages
                );
                break;
            }

            std::thread::sleep(self.page_delay);

            let body = match self.fetch_page(offset) {
                Ok(body) => body,
                Err(e) => {
                    warn!("Page {} failed: {}, stopping pagination", page, e);
                    break;
                }
            };

            let items = listing_items(&body);
            if items.is_empty() {
                debug!("No more services, stopping pagination");
                break;
            }

            last_page_len = items.len() as u64;
            records.extend(items.into_iter().map(RawServiceRecord::from_listing));
            info!(
                "Page {}: fetched {} services ({}/{})",
                page,
                last_page_len,
                records.len(),
                total
            );

            offset += page_size;
            page += 1;
        }

        info!(
            "Fetched {} services from Bazaar in {}ms",
            records.len(),
            start.elapsed().as_millis()
        );
        Ok(records)
    }

    fn fetch_page(&self, offset: u64) -> std::result::Result<Value, String> {
        let url = self.page_url(offset);
        debug!("Fetching {}", url);

        let body = self.get_with_retry(&url)?;
        serde_json::from_str(&body).map_err(|e| format!("invalid JSON from {}: {}", url, e))
    }

    /// Transport errors and 5xx responses are retried, waiting
    /// `retry_delay * attempt` between attempts
    fn get_with_retry(&self, url: &Url) -> std::result::Result<String, String> {
        let mut last_error = String::new();

        for attempt in 1..=self.retry_attempts {
            let result = self
                .agent
                .get(url.as_str())
                .header("Accept", "application/json")
                .header("User-Agent", USER_AGENT)
                .call()
                .and_then(|mut resp| resp.body_mut().read_to_string());

            match result {
                Ok(body) => return Ok(body),
                Err(ureq::Error::StatusCode(status)) if status < 500 => {
                    return Err(format!("HTTP {}", status));
                }
                Err(error) => {
                    last_error = error.to_string();
                    if attempt < self.retry_attempts {
                        warn!(
                            "Request to {} failed ({}), retry {}/{}",
                            url, last_error, attempt, self.retry_attempts
                        );
                        std::thread::sleep(self.retry_delay * attempt);
                    }
                }
            }
        }

        Err(last_error)
    }
}

/// Listing items from a page body: `items`, `services` or `results`, or a
/// bare array
#[inline]
pub fn listing_items(body: &Value) -> Vec<Value> {
    let items = ["items", "services", "results"]
        .iter()
        .find_map(|key| body.get(*key).filter(|v| !v.is_null()))
        .unwrap_or(body);

    items.as_array().cloned().unwrap_or_else(|| {
        warn!("Unexpected Bazaar response format");
        Vec::new()
    })
}

#[async_trait]
impl ServiceSource for BazaarClient {
    #[inline]
    fn source(&self) -> Source {
        Source::Bazaar
    }

    #[inline]
    async fn fetch_records(&self) -> Result<Vec<RawServiceRecord>> {
        let client = self.clone();
        tokio::task::spawn_blocking(move || client.fetch_all())
            .await
            .map_err(|e| IndexError::Source(format!("Bazaar fetch task failed: {}", e)))?
    }
}
