// Normalizer module
// Maps raw upstream listings into the canonical service schema and derives
// the text that gets embedded

pub mod manifest;


use chrono::{DateTime, Utc};
use fancy_regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::LazyLock;
use tracing::{debug, warn};
use url::Url;

use crate::database::sqlite::{NewService, Source, SourceFlags};
use crate::{IndexError, Result};

const DEFAULT_SCORE: f64 = 0.5;
const NO_DESCRIPTION: &str = "No description";
const MAX_DERIVED_NAME_CHARS: usize = 50;

static HOST_PREFIX_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(www|api|staging|api-dev|api-staging)\.").expect("valid regex")
});
static SKIPPED_SEGMENT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(api|v1|v2|x402|qrn:swarm:|qrn:agent:)").expect("valid regex")
});
static NON_ALPHANUMERIC_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9]").expect("valid regex"));
static CAMEL_CASE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([a-z])([A-Z])").expect("valid regex"));

/// A listing as delivered by an upstream directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawServiceRecord {
    #[serde(default)]
    pub resource: Option<String>,
    pub manifest: Value,
    #[serde(default, rename = "updatedAt", alias = "updated_at")]
    pub updated_at: Option<String>,
}

impl RawServiceRecord {
    /// Wrap one listing item, which doubles as its own manifest
    #[inline]
    pub fn from_listing(item: Value) -> Self {
        let resource = manifest::non_empty_str(&item, "resource").map(str::to_string);
        let updated_at = manifest::non_empty_str(&item, "lastUpdated")
            .or_else(|| manifest::non_empty_str(&item, "updatedAt"))
            .map(str::to_string);

        Self {
            resource,
            manifest: item,
            updated_at,
        }
    }
}

/// Normalizes listings from a single upstream, flagging that source only
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    source: Source,
}

impl Normalizer {
    #[inline]
    pub fn new(source: Source) -> Self {
        Self { source }
    }

    #[inline]
    pub fn source(&self) -> Source {
        self.source
    }

    #[inline]
    pub fn normalize(&self, raw: &RawServiceRecord) -> Result<NewService> {
        self.normalize_at(raw, Utc::now())
    }

    /// Normalize with an explicit ingestion time, used for `trust_last_seen`
    /// and as the fallback for an unusable `updatedAt`
    #[inline]
    pub fn normalize_at(&self, raw: &RawServiceRecord, now: DateTime<Utc>) -> Result<NewService> {
        let listing = &raw.manifest;
        let resource = manifest::resource(listing)
            .or(raw.resource.as_deref())
            .unwrap_or_default()
            .to_string();

        let Some(accept) = manifest::first_accept_option(listing) else {
            return Err(IndexError::MissingPaymentOption { resource });
        };

        let max_amount = parse_max_amount(accept.get("maxAmountRequired"))
            .map_err(|reason| IndexError::Validation(format!("{}: {}", resource, reason)))?;

        let description = manifest::non_empty_str(accept, "description")
            .or_else(|| manifest::metadata_description(listing))
            .unwrap_or(NO_DESCRIPTION)
            .to_string();

        let field = |key: &str| {
            manifest::non_empty_str(accept, key)
                .unwrap_or_default()
                .to_string()
        };

        let last_updated = parse_updated_at(raw.updated_at.as_deref(), &resource, now);

        debug!("Normalized {} from {}", resource, self.source);

        Ok(NewService {
            resource,
            description,
            network: field("network"),
            asset: field("asset"),
            max_amount,
            pay_to: field("payTo"),
            manifest: listing.clone(),

            trust_transaction_count: manifest::total_transactions(listing)
                .unwrap_or(0)
                .max(0),
            trust_last_seen: Some(now),
            trust_origin_title: manifest::metadata_name(listing).map(str::to_string),
            trust_origin_description: manifest::metadata_description(listing)
                .map(str::to_string),

            score_confidence: manifest::confidence_score(listing)
                .map_or(DEFAULT_SCORE, unit_interval),
            score_performance_ms: manifest::avg_latency_ms(listing).map(|ms| ms.max(0)),
            score_reliability: manifest::api_success_rate(listing)
                .map_or(DEFAULT_SCORE, unit_interval),
            score_popularity: 0,
            score_unique_users: manifest::total_unique_users(listing)
                .unwrap_or(0)
                .max(0),

            sources: SourceFlags::only(self.source),
            last_updated,
        })
    }
}

fn unit_interval(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

/// `maxAmountRequired` arrives as a decimal string, occasionally as a number
fn parse_max_amount(value: Option<&Value>) -> std::result::Result<i64, String> {
    match value {
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map_err(|e| format!("invalid maxAmountRequired '{}': {}", s, e)),
        Some(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| format!("maxAmountRequired {} is not a 64-bit integer", n)),
        Some(other) => Err(format!("unexpected maxAmountRequired: {}", other)),
        None => Err("missing maxAmountRequired".to_string()),
    }
}

fn parse_updated_at(value: Option<&str>, resource: &str, now: DateTime<Utc>) -> DateTime<Utc> {
    let Some(value) = value else {
        return now;
    };

    match DateTime::parse_from_rfc3339(value) {
        Ok(parsed) => parsed.with_timezone(&Utc),
        Err(e) => {
            warn!(
                "Unparseable updatedAt '{}' for {}: {}, using ingestion time",
                value, resource, e
            );
            now
        }
    }
}

/// Admission gate before persistence
#[inline]
pub fn validate(service: &NewService) -> bool {
    !service.resource.is_empty()
        && !service.description.is_empty()
        && !service.network.is_empty()
        && !service.asset.is_empty()
        && !service.pay_to.is_empty()
        && service.max_amount >= 0
}

/// Text fed to the embedding model:
/// `name | description | network:<n> | asset:<a> | tags:<t1,t2>`, skipping
/// empty segments
#[inline]
pub fn extract_searchable_text(service: &NewService) -> String {
    let name = manifest::metadata_name(&service.manifest)
        .map(str::to_string)
        .or_else(|| {
            service
                .trust_origin_title
                .clone()
                .filter(|title| !title.is_empty())
        })
        .unwrap_or_else(|| name_from_resource_url(&service.resource));

    let tags = manifest::metadata_tags(&service.manifest);

    let parts = [
        name,
        service.description.clone(),
        if service.network.is_empty() {
            String::new()
        } else {
            format!("network:{}", service.network)
        },
        if service.asset.is_empty() {
            String::new()
        } else {
            format!("asset:{}", service.asset)
        },
        if tags.is_empty() {
            String::new()
        } else {
            format!("tags:{}", tags.join(","))
        },
    ];

    parts
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Best-effort human name from a resource URL, e.g.
/// `https://api.weather-x.io/v2/forecast` becomes `weather x forecast`.
/// Returns an empty string for unparseable URLs.
#[inline]
pub fn name_from_resource_url(resource: &str) -> String {
    let Ok(url) = Url::parse(resource) else {
        return String::new();
    };

    let host = url.host_str().unwrap_or_default();
    let host = HOST_PREFIX_REGEX.replace_all(host, "");
    let domain = host.split('.').next().unwrap_or_default().to_string();

    let segments = url
        .path_segments()
        .map(|segments| {
            segments
                .filter(|segment| !segment.is_empty())
                .filter(|segment| !SKIPPED_SEGMENT_REGEX.is_match(segment).unwrap_or(false))
                .take(2)
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let name = std::iter::once(domain)
        .chain(segments)
        .map(|part| humanize(&part))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    name.chars()
        .take(MAX_DERIVED_NAME_CHARS)
        .collect::<String>()
        .trim_end()
        .to_string()
}

fn humanize(part: &str) -> String {
    let spaced = NON_ALPHANUMERIC_REGEX.replace_all(part, " ");
    let split = CAMEL_CASE_REGEX.replace_all(&spaced, "$1 $2");
    split
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
