//! Typed accessors over an x402 manifest.
//!
//! Manifests are arbitrary JSON preserved verbatim. Each accessor reads one
//! known subfield and returns `None` when it is absent or has the wrong
//! shape, so every fallback is decided by the caller.


use serde_json::Value;

/// The manifest's payment options, empty when missing or not a list
#[inline]
pub fn accept_options(manifest: &Value) -> &[Value] {
    manifest
        .get("accepts")
        .and_then(Value::as_array)
        .map_or(&[], Vec::as_slice)
}

#[inline]
pub fn has_accept_options(manifest: &Value) -> bool {
    !accept_options(manifest).is_empty()
}

#[inline]
pub fn first_accept_option(manifest: &Value) -> Option<&Value> {
    accept_options(manifest).first()
}

#[inline]
pub fn resource(manifest: &Value) -> Option<&str> {
    non_empty_str(manifest, "resource")
}

/// String field of an object, ignoring empty strings
#[inline]
pub fn non_empty_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

#[inline]
pub fn metadata(manifest: &Value) -> Option<&Value> {
    manifest.get("metadata").filter(|m| m.is_object())
}

#[inline]
pub fn metadata_name(manifest: &Value) -> Option<&str> {
    metadata(manifest).and_then(|m| non_empty_str(m, "name"))
}

#[inline]
pub fn metadata_description(manifest: &Value) -> Option<&str> {
    metadata(manifest).and_then(|m| non_empty_str(m, "description"))
}

/// String tags; non-string entries are skipped
#[inline]
pub fn metadata_tags(manifest: &Value) -> Vec<&str> {
    metadata(manifest)
        .and_then(|m| m.get("tags"))
        .and_then(Value::as_array)
        .map(|tags| {
            tags.iter()
                .filter_map(Value::as_str)
                .filter(|t| !t.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

#[inline]
pub fn confidence_score(manifest: &Value) -> Option<f64> {
    finite_f64(manifest.pointer("/metadata/confidence/overallScore"))
}

#[inline]
pub fn avg_latency_ms(manifest: &Value) -> Option<i64> {
    whole_number(manifest.pointer("/metadata/performance/avgLatencyMs"))
}

#[inline]
pub fn api_success_rate(manifest: &Value) -> Option<f64> {
    finite_f64(manifest.pointer("/metadata/reliability/apiSuccessRate"))
}

#[inline]
pub fn total_transactions(manifest: &Value) -> Option<i64> {
    whole_number(manifest.pointer("/metadata/paymentAnalytics/totalTransactions"))
}

#[inline]
pub fn total_unique_users(manifest: &Value) -> Option<i64> {
    whole_number(manifest.pointer("/metadata/paymentAnalytics/totalUniqueUsers"))
}

fn finite_f64(value: Option<&Value>) -> Option<f64> {
    value.and_then(Value::as_f64).filter(|v| v.is_finite())
}

// Counts and latencies occasionally arrive as floats
fn whole_number(value: Option<&Value>) -> Option<i64> {
    let value = value?;
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|v| v.is_finite() && v.abs() < 9.0e18)
            .map(|v| v.round() as i64)
    })
}
