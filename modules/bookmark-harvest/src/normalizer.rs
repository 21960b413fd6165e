//! Raw scraped items → canonical [`BookmarkRecord`]s.
//!
//! Pure functions only. The DOM scraper and the various API surfaces disagree
//! on key names, so every field is looked up under a handful of aliases.
//! Counters never fail to parse and timestamps are never dropped: anything
//! unreadable becomes `0` or [`Timestamp::Raw`] respectively.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;

use bookmark_common::{normalize_id, Author, BookmarkRecord, NormalizationError, RawItem, Timestamp};

const PERMALINK_BASE: &str = "https://x.com";

static STATUS_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/status(?:es)?/(\d+)").unwrap());

const ID_KEYS: &[&str] = &["id", "tweetId", "rest_id", "statusId"];
const TEXT_KEYS: &[&str] = &["text", "fullText", "full_text", "content"];
const URL_KEYS: &[&str] = &["url", "permalink", "link"];
const CREATED_KEYS: &[&str] = &["createdAt", "created_at", "timestamp", "time", "datetime"];
const HANDLE_KEYS: &[&str] = &["authorHandle", "handle", "username", "screenName"];
const NAME_KEYS: &[&str] = &["authorName", "displayName"];

/// Top-level counter keys and the metric name each one lands under.
const METRIC_KEYS: &[(&str, &str)] = &[
    ("likes", "likes"),
    ("likeCount", "likes"),
    ("retweets", "retweets"),
    ("retweetCount", "retweets"),
    ("replies", "replies"),
    ("replyCount", "replies"),
    ("views", "views"),
    ("viewCount", "views"),
    ("bookmarks", "bookmarks"),
    ("bookmarkCount", "bookmarks"),
    ("quotes", "quotes"),
    ("quoteCount", "quotes"),
];

pub fn normalize(
    raw: &RawItem,
    extracted_at: DateTime<Utc>,
) -> Result<BookmarkRecord, NormalizationError> {
    let url = first_string(raw, URL_KEYS).map(|u| canonical_url(&u));
    let url_id = url.as_deref().and_then(id_from_url);

    let id = match first_string(raw, ID_KEYS).map(|id| normalize_id(&id)) {
        Some(id) if !id.is_empty() => {
            if let Some(ref derived) = url_id {
                if *derived != id {
                    tracing::warn!(id, url_id = %derived, "Permalink points at a different status");
                }
            }
            id
        }
        _ => url_id.ok_or(NormalizationError::MissingIdentity)?,
    };

    let text = first_string(raw, TEXT_KEYS)
        .map(|t| t.trim().to_string())
        .unwrap_or_default();
    let has_media = has_media(raw);
    if text.is_empty() && !has_media {
        return Err(NormalizationError::EmptyContent { id });
    }

    let created_at = CREATED_KEYS
        .iter()
        .find_map(|k| raw.get(*k))
        .and_then(parse_timestamp);

    Ok(BookmarkRecord {
        author: parse_author(raw, url.as_deref()),
        metrics: parse_metrics(raw),
        id,
        text,
        created_at,
        url,
        has_media,
        extracted_at,
    })
}

/// Status id embedded in a permalink (`.../status/<digits>`).
pub fn id_from_url(url: &str) -> Option<String> {
    STATUS_ID_RE
        .captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Parse a displayed or serialized counter. Never fails: garbage is 0.
pub fn parse_count(value: &Value) -> u64 {
    match value {
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                u
            } else if let Some(f) = n.as_f64() {
                clamp_count(f)
            } else {
                0
            }
        }
        Value::String(s) => parse_count_str(s),
        Value::Bool(_) | Value::Null | Value::Array(_) | Value::Object(_) => 0,
    }
}

fn parse_count_str(s: &str) -> u64 {
    let cleaned: String = s
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',')
        .collect();
    if cleaned.is_empty() {
        return 0;
    }

    let (number, multiplier) = match cleaned.chars().last().map(|c| c.to_ascii_uppercase()) {
        Some('K') => (&cleaned[..cleaned.len() - 1], 1_000.0),
        Some('M') => (&cleaned[..cleaned.len() - 1], 1_000_000.0),
        Some('B') => (&cleaned[..cleaned.len() - 1], 1_000_000_000.0),
        _ => (cleaned.as_str(), 1.0),
    };

    match number.parse::<f64>() {
        // "1.15K" is a rounded display value; don't let float error shave a unit off
        Ok(f) if multiplier > 1.0 => clamp_count((f * multiplier).round()),
        Ok(f) => clamp_count(f),
        Err(_) => 0,
    }
}

fn clamp_count(f: f64) -> u64 {
    if f.is_finite() && f > 0.0 {
        f.trunc() as u64
    } else {
        0
    }
}

/// Best-effort timestamp parse. `None` only for absent/empty values.
pub fn parse_timestamp(value: &Value) -> Option<Timestamp> {
    match value {
        Value::Null => None,
        Value::Number(n) => {
            let parsed = n.as_i64().and_then(from_epoch);
            Some(parsed.map_or_else(|| Timestamp::Raw(n.to_string()), Timestamp::Parsed))
        }
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            Some(parse_timestamp_str(s).map_or_else(|| Timestamp::Raw(s.to_string()), Timestamp::Parsed))
        }
        other => Some(Timestamp::Raw(other.to_string())),
    }
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Legacy API format: "Wed Oct 10 20:19:24 +0000 2018"
    if let Ok(dt) = DateTime::parse_from_str(s, "%a %b %d %H:%M:%S %z %Y") {
        return Some(dt.with_timezone(&Utc));
    }
    if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) {
        return s.parse::<i64>().ok().and_then(from_epoch);
    }
    None
}

/// Epoch seconds, or milliseconds when the value is too large to be seconds.
fn from_epoch(n: i64) -> Option<DateTime<Utc>> {
    if n.abs() >= 100_000_000_000 {
        DateTime::from_timestamp_millis(n)
    } else {
        DateTime::from_timestamp(n, 0)
    }
}

fn parse_metrics(raw: &RawItem) -> BTreeMap<String, u64> {
    let mut metrics = BTreeMap::new();

    if let Some(Value::Object(nested)) = raw.get("metrics") {
        for (name, value) in nested {
            metrics.insert(name.clone(), parse_count(value));
        }
    }

    for (key, name) in METRIC_KEYS {
        if let Some(value) = raw.get(*key) {
            metrics.insert((*name).to_string(), parse_count(value));
        }
    }

    metrics
}

fn has_media(raw: &RawItem) -> bool {
    for key in ["hasMedia", "has_media"] {
        if let Some(Value::Bool(b)) = raw.get(key) {
            return *b;
        }
    }
    matches!(raw.get("media"), Some(Value::Array(items)) if !items.is_empty())
}

fn parse_author(raw: &RawItem, url: Option<&str>) -> Author {
    let mut author = match raw.get("author") {
        Some(Value::Object(obj)) => Author {
            handle: first_string(obj, &["handle", "username", "screenName", "screen_name"])
                .map(|h| clean_handle(&h))
                .unwrap_or_default(),
            name: first_string(obj, &["name", "displayName"]),
        },
        Some(Value::String(s)) => split_author_line(s),
        _ => Author::default(),
    };

    if author.handle.is_empty() {
        author.handle = first_string(raw, HANDLE_KEYS)
            .map(|h| clean_handle(&h))
            .or_else(|| url.and_then(handle_from_url))
            .unwrap_or_default();
    }
    if author.name.is_none() {
        author.name = first_string(raw, NAME_KEYS);
    }
    author
}

/// "Ferris @rustlang" → name + handle; a bare word is a handle.
fn split_author_line(s: &str) -> Author {
    let s = s.trim();
    match s.rfind('@') {
        Some(at) => {
            let name = s[..at].trim();
            Author {
                handle: clean_handle(&s[at..]),
                name: (!name.is_empty()).then(|| name.to_string()),
            }
        }
        None => Author {
            handle: s.to_string(),
            name: None,
        },
    }
}

fn clean_handle(h: &str) -> String {
    h.trim()
        .trim_start_matches('@')
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_string()
}

fn handle_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let mut segments = parsed.path_segments()?;
    let first = segments.next()?;
    let second = segments.next()?;
    (second == "status" && !first.is_empty() && first != "i").then(|| first.to_string())
}

/// Absolute permalink without query string or fragment.
fn canonical_url(raw: &str) -> String {
    let raw = raw.trim();
    let parsed = if raw.starts_with('/') {
        url::Url::parse(PERMALINK_BASE).and_then(|base| base.join(raw))
    } else {
        url::Url::parse(raw)
    };

    match parsed {
        Ok(mut u) => {
            u.set_query(None);
            u.set_fragment(None);
            u.to_string()
        }
        Err(_) => raw.to_string(),
    }
}

/// First non-empty string (or number, stringified) under any of `keys`.
fn first_string(map: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match map.get(*k) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: Value) -> RawItem {
        match value {
            Value::Object(map) => map,
            _ => panic!("test item must be an object"),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn scraped_card_normalizes() {
        let item = raw(json!({
            "id": " 1790000000000000001 ",
            "text": "  Ownership, explained  ",
            "author": { "handle": "@rustlang", "name": "Rust Language" },
            "createdAt": "2024-05-13T15:04:05.000Z",
            "url": "https://x.com/rustlang/status/1790000000000000001?s=20",
            "metrics": { "likes": "1.2K", "replies": "34", "views": "1,024,000" },
            "hasMedia": false
        }));

        let record = normalize(&item, now()).unwrap();
        assert_eq!(record.id, "1790000000000000001");
        assert_eq!(record.text, "Ownership, explained");
        assert_eq!(record.author.handle, "rustlang");
        assert_eq!(record.author.name.as_deref(), Some("Rust Language"));
        assert_eq!(
            record.url.as_deref(),
            Some("https://x.com/rustlang/status/1790000000000000001")
        );
        assert_eq!(record.metrics["likes"], 1200);
        assert_eq!(record.metrics["replies"], 34);
        assert_eq!(record.metrics["views"], 1_024_000);
        assert!(matches!(record.created_at, Some(Timestamp::Parsed(_))));
    }

    #[test]
    fn missing_identifier_is_hard_error() {
        let item = raw(json!({ "text": "no id anywhere" }));
        assert_eq!(
            normalize(&item, now()),
            Err(NormalizationError::MissingIdentity)
        );
    }

    #[test]
    fn identifier_falls_back_to_permalink() {
        let item = raw(json!({ "text": "hi", "permalink": "/ferris/status/42" }));
        let record = normalize(&item, now()).unwrap();
        assert_eq!(record.id, "42");
        assert_eq!(record.url.as_deref(), Some("https://x.com/ferris/status/42"));
        assert_eq!(record.author.handle, "ferris");
    }

    #[test]
    fn empty_text_without_media_is_rejected() {
        let item = raw(json!({ "id": "7", "text": "   " }));
        assert_eq!(
            normalize(&item, now()),
            Err(NormalizationError::EmptyContent { id: "7".into() })
        );
    }

    #[test]
    fn media_only_item_is_accepted() {
        let item = raw(json!({ "id": 7, "media": [{ "type": "photo" }] }));
        let record = normalize(&item, now()).unwrap();
        assert_eq!(record.id, "7");
        assert!(record.has_media);
        assert!(record.text.is_empty());
    }

    #[test]
    fn counters_parse_permissively() {
        assert_eq!(parse_count(&json!(12)), 12);
        assert_eq!(parse_count(&json!(-3)), 0);
        assert_eq!(parse_count(&json!(4.9)), 4);
        assert_eq!(parse_count(&json!("3M")), 3_000_000);
        assert_eq!(parse_count(&json!("2.5k")), 2_500);
        assert_eq!(parse_count(&json!("n/a")), 0);
        assert_eq!(parse_count(&json!("")), 0);
        assert_eq!(parse_count(&json!(null)), 0);
        assert_eq!(parse_count(&json!({ "x": 1 })), 0);
    }

    #[test]
    fn top_level_counters_are_renamed() {
        let item = raw(json!({ "id": "1", "text": "t", "likeCount": 5, "retweets": "oops" }));
        let record = normalize(&item, now()).unwrap();
        assert_eq!(record.metrics["likes"], 5);
        assert_eq!(record.metrics["retweets"], 0);
    }

    #[test]
    fn unparsable_timestamp_is_kept_raw() {
        let item = raw(json!({ "id": "1", "text": "t", "time": "3h" }));
        let record = normalize(&item, now()).unwrap();
        assert_eq!(record.created_at, Some(Timestamp::Raw("3h".into())));
    }

    #[test]
    fn legacy_and_epoch_timestamps_parse() {
        let legacy = parse_timestamp(&json!("Wed Oct 10 20:19:24 +0000 2018")).unwrap();
        assert_eq!(
            legacy.parsed().unwrap().to_rfc3339(),
            "2018-10-10T20:19:24+00:00"
        );

        let millis = parse_timestamp(&json!(1_539_202_764_000i64)).unwrap();
        let secs = parse_timestamp(&json!(1_539_202_764)).unwrap();
        assert_eq!(millis, secs);
        assert!(parse_timestamp(&json!("")).is_none());
    }

    #[test]
    fn author_line_splits_name_and_handle() {
        let item = raw(json!({ "id": "1", "text": "t", "author": "Ferris the Crab @ferris" }));
        let record = normalize(&item, now()).unwrap();
        assert_eq!(record.author.handle, "ferris");
        assert_eq!(record.author.name.as_deref(), Some("Ferris the Crab"));
    }

    #[test]
    fn status_id_extraction() {
        assert_eq!(
            id_from_url("https://x.com/a/status/123/photo/1").as_deref(),
            Some("123")
        );
        assert_eq!(
            id_from_url("https://twitter.com/a/statuses/456").as_deref(),
            Some("456")
        );
        assert_eq!(id_from_url("https://x.com/a"), None);
    }
}
