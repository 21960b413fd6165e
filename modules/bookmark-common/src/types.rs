use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Unstructured key/value bag scraped from the page or returned by an API surface.
pub type RawItem = serde_json::Map<String, serde_json::Value>;

// --- Record Types ---

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    /// Handle without the leading `@`. Empty when the card carried none.
    pub handle: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// A creation time as captured. Unparsable values are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    Parsed(DateTime<Utc>),
    Raw(String),
}

impl Timestamp {
    pub fn parsed(&self) -> Option<DateTime<Utc>> {
        match self {
            Timestamp::Parsed(dt) => Some(*dt),
            Timestamp::Raw(_) => None,
        }
    }
}

/// One captured bookmark. `id` is the identity key: two records with the same
/// `id` are the same bookmark regardless of any other field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub author: Author,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub metrics: BTreeMap<String, u64>,
    #[serde(default)]
    pub has_media: bool,
    #[serde(default)]
    pub extracted_at: DateTime<Utc>,
}

impl BookmarkRecord {
    /// Stable content fingerprint. See [`fingerprint`].
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.id, &self.author.handle, self.url.as_deref())
    }
}

/// Persisted output: `{ timestamp, count, bookmarks }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookmarkDocument {
    pub timestamp: DateTime<Utc>,
    pub count: usize,
    pub bookmarks: Vec<BookmarkRecord>,
}

impl BookmarkDocument {
    pub fn new(bookmarks: Vec<BookmarkRecord>, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            count: bookmarks.len(),
            bookmarks,
        }
    }
}

// --- Identity ---

/// Canonical form of a source identifier.
pub fn normalize_id(id: &str) -> String {
    id.trim().to_string()
}

/// SHA-256 over normalized id, lowercased author handle and permalink.
/// Capture time, text and metrics do not participate, so two independent
/// captures of the same item produce the same value.
pub fn fingerprint(id: &str, author_handle: &str, url: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_id(id).as_bytes());
    hasher.update(b"\n");
    hasher.update(author_handle.trim().trim_start_matches('@').to_lowercase().as_bytes());
    hasher.update(b"\n");
    hasher.update(url.map(str::trim).unwrap_or_default().as_bytes());
    hex::encode(hasher.finalize())
}
