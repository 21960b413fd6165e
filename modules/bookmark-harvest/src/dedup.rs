//! Identity & dedup store.
//!
//! One identity scheme: the normalized source id. Records persisted before ids
//! were captured reliably are keyed by the permalink's status id, and failing
//! that by `legacy:<fingerprint>`. The index only ever grows within a run.

use std::collections::HashSet;

use bookmark_common::{normalize_id, BookmarkRecord};

use crate::normalizer::id_from_url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceptedResult {
    pub is_new: bool,
}

#[derive(Debug, Default)]
pub struct DedupStore {
    seen: HashSet<String>,
}

impl DedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store primed with the identities of previously persisted records.
    pub fn primed<'a>(records: impl IntoIterator<Item = &'a BookmarkRecord>) -> Self {
        let mut store = Self::new();
        for record in records {
            store.seen.insert(identity_key(record));
        }
        store
    }

    pub fn has(&self, id: &str) -> bool {
        self.seen.contains(&normalize_id(id))
    }

    /// Record `record` as seen. Returns `is_new = false` for anything already known.
    pub fn accept(&mut self, record: &BookmarkRecord) -> AcceptedResult {
        AcceptedResult {
            is_new: self.seen.insert(identity_key(record)),
        }
    }

    /// Stable content fingerprint (normalized id + author + url).
    pub fn hash(&self, record: &BookmarkRecord) -> String {
        record.fingerprint()
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Key a record is deduplicated under.
pub fn identity_key(record: &BookmarkRecord) -> String {
    let id = normalize_id(&record.id);
    if !id.is_empty() {
        return id;
    }
    match record.url.as_deref().and_then(id_from_url) {
        Some(url_id) => url_id,
        None => format!("legacy:{}", record.fingerprint()),
    }
}
