//! Secondary index over (category, layer, scope, tenant) and search ranking.

use crate::model::{ContextEntry, ContextScope, EntryKey, MemoryLayer};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Result limit applied when the caller does not pick one.
pub const DEFAULT_SEARCH_LIMIT: usize = 20;

/// Weight of a keyword found in the entry key.
const KEY_HIT: u32 = 2;
/// Weight of a keyword found only in the serialized value.
const VALUE_HIT: u32 = 1;

/// Optional narrowing filters for a search.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilter {
    pub scope: Option<ContextScope>,
    pub layer: Option<MemoryLayer>,
    pub category: Option<String>,
    pub tenant_id: Option<String>,
}

impl SearchFilter {
    fn admits(&self, bucket: &IndexKey) -> bool {
        self.scope.is_none_or(|scope| scope == bucket.scope)
            && self.layer.is_none_or(|layer| layer == bucket.layer)
            && self
                .category
                .as_deref()
                .is_none_or(|category| category == bucket.category)
            && self
                .tenant_id
                .as_deref()
                .is_none_or(|tenant| bucket.tenant_id.as_deref() == Some(tenant))
    }
}

/// Keyword search over live entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Whitespace-separated keywords; every keyword must match. Empty matches all.
    pub query: String,
    pub filter: SearchFilter,
    pub limit: usize,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            filter: SearchFilter::default(),
            limit: DEFAULT_SEARCH_LIMIT,
        }
    }

    pub fn with_scope(mut self, scope: ContextScope) -> Self {
        self.filter.scope = Some(scope);
        self
    }

    pub fn with_layer(mut self, layer: MemoryLayer) -> Self {
        self.filter.layer = Some(layer);
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.filter.category = Some(category.into());
        self
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.filter.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub(crate) fn keywords(&self) -> Vec<String> {
        self.query
            .split_whitespace()
            .map(str::to_lowercase)
            .collect()
    }
}

/// A ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub namespace: String,
    pub score: u32,
    pub entry: ContextEntry,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct IndexKey {
    category: String,
    layer: MemoryLayer,
    scope: ContextScope,
    tenant_id: Option<String>,
}

impl IndexKey {
    fn of(entry: &ContextEntry) -> Self {
        Self {
            category: entry.category.clone(),
            layer: entry.layer,
            scope: entry.scope,
            tenant_id: entry.ids.tenant_id.clone(),
        }
    }
}

/// Buckets of entry keys plus the reverse placement map used to move an
/// entry between buckets when it is overwritten.
#[derive(Debug, Default)]
pub struct SearchIndex {
    buckets: HashMap<IndexKey, HashSet<EntryKey>>,
    placements: HashMap<EntryKey, IndexKey>,
}

impl SearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.placements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.placements.is_empty()
    }

    pub fn contains(&self, key: &EntryKey) -> bool {
        self.placements.contains_key(key)
    }

    /// Insert or move `key` into the bucket described by `entry`.
    pub fn upsert(&mut self, key: &EntryKey, entry: &ContextEntry) {
        let target = IndexKey::of(entry);
        if let Some(current) = self.placements.get(key) {
            if *current == target {
                return;
            }
            let current = current.clone();
            self.detach(key, &current);
        }
        self.buckets
            .entry(target.clone())
            .or_default()
            .insert(key.clone());
        self.placements.insert(key.clone(), target);
    }

    /// Drop `key` from the index; returns whether it was present.
    pub fn remove(&mut self, key: &EntryKey) -> bool {
        let Some(bucket) = self.placements.remove(key) else {
            return false;
        };
        self.detach(key, &bucket);
        true
    }

    /// Entry keys whose bucket satisfies every filter that is set.
    pub fn candidates(&self, filter: &SearchFilter) -> Vec<EntryKey> {
        self.buckets
            .iter()
            .filter(|(bucket, _)| filter.admits(bucket))
            .flat_map(|(_, keys)| keys.iter().cloned())
            .collect()
    }

    fn detach(&mut self, key: &EntryKey, bucket: &IndexKey) {
        if let Some(keys) = self.buckets.get_mut(bucket) {
            keys.remove(key);
            if keys.is_empty() {
                self.buckets.remove(bucket);
            }
        }
    }
}

/// Score `entry` against lowercase keywords, or `None` if any keyword misses.
pub(crate) fn score(entry: &ContextEntry, keywords: &[String]) -> Option<u32> {
    if keywords.is_empty() {
        return Some(0);
    }
    let key = entry.key.to_lowercase();
    let value = entry.value.to_string().to_lowercase();
    keywords.iter().try_fold(0u32, |total, keyword| {
        if key.contains(keyword.as_str()) {
            Some(total + KEY_HIT)
        } else if value.contains(keyword.as_str()) {
            Some(total + VALUE_HIT)
        } else {
            None
        }
    })
}

/// Sort by score, then priority, then most recently updated; then truncate.
pub(crate) fn rank(hits: &mut Vec<SearchHit>, limit: usize) {
    hits.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| b.entry.priority.weight().cmp(&a.entry.priority.weight()))
            .then_with(|| b.entry.updated_at.cmp(&a.entry.updated_at))
            .then_with(|| a.entry.key.cmp(&b.entry.key))
    });
    hits.truncate(limit);
}
