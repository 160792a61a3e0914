//! In-process entry store keyed by (layer, namespace, key).
//!
//! Each slot has its own mutex and the slot map lock is only held to look up,
//! insert or remove a slot. Locks are always taken in the order
//! map -> slot -> index, and the map lock is never held while waiting on a
//! slot.

use crate::error::MemoryError;
use crate::index::{self, SearchHit, SearchIndex, SearchQuery};
use crate::layer::LayerPolicy;
use crate::model::{
    ContextEntry, ContextScope, EntryKey, MemoryLayer, ScopeIds, StoreReceipt, StoreRequest,
};
use crate::scope::{Namespace, resolve, resolve_chain};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Receives every committed mutation, in per-key order.
///
/// Called while the slot lock is held, so implementations must not block.
pub trait ChangeSink: Send + Sync {
    fn upserted(&self, entry: &ContextEntry);
    fn removed(&self, key: &EntryKey);
}

/// Point-in-time counters for the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_entries: usize,
    pub entries_by_layer: BTreeMap<MemoryLayer, usize>,
    pub entries_by_scope: BTreeMap<ContextScope, usize>,
    /// Entries removed because their TTL elapsed (lazily or by sweep).
    pub expired_evictions: BTreeMap<MemoryLayer, u64>,
    pub capacity_evictions: u64,
    pub writes: u64,
    pub reads: u64,
    pub hits: u64,
    pub misses: u64,
}

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub removed: usize,
    pub removed_by_layer: BTreeMap<MemoryLayer, usize>,
}

struct Slot {
    entry: ContextEntry,
    /// Set once the slot is unlinked; writers that raced the removal retry.
    retired: bool,
}

type SlotRef = Arc<Mutex<Slot>>;

#[derive(Default)]
struct Counters {
    writes: AtomicU64,
    reads: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    capacity_evictions: AtomicU64,
    expired: [AtomicU64; 5],
}

/// Why a slot is being unlinked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Removal {
    Expired,
    Deleted,
    Capacity,
}

/// Layered context store with a secondary search index.
pub struct EntryStore {
    slots: RwLock<HashMap<EntryKey, SlotRef>>,
    index: Mutex<SearchIndex>,
    policy: LayerPolicy,
    max_entries: Option<usize>,
    /// Serializes capacity enforcement so concurrent writers do not over-evict.
    capacity_lock: Mutex<()>,
    counters: Counters,
    sink: Option<Arc<dyn ChangeSink>>,
}

impl Default for EntryStore {
    fn default() -> Self {
        Self::new(LayerPolicy::default())
    }
}

impl EntryStore {
    pub fn new(policy: LayerPolicy) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            index: Mutex::new(SearchIndex::new()),
            policy,
            max_entries: None,
            capacity_lock: Mutex::new(()),
            counters: Counters::default(),
            sink: None,
        }
    }

    /// Cap the number of stored entries; permanent entries are never evicted.
    pub fn with_max_entries(mut self, max_entries: Option<usize>) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ChangeSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn policy(&self) -> &LayerPolicy {
        &self.policy
    }

    /// Write an entry, overwriting any live entry at the same address.
    pub fn store(&self, request: StoreRequest) -> Result<StoreReceipt, MemoryError> {
        request.validate()?;
        let namespace = resolve(request.scope, &request.ids)?;
        let key = EntryKey::new(request.layer, namespace, request.key.clone());

        loop {
            let existing = self.slot(&key);
            let receipt = match existing {
                Some(slot) => {
                    let mut guard = slot.lock();
                    if guard.retired {
                        continue;
                    }
                    let now = Utc::now();
                    let previous = if guard.entry.is_expired(now) {
                        self.count_expired(key.layer);
                        None
                    } else {
                        Some(&guard.entry)
                    };
                    self.check_version(&key, &request, previous)?;
                    let entry = self.build_entry(&request, previous, now);
                    let receipt = receipt_for(&key, &entry);
                    self.index.lock().upsert(&key, &entry);
                    self.notify_upsert(&entry);
                    guard.entry = entry;
                    receipt
                }
                None => {
                    let mut slots = self.slots.write();
                    if slots.contains_key(&key) {
                        continue;
                    }
                    self.check_version(&key, &request, None)?;
                    let entry = self.build_entry(&request, None, Utc::now());
                    let receipt = receipt_for(&key, &entry);
                    self.index.lock().upsert(&key, &entry);
                    self.notify_upsert(&entry);
                    slots.insert(
                        key.clone(),
                        Arc::new(Mutex::new(Slot {
                            entry,
                            retired: false,
                        })),
                    );
                    receipt
                }
            };

            self.counters.writes.fetch_add(1, Ordering::Relaxed);
            debug!(
                "stored context entry (namespace={}, key={}, layer={}, version={})",
                key.namespace, key.key, key.layer, receipt.sync_version
            );
            self.enforce_capacity(&key);
            return Ok(receipt);
        }
    }

    /// Look the key up from the fastest layer to the slowest; the first live
    /// hit wins and its access count is incremented.
    pub fn retrieve(
        &self,
        key: &str,
        scope: ContextScope,
        ids: &ScopeIds,
    ) -> Result<ContextEntry, MemoryError> {
        let namespace = resolve(scope, ids)?;
        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        if let Some(entry) = self.lookup_layers(&namespace, key) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(entry);
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        debug!(
            "context entry not found (namespace={}, key={})",
            namespace, key
        );
        Err(MemoryError::NotFound {
            namespace: namespace.to_string(),
            key: key.to_string(),
        })
    }

    /// Like [`EntryStore::retrieve`], but tries each scope of an explicit
    /// chain in order and returns the first hit.
    pub fn retrieve_first(
        &self,
        key: &str,
        scopes: &[ContextScope],
        ids: &ScopeIds,
    ) -> Result<ContextEntry, MemoryError> {
        let chain = resolve_chain(scopes, ids)?;
        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        for namespace in &chain {
            if let Some(entry) = self.lookup_layers(namespace, key) {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(entry);
            }
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        let namespace = chain
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        debug!(
            "context entry not found in scope chain (namespaces={}, key={})",
            namespace, key
        );
        Err(MemoryError::NotFound {
            namespace,
            key: key.to_string(),
        })
    }

    /// Keyword search over live entries narrowed by the index filters.
    pub fn search(&self, query: &SearchQuery) -> Vec<SearchHit> {
        let keywords = query.keywords();
        // Index lock is released before any slot is touched.
        let candidates = self.index.lock().candidates(&query.filter);
        let now = Utc::now();
        let mut hits = Vec::new();
        for key in candidates {
            let Some(slot) = self.slot(&key) else {
                continue;
            };
            let guard = slot.lock();
            if guard.retired {
                continue;
            }
            if guard.entry.is_expired(now) {
                self.retire(&key, &slot, guard, Removal::Expired);
                continue;
            }
            if let Some(score) = index::score(&guard.entry, &keywords) {
                hits.push(SearchHit {
                    namespace: key.namespace.to_string(),
                    score,
                    entry: guard.entry.clone(),
                });
            }
        }
        index::rank(&mut hits, query.limit);
        debug!(
            "searched context entries (query={:?}, hits={})",
            query.query,
            hits.len()
        );
        hits
    }

    /// Remove the key from one layer, or from every layer when `layer` is
    /// `None`. Returns how many live entries were removed.
    pub fn delete(
        &self,
        key: &str,
        scope: ContextScope,
        ids: &ScopeIds,
        layer: Option<MemoryLayer>,
    ) -> Result<usize, MemoryError> {
        let namespace = resolve(scope, ids)?;
        let layers: Vec<MemoryLayer> = match layer {
            Some(layer) => vec![layer],
            None => MemoryLayer::ALL.to_vec(),
        };
        let now = Utc::now();
        let mut removed = 0;
        for layer in layers {
            let entry_key = EntryKey::new(layer, namespace.clone(), key);
            let Some(slot) = self.slot(&entry_key) else {
                continue;
            };
            let guard = slot.lock();
            if guard.retired {
                continue;
            }
            if guard.entry.is_expired(now) {
                self.retire(&entry_key, &slot, guard, Removal::Expired);
            } else {
                self.retire(&entry_key, &slot, guard, Removal::Deleted);
                removed += 1;
            }
        }
        if removed == 0 {
            debug!(
                "delete found no live entry (namespace={}, key={})",
                namespace, key
            );
            return Err(MemoryError::NotFound {
                namespace: namespace.to_string(),
                key: key.to_string(),
            });
        }
        info!(
            "deleted context entry (namespace={}, key={}, removed={})",
            namespace, key, removed
        );
        Ok(removed)
    }

    /// Live entries of one namespace, restricted to `layers` (all when empty),
    /// ordered by layer then key. Access counts are not touched.
    pub fn list_namespace(
        &self,
        scope: ContextScope,
        ids: &ScopeIds,
        layers: &[MemoryLayer],
    ) -> Result<Vec<ContextEntry>, MemoryError> {
        let namespace = resolve(scope, ids)?;
        let matching: Vec<(EntryKey, SlotRef)> = self
            .slots
            .read()
            .iter()
            .filter(|(key, _)| {
                key.namespace == namespace && (layers.is_empty() || layers.contains(&key.layer))
            })
            .map(|(key, slot)| (key.clone(), Arc::clone(slot)))
            .collect();

        let now = Utc::now();
        let mut entries = Vec::with_capacity(matching.len());
        for (key, slot) in matching {
            let guard = slot.lock();
            if guard.retired {
                continue;
            }
            if guard.entry.is_expired(now) {
                self.retire(&key, &slot, guard, Removal::Expired);
                continue;
            }
            entries.push(guard.entry.clone());
        }
        entries.sort_by(|a, b| a.layer.cmp(&b.layer).then_with(|| a.key.cmp(&b.key)));
        Ok(entries)
    }

    /// Remove every entry expired at `now`, except in the permanent layer.
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        for (key, slot) in self.snapshot() {
            if key.layer == MemoryLayer::Permanent {
                continue;
            }
            let guard = slot.lock();
            if guard.retired || !guard.entry.is_expired(now) {
                continue;
            }
            self.retire(&key, &slot, guard, Removal::Expired);
            report.removed += 1;
            *report.removed_by_layer.entry(key.layer).or_default() += 1;
        }
        if report.removed > 0 {
            info!("swept expired context entries (removed={})", report.removed);
        }
        report
    }

    /// Load entries recovered from persistence. Expired or malformed entries
    /// are skipped, and the change sink is not notified.
    pub fn hydrate(&self, entries: Vec<ContextEntry>) -> usize {
        let now = Utc::now();
        let mut loaded = 0;
        let mut slots = self.slots.write();
        let mut index = self.index.lock();
        for entry in entries {
            if entry.is_expired(now) {
                continue;
            }
            let namespace = match resolve(entry.scope, &entry.ids) {
                Ok(namespace) => namespace,
                Err(err) => {
                    warn!(
                        "skipping persisted entry (key={}, layer={}, error={})",
                        entry.key, entry.layer, err
                    );
                    continue;
                }
            };
            let key = EntryKey::new(entry.layer, namespace, entry.key.clone());
            index.upsert(&key, &entry);
            slots.insert(
                key,
                Arc::new(Mutex::new(Slot {
                    entry,
                    retired: false,
                })),
            );
            loaded += 1;
        }
        loaded
    }

    pub fn stats(&self) -> StoreStats {
        let now = Utc::now();
        let mut stats = StoreStats {
            entries_by_layer: MemoryLayer::ALL.into_iter().map(|layer| (layer, 0)).collect(),
            entries_by_scope: ContextScope::ALL.into_iter().map(|scope| (scope, 0)).collect(),
            expired_evictions: MemoryLayer::ALL
                .into_iter()
                .map(|layer| {
                    let count = self.counters.expired[layer.ordinal()].load(Ordering::Relaxed);
                    (layer, count)
                })
                .collect(),
            capacity_evictions: self.counters.capacity_evictions.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            reads: self.counters.reads.load(Ordering::Relaxed),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            ..StoreStats::default()
        };
        for (key, slot) in self.snapshot() {
            let guard = slot.lock();
            if guard.retired || guard.entry.is_expired(now) {
                continue;
            }
            stats.total_entries += 1;
            *stats.entries_by_layer.entry(key.layer).or_default() += 1;
            *stats.entries_by_scope.entry(key.namespace.scope).or_default() += 1;
        }
        stats
    }

    fn slot(&self, key: &EntryKey) -> Option<SlotRef> {
        self.slots.read().get(key).cloned()
    }

    fn snapshot(&self) -> Vec<(EntryKey, SlotRef)> {
        self.slots
            .read()
            .iter()
            .map(|(key, slot)| (key.clone(), Arc::clone(slot)))
            .collect()
    }

    fn lookup_layers(&self, namespace: &Namespace, key: &str) -> Option<ContextEntry> {
        let now = Utc::now();
        for layer in MemoryLayer::ALL {
            let entry_key = EntryKey::new(layer, namespace.clone(), key);
            let Some(slot) = self.slot(&entry_key) else {
                continue;
            };
            let mut guard = slot.lock();
            if guard.retired {
                continue;
            }
            if guard.entry.is_expired(now) {
                self.retire(&entry_key, &slot, guard, Removal::Expired);
                continue;
            }
            guard.entry.access_count += 1;
            return Some(guard.entry.clone());
        }
        None
    }

    fn check_version(
        &self,
        key: &EntryKey,
        request: &StoreRequest,
        live: Option<&ContextEntry>,
    ) -> Result<(), MemoryError> {
        let Some(expected) = request.expected_version else {
            return Ok(());
        };
        let actual = live.map_or(0, |entry| entry.sync_version);
        if expected == actual {
            return Ok(());
        }
        warn!(
            "rejected stale write (namespace={}, key={}, layer={}, expected={}, actual={})",
            key.namespace, key.key, key.layer, expected, actual
        );
        Err(MemoryError::Conflict {
            namespace: key.namespace.to_string(),
            key: key.key.clone(),
            expected,
            actual,
        })
    }

    fn build_entry(
        &self,
        request: &StoreRequest,
        previous: Option<&ContextEntry>,
        now: DateTime<Utc>,
    ) -> ContextEntry {
        let (entry_id, created_at, access_count, sync_version) = match previous {
            Some(previous) => (
                previous.entry_id,
                previous.created_at,
                previous.access_count,
                previous.sync_version + 1,
            ),
            None => (Uuid::new_v4(), now, 0, 1),
        };
        ContextEntry {
            entry_id,
            key: request.key.clone(),
            value: request.value.clone(),
            layer: request.layer,
            scope: request.scope,
            priority: request.priority,
            category: request.category.clone(),
            source: request.source.clone(),
            ids: request.ids.clone(),
            metadata: request.metadata.clone(),
            created_at,
            updated_at: now,
            expires_at: self
                .policy
                .expires_at(request.layer, now, request.expires_in_seconds),
            access_count,
            sync_version,
        }
    }

    /// Unlink a slot whose guard is held by the caller.
    fn retire(
        &self,
        key: &EntryKey,
        slot: &SlotRef,
        mut guard: MutexGuard<'_, Slot>,
        why: Removal,
    ) {
        guard.retired = true;
        self.index.lock().remove(key);
        if let Some(sink) = &self.sink {
            sink.removed(key);
        }
        drop(guard);

        match why {
            Removal::Expired => {
                self.count_expired(key.layer);
                debug!(
                    "evicted expired context entry (namespace={}, key={}, layer={})",
                    key.namespace, key.key, key.layer
                );
            }
            Removal::Capacity => {
                self.counters
                    .capacity_evictions
                    .fetch_add(1, Ordering::Relaxed);
                info!(
                    "evicted context entry for capacity (namespace={}, key={}, layer={})",
                    key.namespace, key.key, key.layer
                );
            }
            Removal::Deleted => {}
        }

        let mut slots = self.slots.write();
        if slots
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            slots.remove(key);
        }
    }

    fn count_expired(&self, layer: MemoryLayer) {
        self.counters.expired[layer.ordinal()].fetch_add(1, Ordering::Relaxed);
    }

    fn notify_upsert(&self, entry: &ContextEntry) {
        if let Some(sink) = &self.sink {
            sink.upserted(entry);
        }
    }

    /// Evict lowest priority, then least recently updated, non-permanent
    /// entries until the store fits `max_entries`. `keep` is never evicted.
    fn enforce_capacity(&self, keep: &EntryKey) {
        let Some(max_entries) = self.max_entries else {
            return;
        };
        if self.slots.read().len() <= max_entries {
            return;
        }
        let _capacity = self.capacity_lock.lock();

        let now = Utc::now();
        let mut live = 0usize;
        let mut victims = Vec::new();
        for (key, slot) in self.snapshot() {
            let guard = slot.lock();
            if guard.retired {
                continue;
            }
            if guard.entry.is_expired(now) {
                self.retire(&key, &slot, guard, Removal::Expired);
                continue;
            }
            live += 1;
            if key.layer != MemoryLayer::Permanent && key != *keep {
                victims.push((
                    guard.entry.priority.weight(),
                    guard.entry.updated_at,
                    key,
                    Arc::clone(&slot),
                ));
            }
        }
        if live <= max_entries {
            return;
        }

        victims.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        let mut excess = live - max_entries;
        for (_, _, key, slot) in victims {
            if excess == 0 {
                break;
            }
            let guard = slot.lock();
            if guard.retired {
                continue;
            }
            self.retire(&key, &slot, guard, Removal::Capacity);
            excess -= 1;
        }
        if excess > 0 {
            warn!(
                "store over capacity with no evictable entries (max_entries={}, excess={})",
                max_entries, excess
            );
        }
    }
}

fn receipt_for(key: &EntryKey, entry: &ContextEntry) -> StoreReceipt {
    StoreReceipt {
        entry_id: entry.entry_id,
        key: entry.key.clone(),
        namespace: key.namespace.to_string(),
        layer: entry.layer,
        scope: entry.scope,
        sync_version: entry.sync_version,
        created_at: entry.created_at,
        updated_at: entry.updated_at,
        expires_at: entry.expires_at,
    }
}
