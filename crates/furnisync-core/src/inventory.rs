//! Inventory mirror: the single lock-guarded source of truth for owned items.
//!
//! Every mutation recomputes the [`Summary`] inside the same critical section,
//! so a reader never sees a summary that disagrees with the item map it was
//! derived from.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::enrichment::Enricher;
use crate::item::{GroupKey, Item};

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

/// Aggregate of one group within a [`Summary`].
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSummary {
    /// Display name from the enricher.
    pub name: String,
    /// Number of items in the group.
    pub quantity: usize,
    /// Value of a single item.
    pub unit_value: f64,
}

/// Derived projection of a set of items.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summary {
    /// Number of items.
    pub total_items: usize,
    /// Number of distinct group keys.
    pub distinct_groups: usize,
    /// Sum of every item's unit value.
    pub total_value: f64,
    /// Per-group quantities and values, ordered by key.
    pub groups: BTreeMap<GroupKey, GroupSummary>,
}

impl Summary {
    /// Compute a summary over `items`.
    pub fn compute<'a, I>(items: I, enricher: &dyn Enricher) -> Self
    where
        I: IntoIterator<Item = &'a Item>,
    {
        let mut counts: BTreeMap<GroupKey, usize> = BTreeMap::new();
        for item in items {
            *counts.entry(item.group_key()).or_default() += 1;
        }
        Self::from_counts(counts, enricher)
    }

    /// Compute a summary from per-group counts.
    pub fn from_counts(counts: BTreeMap<GroupKey, usize>, enricher: &dyn Enricher) -> Self {
        let mut summary = Summary::default();
        for (key, quantity) in counts {
            let enrichment = enricher.describe(&key);
            summary.total_items += quantity;
            summary.total_value += enrichment.value * quantity as f64;
            summary.groups.insert(
                key,
                GroupSummary {
                    name: enrichment.name,
                    quantity,
                    unit_value: enrichment.value,
                },
            );
        }
        summary.distinct_groups = summary.groups.len();
        summary
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total unique items: {}", self.distinct_groups)?;
        writeln!(f, "Total items: {}", self.total_items)?;
        writeln!(f, "Total wealth: {:.2} HC", self.total_value)?;
        writeln!(f, "------------------")?;
        for group in self.groups.values() {
            writeln!(
                f,
                "{}: {} ({:.2} HC)",
                group.name, group.quantity, group.unit_value
            )?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// Items sharing one group key.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemGroup {
    /// The shared key.
    pub key: GroupKey,
    /// Display name.
    pub name: String,
    /// Value of one item.
    pub unit_value: f64,
    /// Members, ordered by id.
    pub items: Vec<Item>,
}

impl ItemGroup {
    /// Number of items in the group.
    pub fn quantity(&self) -> usize {
        self.items.len()
    }
}

/// Consistent copy of the mirror taken inside one critical section.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InventorySnapshot {
    /// Items ordered by id.
    pub items: Vec<Item>,
    /// Summary of exactly these items.
    pub summary: Summary,
}

// ---------------------------------------------------------------------------
// InventoryMirror
// ---------------------------------------------------------------------------

struct MirrorState {
    items: HashMap<i64, Item>,
    in_trade: HashSet<i64>,
    summary: Summary,
}

impl MirrorState {
    fn recompute(&mut self, enricher: &dyn Enricher) {
        self.summary = Summary::compute(self.items.values(), enricher);
    }

    fn snapshot(&self) -> InventorySnapshot {
        let mut items: Vec<Item> = self.items.values().cloned().collect();
        items.sort_by_key(|item| item.id);
        InventorySnapshot {
            items,
            summary: self.summary.clone(),
        }
    }
}

/// Lock-guarded mirror of the player's inventory.
pub struct InventoryMirror {
    state: Mutex<MirrorState>,
    enricher: Arc<dyn Enricher>,
}

impl InventoryMirror {
    /// Create an empty mirror valuing items with `enricher`.
    pub fn new(enricher: Arc<dyn Enricher>) -> Self {
        Self {
            state: Mutex::new(MirrorState {
                items: HashMap::new(),
                in_trade: HashSet::new(),
                summary: Summary::default(),
            }),
            enricher,
        }
    }

    /// The enricher used for summaries.
    pub fn enricher(&self) -> &Arc<dyn Enricher> {
        &self.enricher
    }

    /// Insert or replace the item at its id. Returns `false` when an identical
    /// item was already present.
    pub fn upsert(&self, item: Item) -> bool {
        let mut state = self.state.lock();
        if state.items.get(&item.id) == Some(&item) {
            return false;
        }
        state.items.insert(item.id, item);
        state.recompute(self.enricher.as_ref());
        true
    }

    /// Upsert a batch under one critical section and return the resulting
    /// snapshot, taken before the lock is released.
    pub fn upsert_all(&self, items: impl IntoIterator<Item = Item>) -> InventorySnapshot {
        let mut state = self.state.lock();
        for item in items {
            state.items.insert(item.id, item);
        }
        state.recompute(self.enricher.as_ref());
        state.snapshot()
    }

    /// Remove an item. Absent ids are ignored.
    pub fn remove(&self, id: i64) -> Option<Item> {
        let mut state = self.state.lock();
        let removed = state.items.remove(&id)?;
        state.in_trade.remove(&id);
        state.recompute(self.enricher.as_ref());
        Some(removed)
    }

    /// Drop every item whose id is not in `keep`. Returns the number removed.
    pub fn retain_ids(&self, keep: &HashSet<i64>) -> usize {
        let mut state = self.state.lock();
        let before = state.items.len();
        state.items.retain(|id, _| keep.contains(id));
        let removed = before - state.items.len();
        if removed > 0 {
            let MirrorState {
                items, in_trade, ..
            } = &mut *state;
            in_trade.retain(|id| items.contains_key(id));
            state.recompute(self.enricher.as_ref());
        }
        removed
    }

    /// Set or clear the in-trade flag. Setting the flag on an absent item
    /// is refused and returns `false`.
    pub fn mark_in_trade(&self, id: i64, in_trade: bool) -> bool {
        let mut state = self.state.lock();
        if !in_trade {
            return state.in_trade.remove(&id);
        }
        if !state.items.contains_key(&id) {
            return false;
        }
        state.in_trade.insert(id)
    }

    /// Replace the whole in-trade set; ids without an item are dropped.
    pub fn set_in_trade(&self, ids: impl IntoIterator<Item = i64>) {
        let mut state = self.state.lock();
        let MirrorState {
            items, in_trade, ..
        } = &mut *state;
        in_trade.clear();
        in_trade.extend(ids.into_iter().filter(|id| items.contains_key(id)));
    }

    /// Clear every in-trade flag.
    pub fn clear_in_trade(&self) {
        self.state.lock().in_trade.clear();
    }

    /// Whether the item is currently on the trade table.
    pub fn is_in_trade(&self, id: i64) -> bool {
        self.state.lock().in_trade.contains(&id)
    }

    /// Look up an item by id.
    pub fn get(&self, id: i64) -> Option<Item> {
        self.state.lock().items.get(&id).cloned()
    }

    /// Whether the item exists.
    pub fn contains(&self, id: i64) -> bool {
        self.state.lock().items.contains_key(&id)
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Whether the mirror holds no items.
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// Current summary.
    pub fn summary(&self) -> Summary {
        self.state.lock().summary.clone()
    }

    /// Items and summary from one critical section.
    pub fn snapshot(&self) -> InventorySnapshot {
        self.state.lock().snapshot()
    }

    /// Items bucketed by group key, ordered by key.
    pub fn grouped_view(&self) -> Vec<ItemGroup> {
        let state = self.state.lock();
        let mut buckets: BTreeMap<GroupKey, Vec<Item>> = BTreeMap::new();
        for item in state.items.values() {
            buckets.entry(item.group_key()).or_default().push(item.clone());
        }
        buckets
            .into_iter()
            .map(|(key, mut items)| {
                items.sort_by_key(|item| item.id);
                let (name, unit_value) = state
                    .summary
                    .groups
                    .get(&key)
                    .map(|g| (g.name.clone(), g.unit_value))
                    .unwrap_or_else(|| (key.class.clone(), 0.0));
                ItemGroup {
                    key,
                    name,
                    unit_value,
                    items,
                }
            })
            .collect()
    }

    /// Number of confirmed, not-in-trade items of a group.
    pub fn count_available(&self, key: &GroupKey) -> usize {
        let state = self.state.lock();
        state
            .items
            .values()
            .filter(|item| is_available(item, key, &state.in_trade))
            .count()
    }

    /// Find one confirmed, not-in-trade item of the group (lowest id).
    pub fn find_available(&self, key: &GroupKey) -> Option<Item> {
        let state = self.state.lock();
        state
            .items
            .values()
            .filter(|item| is_available(item, key, &state.in_trade))
            .min_by_key(|item| item.id)
            .cloned()
    }

    /// Remove and return one confirmed, not-in-trade item of the group
    /// (lowest id).
    pub fn take_matching(&self, key: &GroupKey) -> Option<Item> {
        let mut state = self.state.lock();
        let id = state
            .items
            .values()
            .filter(|item| is_available(item, key, &state.in_trade))
            .map(|item| item.id)
            .min()?;
        let item = state.items.remove(&id);
        state.recompute(self.enricher.as_ref());
        item
    }

    /// Reconcile a completed trade in one critical section: drop `gave`,
    /// insert `received`, clear every in-trade flag.
    pub fn apply_trade(&self, gave: &[i64], received: Vec<Item>) -> InventorySnapshot {
        let mut state = self.state.lock();
        for id in gave {
            state.items.remove(id);
        }
        for item in received {
            state.items.insert(item.id, item);
        }
        state.in_trade.clear();
        state.recompute(self.enricher.as_ref());
        state.snapshot()
    }

    /// Remove everything.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.items.clear();
        state.in_trade.clear();
        state.summary = Summary::default();
    }
}

fn is_available(item: &Item, key: &GroupKey, in_trade: &HashSet<i64>) -> bool {
    item.is_confirmed()
        && !in_trade.contains(&item.id)
        && item.class == key.class
        && item.kind == key.kind
        && item.variant == key.variant
}
