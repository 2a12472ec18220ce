//! Room mirror: floor objects and wall items of the room the player is in.
//!
//! Content broadcasts replace a collection wholesale; single add/remove
//! notifications patch it. The bulk queue and the capture/validation reports
//! read from it.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::enrichment::Enricher;
use crate::inventory::{InventoryMirror, Summary};
use crate::item::{GroupKey, Item, ItemKind};

// ---------------------------------------------------------------------------
// Room objects
// ---------------------------------------------------------------------------

/// An object standing on the floor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloorObject {
    /// Server id.
    pub id: i64,
    /// Catalog class name.
    pub class: String,
    /// Colour/size descriptor, matching [`Item::variant`] of the same item in
    /// the inventory.
    pub variant: String,
    /// Tile X.
    pub x: i32,
    /// Tile Y.
    pub y: i32,
    /// Stack height.
    pub z: f64,
    /// Footprint width in tiles.
    pub width: u32,
    /// Footprint length in tiles.
    pub height: u32,
    /// Rotation (0-7).
    pub direction: u8,
    /// Owner name.
    pub owner: String,
}

/// An item hanging on a wall.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WallItem {
    /// Server id.
    pub id: i64,
    /// Catalog class name.
    pub class: String,
    /// Poster selection.
    pub variant: String,
    /// Wall location descriptor, opaque to the core.
    pub location: String,
    /// Owner name.
    pub owner: String,
}

/// Either kind of room object, resolved once when the event is decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RoomObject {
    /// Floor object.
    Floor(FloorObject),
    /// Wall item.
    Wall(WallItem),
}

impl RoomObject {
    /// Server id.
    pub fn id(&self) -> i64 {
        match self {
            RoomObject::Floor(obj) => obj.id,
            RoomObject::Wall(item) => item.id,
        }
    }

    /// Group key of the equivalent inventory item.
    pub fn group_key(&self) -> GroupKey {
        match self {
            RoomObject::Floor(obj) => GroupKey::new(&obj.class, ItemKind::Floor, &obj.variant),
            RoomObject::Wall(item) => GroupKey::new(&item.class, ItemKind::Wall, &item.variant),
        }
    }

    /// Where the object sits, in the form a placement request needs.
    pub fn placement(&self) -> Placement {
        match self {
            RoomObject::Floor(obj) => Placement::Floor {
                x: obj.x,
                y: obj.y,
                z: obj.z,
                width: obj.width,
                height: obj.height,
                direction: obj.direction,
            },
            RoomObject::Wall(item) => Placement::Wall {
                location: item.location.clone(),
            },
        }
    }

    /// Convert to an inventory item carrying `id`.
    pub fn into_item(self, id: i64) -> Item {
        match self {
            RoomObject::Floor(obj) => {
                Item::new(id, obj.class, ItemKind::Floor, obj.variant).with_owner(obj.owner)
            }
            RoomObject::Wall(item) => {
                Item::new(id, item.class, ItemKind::Wall, item.variant).with_owner(item.owner)
            }
        }
    }
}

/// A content broadcast. `None` leaves that collection untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoomContents {
    /// Full list of floor objects, if this broadcast carries them.
    pub floor: Option<Vec<FloorObject>>,
    /// Full list of wall items, if this broadcast carries them.
    pub wall: Option<Vec<WallItem>>,
}

/// Copy of the room taken under the lock, ordered by id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoomSnapshot {
    /// Floor objects.
    pub floor: Vec<FloorObject>,
    /// Wall items.
    pub wall: Vec<WallItem>,
}

impl RoomSnapshot {
    /// Total number of objects.
    pub fn len(&self) -> usize {
        self.floor.len() + self.wall.len()
    }

    /// Whether the room is empty.
    pub fn is_empty(&self) -> bool {
        self.floor.is_empty() && self.wall.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Capture
// ---------------------------------------------------------------------------

/// Position of a captured object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Placement {
    /// Floor geometry.
    Floor {
        /// Tile X.
        x: i32,
        /// Tile Y.
        y: i32,
        /// Stack height.
        z: f64,
        /// Footprint width.
        width: u32,
        /// Footprint length.
        height: u32,
        /// Rotation.
        direction: u8,
    },
    /// Wall slot.
    Wall {
        /// Wall location descriptor.
        location: String,
    },
}

/// One object of a captured layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureEntry {
    /// Group the placed item must belong to.
    pub key: GroupKey,
    /// Display name at capture time.
    pub name: String,
    /// Where it stood.
    pub placement: Placement,
}

/// A recorded room layout, replayable by the bulk queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoomCapture {
    /// Entries in replay order.
    pub entries: Vec<CaptureEntry>,
}

impl RoomCapture {
    /// Required count per group.
    pub fn histogram(&self) -> BTreeMap<GroupKey, usize> {
        let mut counts = BTreeMap::new();
        for entry in &self.entries {
            *counts.entry(entry.key.clone()).or_default() += 1;
        }
        counts
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Requirement of one group in a [`ValidationReport`].
#[derive(Debug, Clone, PartialEq)]
pub struct GroupRequirement {
    /// Group key.
    pub key: GroupKey,
    /// Display name.
    pub name: String,
    /// Items the capture needs.
    pub required: usize,
    /// Items the inventory can supply.
    pub available: usize,
}

impl GroupRequirement {
    /// How many are missing.
    pub fn shortfall(&self) -> usize {
        self.required.saturating_sub(self.available)
    }
}

/// Result of comparing a capture against the inventory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    /// Every group of the capture, ordered by key.
    pub groups: Vec<GroupRequirement>,
}

impl ValidationReport {
    /// Groups the inventory cannot fully supply.
    pub fn shortfalls(&self) -> impl Iterator<Item = &GroupRequirement> {
        self.groups.iter().filter(|g| g.shortfall() > 0)
    }

    /// `true` when the capture can be replicated in full.
    pub fn is_satisfied(&self) -> bool {
        self.shortfalls().next().is_none()
    }
}

// ---------------------------------------------------------------------------
// RoomMirror
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RoomState {
    floor: HashMap<i64, FloorObject>,
    wall: HashMap<i64, WallItem>,
}

impl RoomState {
    fn snapshot(&self) -> RoomSnapshot {
        let mut floor: Vec<FloorObject> = self.floor.values().cloned().collect();
        floor.sort_by_key(|obj| obj.id);
        let mut wall: Vec<WallItem> = self.wall.values().cloned().collect();
        wall.sort_by_key(|item| item.id);
        RoomSnapshot { floor, wall }
    }
}

/// Lock-guarded mirror of the current room.
#[derive(Default)]
pub struct RoomMirror {
    state: Mutex<RoomState>,
}

impl RoomMirror {
    /// Create an empty room mirror.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a content broadcast and return the new snapshot.
    pub fn load(&self, contents: RoomContents) -> RoomSnapshot {
        let mut state = self.state.lock();
        if let Some(floor) = contents.floor {
            state.floor = floor.into_iter().map(|obj| (obj.id, obj)).collect();
        }
        if let Some(wall) = contents.wall {
            state.wall = wall.into_iter().map(|item| (item.id, item)).collect();
        }
        state.snapshot()
    }

    /// Add or replace a single object.
    pub fn insert(&self, object: RoomObject) {
        let mut state = self.state.lock();
        match object {
            RoomObject::Floor(obj) => {
                state.floor.insert(obj.id, obj);
            }
            RoomObject::Wall(item) => {
                state.wall.insert(item.id, item);
            }
        }
    }

    /// Remove an object by id from whichever collection holds it.
    pub fn remove(&self, id: i64) -> bool {
        self.take(id).is_some()
    }

    /// Remove and return an object. Floor objects are checked first.
    pub fn take(&self, id: i64) -> Option<RoomObject> {
        self.take_with(id, |_| ()).map(|(object, ())| object)
    }

    /// Remove an object and run `then` while the room lock is still held.
    ///
    /// The pickup path uses this to move the object into the inventory mirror
    /// without a window where it exists in neither.
    pub fn take_with<R>(
        &self,
        id: i64,
        then: impl FnOnce(&RoomObject) -> R,
    ) -> Option<(RoomObject, R)> {
        let mut state = self.state.lock();
        let object = if let Some(obj) = state.floor.remove(&id) {
            RoomObject::Floor(obj)
        } else if let Some(item) = state.wall.remove(&id) {
            RoomObject::Wall(item)
        } else {
            return None;
        };
        let result = then(&object);
        Some((object, result))
    }

    /// Whether an object with this id is present.
    pub fn contains(&self, id: i64) -> bool {
        let state = self.state.lock();
        state.floor.contains_key(&id) || state.wall.contains_key(&id)
    }

    /// Current contents.
    pub fn snapshot(&self) -> RoomSnapshot {
        self.state.lock().snapshot()
    }

    /// Forget the room.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.floor.clear();
        state.wall.clear();
    }

    /// Wealth summary of the room.
    pub fn summary(&self, enricher: &dyn Enricher) -> Summary {
        let mut counts: BTreeMap<GroupKey, usize> = BTreeMap::new();
        for object in self.objects() {
            *counts.entry(object.group_key()).or_default() += 1;
        }
        Summary::from_counts(counts, enricher)
    }

    /// Record the layout: floor objects then wall items, each by id.
    pub fn capture(&self, enricher: &dyn Enricher) -> RoomCapture {
        let mut names: HashMap<GroupKey, String> = HashMap::new();
        let entries = self
            .objects()
            .into_iter()
            .map(|object| {
                let key = object.group_key();
                let name = names
                    .entry(key.clone())
                    .or_insert_with(|| enricher.describe(&key).name)
                    .clone();
                CaptureEntry {
                    key,
                    name,
                    placement: object.placement(),
                }
            })
            .collect();
        RoomCapture { entries }
    }

    fn objects(&self) -> Vec<RoomObject> {
        let snapshot = self.snapshot();
        snapshot
            .floor
            .into_iter()
            .map(RoomObject::Floor)
            .chain(snapshot.wall.into_iter().map(RoomObject::Wall))
            .collect()
    }
}

/// Compare what a capture needs with what the inventory can place.
///
/// Only confirmed items that are not on the trade table count as available,
/// since those are the only ones replication will use.
pub fn validate(capture: &RoomCapture, inventory: &InventoryMirror) -> ValidationReport {
    let mut names: HashMap<&GroupKey, &str> = HashMap::new();
    for entry in &capture.entries {
        names.entry(&entry.key).or_insert(&entry.name);
    }
    let groups = capture
        .histogram()
        .into_iter()
        .map(|(key, required)| {
            let available = inventory.count_available(&key);
            let name = names.get(&key).map(|n| n.to_string()).unwrap_or_default();
            GroupRequirement {
                key,
                name,
                required,
                available,
            }
        })
        .collect();
    ValidationReport { groups }
}
