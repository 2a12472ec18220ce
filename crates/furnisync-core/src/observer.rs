//! Notifications published to the presentation layer.
//!
//! Every method has an empty default so an observer only implements what it
//! displays. Notifications are made after the mirror locks are released, with
//! data copied while they were held.

use crate::inventory::InventorySnapshot;
use crate::room::RoomSnapshot;
use crate::trade::{TradeLogEntry, TradeView};

/// Receiver of mirror and session changes.
pub trait SyncObserver: Send + Sync {
    /// The inventory mirror changed.
    fn on_inventory_changed(&self, _inventory: &InventorySnapshot) {}

    /// The room mirror changed.
    fn on_room_changed(&self, _room: &RoomSnapshot) {}

    /// A scan started (`true`) or ended (`false`).
    fn on_scan_state_changed(&self, _scanning: bool) {}

    /// Trade phase, offers or acceptance changed.
    fn on_trade_state_changed(&self, _trade: &TradeView) {}

    /// A trade completed and was logged.
    fn on_trade_completed(&self, _entry: &TradeLogEntry) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl SyncObserver for NullObserver {}
