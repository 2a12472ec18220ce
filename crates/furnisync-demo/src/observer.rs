//! Logs engine notifications and lets the scenario wait on them.

use furnisync_core::{
    InventorySnapshot, RoomSnapshot, SyncObserver, TradeLogEntry, TradePhase, TradeView,
};
use tokio::sync::watch;
use tracing::info;

/// Trade progress as seen by the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradeProgress {
    /// Current phase.
    pub phase: TradePhase,
    /// Items on our side of the table.
    pub offered: usize,
}

/// Observer that logs to the console and mirrors state into watch channels.
pub struct ConsoleObserver {
    scanning: watch::Sender<bool>,
    room_size: watch::Sender<usize>,
    trade: watch::Sender<TradeProgress>,
    completed: watch::Sender<u64>,
}

impl Default for ConsoleObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleObserver {
    /// Create an observer with nothing scanned, loaded or traded.
    pub fn new() -> Self {
        Self {
            scanning: watch::channel(false).0,
            room_size: watch::channel(0).0,
            trade: watch::channel(TradeProgress {
                phase: TradePhase::Closed,
                offered: 0,
            })
            .0,
            completed: watch::channel(0).0,
        }
    }

    /// Wait until no scan is running.
    pub async fn scan_finished(&self) {
        let mut rx = self.scanning.subscribe();
        let _ = rx.wait_for(|scanning| !*scanning).await;
    }

    /// Wait until the room holds at least one object.
    pub async fn room_loaded(&self) {
        let mut rx = self.room_size.subscribe();
        let _ = rx.wait_for(|size| *size > 0).await;
    }

    /// Wait until the trade matches `condition`.
    pub async fn trade_reaches(&self, condition: impl FnMut(&TradeProgress) -> bool) {
        let mut rx = self.trade.subscribe();
        let _ = rx.wait_for(condition).await;
    }

    /// Wait until at least `count` trades have completed.
    pub async fn trades_completed(&self, count: u64) {
        let mut rx = self.completed.subscribe();
        let _ = rx.wait_for(|completed| *completed >= count).await;
    }
}

impl SyncObserver for ConsoleObserver {
    fn on_inventory_changed(&self, inventory: &InventorySnapshot) {
        info!(
            "Inventory: {} item(s), {:.2} HC",
            inventory.summary.total_items, inventory.summary.total_value
        );
    }

    fn on_room_changed(&self, room: &RoomSnapshot) {
        info!(
            "Room: {} floor object(s), {} wall item(s)",
            room.floor.len(),
            room.wall.len()
        );
        self.room_size.send_replace(room.len());
    }

    fn on_scan_state_changed(&self, scanning: bool) {
        info!("Scanning: {}", scanning);
        self.scanning.send_replace(scanning);
    }

    fn on_trade_state_changed(&self, trade: &TradeView) {
        let offered = trade.local.lines.iter().map(|line| line.quantity).sum();
        info!(
            "Trade {:?}: we offer {} item(s) ({:.2} HC), {} offers {:.2} HC",
            trade.phase,
            offered,
            trade.local.total_value,
            trade.remote.party,
            trade.remote.total_value
        );
        self.trade.send_replace(TradeProgress {
            phase: trade.phase,
            offered,
        });
    }

    fn on_trade_completed(&self, entry: &TradeLogEntry) {
        info!(
            "Trade #{} with {} logged, balance {:+.2} HC",
            entry.sequence,
            entry.remote_party,
            entry.balance()
        );
        self.completed.send_modify(|completed| *completed += 1);
    }
}
