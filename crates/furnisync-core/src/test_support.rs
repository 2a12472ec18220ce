//! Shared fakes for unit tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::inventory::InventorySnapshot;
use crate::item::{Item, ItemKind};
use crate::observer::SyncObserver;
use crate::room::RoomSnapshot;
use crate::trade::{TradeLogEntry, TradePhase, TradeView};
use crate::transport::{Request, Transport, TransportError};

/// Transport that records every request and lets a test await them in order.
pub(crate) struct RecordingTransport {
    sent: Mutex<Vec<Request>>,
    tx: mpsc::UnboundedSender<Request>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Request>>,
    disconnected: AtomicBool,
}

impl RecordingTransport {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            sent: Mutex::new(Vec::new()),
            tx,
            rx: tokio::sync::Mutex::new(rx),
            disconnected: AtomicBool::new(false),
        }
    }

    pub(crate) fn sent(&self) -> Vec<Request> {
        self.sent.lock().clone()
    }

    pub(crate) fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }

    /// Next request not yet taken by a previous call.
    pub(crate) async fn next_request(&self) -> Request {
        let mut rx = self.rx.lock().await;
        tokio::time::timeout(Duration::from_secs(600), rx.recv())
            .await
            .expect("no request within the test deadline")
            .expect("request channel closed")
    }

    /// Whether another request arrives within `wait`.
    pub(crate) async fn is_quiet_for(&self, wait: Duration) -> bool {
        let mut rx = self.rx.lock().await;
        tokio::time::timeout(wait, rx.recv()).await.is_err()
    }
}

impl Transport for RecordingTransport {
    fn send(&self, request: Request) -> Result<(), TransportError> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }
        self.sent.lock().push(request.clone());
        let _ = self.tx.send(request);
        Ok(())
    }
}

/// A notification seen by [`RecordingObserver`].
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Observed {
    Inventory(usize),
    Room(usize),
    Scan(bool),
    Trade(TradePhase),
    Completed(u64),
}

#[derive(Default)]
pub(crate) struct RecordingObserver {
    events: Mutex<Vec<Observed>>,
}

impl RecordingObserver {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn events(&self) -> Vec<Observed> {
        self.events.lock().clone()
    }

    pub(crate) fn scan_states(&self) -> Vec<bool> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Observed::Scan(scanning) => Some(*scanning),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn completed(&self) -> Vec<u64> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Observed::Completed(seq) => Some(*seq),
                _ => None,
            })
            .collect()
    }
}

impl SyncObserver for RecordingObserver {
    fn on_inventory_changed(&self, inventory: &InventorySnapshot) {
        self.events
            .lock()
            .push(Observed::Inventory(inventory.summary.total_items));
    }

    fn on_room_changed(&self, room: &RoomSnapshot) {
        self.events.lock().push(Observed::Room(room.len()));
    }

    fn on_scan_state_changed(&self, scanning: bool) {
        self.events.lock().push(Observed::Scan(scanning));
    }

    fn on_trade_state_changed(&self, trade: &TradeView) {
        self.events.lock().push(Observed::Trade(trade.phase));
    }

    fn on_trade_completed(&self, entry: &TradeLogEntry) {
        self.events.lock().push(Observed::Completed(entry.sequence));
    }
}

pub(crate) fn chair(id: i64) -> Item {
    Item::new(id, "chair", ItemKind::Floor, "").with_owner("alice")
}

pub(crate) fn poster(id: i64, variant: &str) -> Item {
    Item::new(id, "poster", ItemKind::Wall, variant).with_owner("alice")
}
