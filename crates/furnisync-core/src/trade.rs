//! Two-party trade negotiation.
//!
//! The server never announces that a trade window opened; the manager infers
//! it from an offer update with both sides empty. Every offer update is
//! authoritative for what sits on the table, so the local side's items are
//! re-marked in the inventory mirror from the wire each time.
//!
//! Lock order: the trade lock is taken before the inventory lock, never after.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::enrichment::Enricher;
use crate::inventory::InventoryMirror;
use crate::item::{GroupKey, Item};
use crate::observer::SyncObserver;
use crate::task::{Pacer, Shutdown, Worker};
use crate::transport::{Request, Transport, send_logged};

// ---------------------------------------------------------------------------
// Wire model
// ---------------------------------------------------------------------------

/// One party's side of the trade table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TradeOffer {
    /// Party name.
    pub party: String,
    /// Items on the table.
    pub items: Vec<Item>,
    /// Whether the party has accepted.
    pub accepted: bool,
}

impl TradeOffer {
    /// An empty side for `party`.
    pub fn empty(party: impl Into<String>) -> Self {
        Self {
            party: party.into(),
            ..Self::default()
        }
    }
}

/// Both sides of the table as sent by the server.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TradeOffers {
    /// The side listed first.
    pub first: TradeOffer,
    /// The side listed second.
    pub second: TradeOffer,
}

impl TradeOffers {
    /// Whether neither side has items on the table.
    pub fn is_empty(&self) -> bool {
        self.first.items.is_empty() && self.second.items.is_empty()
    }

    /// Split into `(local, remote)`. When neither side names `local_party`
    /// the first side is taken as local.
    fn split(self, local_party: &str) -> (TradeOffer, TradeOffer) {
        if !local_party.is_empty() && self.second.party == local_party {
            (self.second, self.first)
        } else {
            if !local_party.is_empty() && self.first.party != local_party {
                debug!(
                    "Neither trade side is '{}', treating '{}' as local",
                    local_party, self.first.party
                );
            }
            (self.first, self.second)
        }
    }
}

// ---------------------------------------------------------------------------
// Published view
// ---------------------------------------------------------------------------

/// Negotiation phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradePhase {
    /// No trade window.
    Closed,
    /// Negotiating.
    Open,
    /// Completed; waiting for the window to close.
    Completed,
}

/// Items of one display name on one side of the table.
#[derive(Debug, Clone, PartialEq)]
pub struct OfferLine {
    /// Display name.
    pub name: String,
    /// Number of items.
    pub quantity: usize,
    /// Combined value.
    pub value: f64,
}

/// Displayable summary of one side of the table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OfferSummary {
    /// Party name.
    pub party: String,
    /// Whether the party has accepted.
    pub accepted: bool,
    /// Lines ordered by name.
    pub lines: Vec<OfferLine>,
    /// Sum of all line values.
    pub total_value: f64,
}

impl OfferSummary {
    fn of(offer: &TradeOffer, enricher: &dyn Enricher) -> Self {
        let mut lines: BTreeMap<String, OfferLine> = BTreeMap::new();
        let mut total_value = 0.0;
        for item in &offer.items {
            let enrichment = enricher.describe(&item.group_key());
            total_value += enrichment.value;
            let line = lines
                .entry(enrichment.name.clone())
                .or_insert_with(|| OfferLine {
                    name: enrichment.name,
                    quantity: 0,
                    value: 0.0,
                });
            line.quantity += 1;
            line.value += enrichment.value;
        }
        Self {
            party: offer.party.clone(),
            accepted: offer.accepted,
            lines: lines.into_values().collect(),
            total_value,
        }
    }
}

/// Snapshot of the negotiation handed to observers.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeView {
    /// Current phase.
    pub phase: TradePhase,
    /// Our side.
    pub local: OfferSummary,
    /// The counterparty's side.
    pub remote: OfferSummary,
}

// ---------------------------------------------------------------------------
// Trade log
// ---------------------------------------------------------------------------

/// An item that changed hands, valued at trade time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradedItem {
    /// The item as it was on the table.
    pub item: Item,
    /// Display name.
    pub name: String,
    /// Value at trade time.
    pub value: f64,
}

/// A completed trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeLogEntry {
    /// Sequence number, starting at 1.
    pub sequence: u64,
    /// Completion time in unix milliseconds.
    pub timestamp_ms: u64,
    /// Our party name.
    pub local_party: String,
    /// Counterparty name.
    pub remote_party: String,
    /// Items we gave.
    pub items_traded: Vec<TradedItem>,
    /// Items we received.
    pub items_received: Vec<TradedItem>,
}

impl TradeLogEntry {
    /// Value received minus value given.
    pub fn balance(&self) -> f64 {
        let gave: f64 = self.items_traded.iter().map(|t| t.value).sum();
        let received: f64 = self.items_received.iter().map(|t| t.value).sum();
        received - gave
    }
}

/// Errors from persisting the trade log.
#[derive(Debug, thiserror::Error)]
pub enum TradeLogError {
    /// Failed to write the log file.
    #[error("failed to write trade log: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to serialize the log.
    #[error("failed to serialize trade log: {0}")]
    Serialize(#[from] ron::Error),
}

#[derive(Default)]
struct TradeLogState {
    entries: Vec<TradeLogEntry>,
    last_sequence: u64,
}

/// Append-only history of completed trades.
#[derive(Default)]
pub struct TradeLog {
    state: Mutex<TradeLogState>,
}

impl TradeLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    fn append(
        &self,
        local_party: String,
        remote_party: String,
        items_traded: Vec<TradedItem>,
        items_received: Vec<TradedItem>,
    ) -> TradeLogEntry {
        let mut state = self.state.lock();
        state.last_sequence += 1;
        let entry = TradeLogEntry {
            sequence: state.last_sequence,
            timestamp_ms: unix_millis(),
            local_party,
            remote_party,
            items_traded,
            items_received,
        };
        state.entries.push(entry.clone());
        entry
    }

    /// All entries in completion order.
    pub fn entries(&self) -> Vec<TradeLogEntry> {
        self.state.lock().entries.clone()
    }

    /// Number of logged trades.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Whether no trade has been logged.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the log to `path` as pretty RON.
    pub fn save(&self, path: &Path) -> Result<(), TradeLogError> {
        let entries = self.entries();
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(4)
            .separate_tuple_members(true)
            .enumerate_arrays(false);
        let contents = ron::ser::to_string_pretty(&entries, pretty)?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        info!("Saved {} trade(s) to {}", entries.len(), path.display());
        Ok(())
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// TradeManager
// ---------------------------------------------------------------------------

/// Trade tuning.
#[derive(Debug, Clone)]
pub struct TradeConfig {
    /// Our party name on the wire.
    pub local_party: String,
    /// Spacing between automatic offers.
    pub offer_spacing: Duration,
}

impl Default for TradeConfig {
    fn default() -> Self {
        Self {
            local_party: String::new(),
            offer_spacing: Duration::from_millis(550),
        }
    }
}

struct TradeState {
    phase: TradePhase,
    session: u64,
    local_party: String,
    local: TradeOffer,
    remote: TradeOffer,
    remote_had_items: bool,
    auto_offer: Option<Worker<()>>,
}

impl TradeState {
    fn reset_negotiation(&mut self) {
        self.local = TradeOffer::empty(self.local_party.clone());
        self.remote = TradeOffer::default();
        self.remote_had_items = false;
    }

    fn view(&self, enricher: &dyn Enricher) -> TradeView {
        TradeView {
            phase: self.phase,
            local: OfferSummary::of(&self.local, enricher),
            remote: OfferSummary::of(&self.remote, enricher),
        }
    }
}

struct TradeShared {
    state: Mutex<TradeState>,
    inventory: Arc<InventoryMirror>,
    transport: Arc<dyn Transport>,
    observer: Arc<dyn SyncObserver>,
    log: TradeLog,
    offer_spacing: Duration,
}

/// Tracks the trade session and reconciles completed trades.
pub struct TradeManager {
    shared: Arc<TradeShared>,
}

impl TradeManager {
    /// Create a manager with no open trade.
    pub fn new(
        config: TradeConfig,
        inventory: Arc<InventoryMirror>,
        transport: Arc<dyn Transport>,
        observer: Arc<dyn SyncObserver>,
    ) -> Self {
        let mut state = TradeState {
            phase: TradePhase::Closed,
            session: 0,
            local_party: config.local_party,
            local: TradeOffer::default(),
            remote: TradeOffer::default(),
            remote_had_items: false,
            auto_offer: None,
        };
        state.reset_negotiation();
        Self {
            shared: Arc::new(TradeShared {
                state: Mutex::new(state),
                inventory,
                transport,
                observer,
                log: TradeLog::new(),
                offer_spacing: config.offer_spacing,
            }),
        }
    }

    /// Set the name that identifies our side of the table.
    pub fn set_local_party(&self, name: impl Into<String>) {
        let mut state = self.shared.state.lock();
        state.local_party = name.into();
        if state.phase != TradePhase::Open {
            state.local.party = state.local_party.clone();
        }
    }

    /// Current phase.
    pub fn phase(&self) -> TradePhase {
        self.shared.state.lock().phase
    }

    /// Current negotiation view.
    pub fn view(&self) -> TradeView {
        let state = self.shared.state.lock();
        state.view(self.shared.inventory.enricher().as_ref())
    }

    /// Completed trades.
    pub fn log(&self) -> &TradeLog {
        &self.shared.log
    }

    // -- Commands -----------------------------------------------------------

    /// Put an inventory item on the table.
    ///
    /// Dropped (returns `false`) unless a trade is open, the item is in the
    /// inventory, and it is not already offered.
    pub fn offer(&self, id: i64) -> bool {
        self.shared.offer(id)
    }

    /// Accept the current offers.
    pub fn accept(&self) -> bool {
        self.shared.send_if_open(Request::TradeAccept)
    }

    /// Withdraw acceptance.
    pub fn unaccept(&self) -> bool {
        self.shared.send_if_open(Request::TradeUnaccept)
    }

    /// Ask the server to cancel the trade.
    pub fn cancel(&self) -> bool {
        self.shared.send_if_open(Request::TradeClose)
    }

    /// Offer items of `key` one at a time until `quantity` are on the table,
    /// the group runs out, or the session ends.
    ///
    /// Replaces any automatic offer already running. Returns `false` when no
    /// trade is open.
    pub fn offer_group(&self, key: GroupKey, quantity: usize) -> bool {
        let mut state = self.shared.state.lock();
        if state.phase != TradePhase::Open {
            debug!("Ignoring auto-offer of {}: no open trade", key);
            return false;
        }
        let session = state.session;
        let shared = Arc::clone(&self.shared);
        let worker = Worker::spawn("trade-auto-offer", move |shutdown| {
            shared.auto_offer(session, key, quantity, shutdown)
        });
        // Replacing drops the previous worker, which cancels it.
        state.auto_offer = Some(worker);
        true
    }

    // -- Inbound events -----------------------------------------------------

    /// Apply an authoritative offer update.
    pub fn handle_offer_update(&self, offers: TradeOffers) {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        if state.phase != TradePhase::Open {
            if !offers.is_empty() {
                warn!("Trade update with items on the table but no open trade; opening one");
            }
            state.session += 1;
            state.phase = TradePhase::Open;
            info!("Trade opened (session {})", state.session);
        }

        let (local, remote) = offers.split(&state.local_party);
        shared
            .inventory
            .set_in_trade(local.items.iter().map(|item| item.id));
        state.remote_had_items = !remote.items.is_empty();
        state.local = local;
        state.remote = remote;
        let view = state.view(shared.inventory.enricher().as_ref());
        drop(state);

        shared.observer.on_trade_state_changed(&view);
    }

    /// A party accepted or withdrew acceptance.
    pub fn handle_accepted(&self, party: &str, accepted: bool) {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        if state.phase != TradePhase::Open {
            debug!("Ignoring trade acceptance from {}: no open trade", party);
            return;
        }
        if state.local.party == party {
            state.local.accepted = accepted;
        } else if state.remote.party == party || state.remote.party.is_empty() {
            state.remote.accepted = accepted;
        } else {
            debug!("Ignoring trade acceptance from unknown party {}", party);
            return;
        }
        let view = state.view(shared.inventory.enricher().as_ref());
        drop(state);

        shared.observer.on_trade_state_changed(&view);
    }

    /// Reconcile a completed trade.
    ///
    /// Only an open session completes, so a repeated or stale completion is
    /// ignored.
    pub fn handle_completed(&self, offers: TradeOffers) {
        let shared = &self.shared;
        let enricher = Arc::clone(shared.inventory.enricher());
        let mut state = shared.state.lock();
        if state.phase != TradePhase::Open {
            debug!(
                "Ignoring trade completion in session {}: trade is {:?}",
                state.session, state.phase
            );
            return;
        }

        let local_party = state.local_party.clone();
        let (local, remote) = offers.split(&local_party);
        let value = |item: Item| {
            let enrichment = enricher.describe(&item.group_key());
            TradedItem {
                item,
                name: enrichment.name,
                value: enrichment.value,
            }
        };
        let gave: Vec<i64> = local.items.iter().map(|item| item.id).collect();
        let received: Vec<Item> = remote
            .items
            .iter()
            .cloned()
            .map(|item| item.with_owner(local_party.clone()))
            .collect();
        let entry = shared.log.append(
            if local.party.is_empty() {
                local_party.clone()
            } else {
                local.party.clone()
            },
            remote.party.clone(),
            local.items.into_iter().map(value).collect(),
            received.iter().cloned().map(value).collect(),
        );
        let snapshot = shared.inventory.apply_trade(&gave, received);

        state.phase = TradePhase::Completed;
        state.reset_negotiation();
        let auto_offer = state.auto_offer.take();
        let view = state.view(enricher.as_ref());
        drop(state);
        drop(auto_offer);

        info!(
            "Trade #{} with {} completed: gave {} item(s), received {} item(s)",
            entry.sequence,
            entry.remote_party,
            entry.items_traded.len(),
            entry.items_received.len()
        );
        shared.observer.on_trade_completed(&entry);
        shared.observer.on_inventory_changed(&snapshot);
        shared.observer.on_trade_state_changed(&view);
    }

    /// The trade window closed.
    pub fn handle_closed(&self) {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        match state.phase {
            TradePhase::Closed => {
                debug!("Ignoring trade close: no open trade");
            }
            TradePhase::Completed => {
                debug!("Trade session {} closed after completion", state.session);
                state.phase = TradePhase::Closed;
                let view = state.view(shared.inventory.enricher().as_ref());
                drop(state);

                shared.observer.on_trade_state_changed(&view);
            }
            TradePhase::Open => {
                shared.inventory.clear_in_trade();
                if state.remote_had_items {
                    warn!(
                        "Trade with {} closed without completing while they had items on the table",
                        state.remote.party
                    );
                } else {
                    info!("Trade closed without completing");
                }
                state.phase = TradePhase::Closed;
                state.reset_negotiation();
                let auto_offer = state.auto_offer.take();
                let view = state.view(shared.inventory.enricher().as_ref());
                drop(state);
                drop(auto_offer);

                shared.observer.on_trade_state_changed(&view);
            }
        }
    }

    /// Cancel the automatic offer and return to `Closed` with no flags set.
    pub async fn reset(&self) {
        let auto_offer = self.shared.state.lock().auto_offer.take();
        if let Some(worker) = auto_offer
            && let Err(e) = worker.cancel_and_wait().await
        {
            warn!("Auto-offer ended abnormally: {}", e);
        }

        let shared = &self.shared;
        let mut state = shared.state.lock();
        state.phase = TradePhase::Closed;
        state.reset_negotiation();
        shared.inventory.clear_in_trade();
        let view = state.view(shared.inventory.enricher().as_ref());
        drop(state);

        shared.observer.on_trade_state_changed(&view);
    }
}

impl TradeShared {
    fn offer(&self, id: i64) -> bool {
        let state = self.state.lock();
        if state.phase != TradePhase::Open {
            debug!("Ignoring offer of {}: no open trade", id);
            return false;
        }
        if !self.inventory.contains(id) {
            debug!("Ignoring offer of {}: not in inventory", id);
            return false;
        }
        if self.inventory.is_in_trade(id) {
            debug!("Ignoring offer of {}: already on the table", id);
            return false;
        }
        if !send_logged(self.transport.as_ref(), Request::TradeOffer { item_id: id }) {
            return false;
        }
        self.inventory.mark_in_trade(id, true)
    }

    fn send_if_open(&self, request: Request) -> bool {
        let state = self.state.lock();
        if state.phase != TradePhase::Open {
            debug!("Ignoring {}: no open trade", request.header());
            return false;
        }
        send_logged(self.transport.as_ref(), request)
    }

    fn is_session(&self, session: u64) -> bool {
        let state = self.state.lock();
        state.phase == TradePhase::Open && state.session == session
    }

    async fn auto_offer(
        self: Arc<Self>,
        session: u64,
        key: GroupKey,
        quantity: usize,
        mut shutdown: Shutdown,
    ) {
        let mut pacer = Pacer::new(self.offer_spacing);
        let mut offered = 0;
        while offered < quantity {
            if pacer.wait_turn(&mut shutdown).await.is_err() {
                debug!("Auto-offer of {} cancelled after {} item(s)", key, offered);
                return;
            }
            if !self.is_session(session) {
                return;
            }
            let Some(item) = self.inventory.find_available(&key) else {
                info!(
                    "Auto-offer of {} stopped: none left after {} of {}",
                    key, offered, quantity
                );
                return;
            };
            if !self.offer(item.id) {
                debug!("Auto-offer of {} stopped: offer of {} dropped", key, item.id);
                return;
            }
            offered += 1;
        }
        info!("Auto-offer of {} finished: {} item(s) offered", key, offered);
    }
}
