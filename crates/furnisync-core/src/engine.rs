//! Wires the mirrors and managers together and routes inbound events.

use std::sync::Arc;

use tracing::{debug, info, trace};

use crate::bulk::{BatchHandle, BulkConfig, BulkQueue, PickupCallback};
use crate::enrichment::Enricher;
use crate::inventory::{InventoryMirror, Summary};
use crate::item::GroupKey;
use crate::observer::SyncObserver;
use crate::room::{RoomCapture, RoomMirror, ValidationReport, validate};
use crate::scanner::{PaginationScanner, ScanConfig};
use crate::trade::{TradeConfig, TradeManager};
use crate::transport::{InboundEvent, Transport};

/// Tuning for every component of a [`SyncEngine`].
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Scan timing.
    pub scan: ScanConfig,
    /// Bulk request spacing.
    pub bulk: BulkConfig,
    /// Trade identity and auto-offer spacing.
    pub trade: TradeConfig,
}

/// One client session's synchronization state.
pub struct SyncEngine {
    inventory: Arc<InventoryMirror>,
    room: Arc<RoomMirror>,
    scanner: PaginationScanner,
    bulk: BulkQueue,
    trade: TradeManager,
    observer: Arc<dyn SyncObserver>,
}

impl SyncEngine {
    /// Build an engine with empty mirrors.
    pub fn new(
        config: EngineConfig,
        transport: Arc<dyn Transport>,
        enricher: Arc<dyn Enricher>,
        observer: Arc<dyn SyncObserver>,
    ) -> Self {
        let inventory = Arc::new(InventoryMirror::new(enricher));
        let room = Arc::new(RoomMirror::new());
        let scanner = PaginationScanner::new(
            config.scan,
            Arc::clone(&inventory),
            Arc::clone(&transport),
            Arc::clone(&observer),
        );
        let bulk = BulkQueue::new(
            config.bulk,
            Arc::clone(&room),
            Arc::clone(&inventory),
            Arc::clone(&transport),
            Arc::clone(&observer),
        );
        let trade = TradeManager::new(
            config.trade,
            Arc::clone(&inventory),
            transport,
            Arc::clone(&observer),
        );
        Self {
            inventory,
            room,
            scanner,
            bulk,
            trade,
            observer,
        }
    }

    /// The inventory mirror.
    pub fn inventory(&self) -> &Arc<InventoryMirror> {
        &self.inventory
    }

    /// The room mirror.
    pub fn room(&self) -> &Arc<RoomMirror> {
        &self.room
    }

    /// The inventory scanner.
    pub fn scanner(&self) -> &PaginationScanner {
        &self.scanner
    }

    /// The trade manager.
    pub fn trade(&self) -> &TradeManager {
        &self.trade
    }

    /// The bulk operation queue.
    pub fn bulk(&self) -> &BulkQueue {
        &self.bulk
    }

    /// Route an inbound event to the component that owns it.
    pub fn handle_event(&self, event: InboundEvent) {
        trace!("Inbound event: {}", event.name());
        match event {
            InboundEvent::PageReceived(items) => self.scanner.handle_page(items),
            InboundEvent::TradeOfferUpdated(offers) => self.trade.handle_offer_update(offers),
            InboundEvent::TradeAccepted { party, accepted } => {
                self.trade.handle_accepted(&party, accepted)
            }
            InboundEvent::TradeCompleted(offers) => self.trade.handle_completed(offers),
            InboundEvent::TradeClosed => self.trade.handle_closed(),
            InboundEvent::RoomContentsLoaded(contents) => {
                let snapshot = self.room.load(contents);
                debug!("Room loaded with {} object(s)", snapshot.len());
                self.observer.on_room_changed(&snapshot);
            }
            InboundEvent::RoomObjectAdded(object) => {
                self.room.insert(object);
                self.observer.on_room_changed(&self.room.snapshot());
            }
            InboundEvent::RoomObjectRemoved(id) => {
                if self.room.remove(id) {
                    self.observer.on_room_changed(&self.room.snapshot());
                }
            }
        }
    }

    // -- Commands -----------------------------------------------------------

    /// Start an inventory scan unless one is running.
    pub fn start_scan(&self) -> bool {
        self.scanner.start_scan()
    }

    /// Cancel any running scan and start a new one.
    pub async fn restart_scan(&self) -> bool {
        self.scanner.restart_scan().await
    }

    /// Queue a bulk pickup of room objects.
    pub fn pickup(&self, ids: Vec<i64>, on_complete: Option<PickupCallback>) -> BatchHandle {
        self.bulk.enqueue_pickup(ids, on_complete)
    }

    /// Record the current room layout.
    pub fn capture_room(&self) -> RoomCapture {
        self.room.capture(self.inventory.enricher().as_ref())
    }

    /// Check whether the inventory can reproduce `capture`.
    pub fn validate(&self, capture: &RoomCapture) -> ValidationReport {
        validate(capture, &self.inventory)
    }

    /// Queue placement of a captured layout.
    pub fn replicate(&self, capture: &RoomCapture) -> BatchHandle {
        self.bulk.replicate(capture)
    }

    /// Wealth summary of the current room.
    pub fn room_summary(&self) -> Summary {
        self.room.summary(self.inventory.enricher().as_ref())
    }

    /// Offer one inventory item in the open trade.
    pub fn offer(&self, id: i64) -> bool {
        self.trade.offer(id)
    }

    /// Offer `quantity` items of a group in the open trade.
    pub fn offer_group(&self, key: GroupKey, quantity: usize) -> bool {
        self.trade.offer_group(key, quantity)
    }

    /// Stop every worker and return to the initial session state.
    ///
    /// The inventory mirror is kept; the next scan prunes anything stale.
    pub async fn reset(&self) {
        self.scanner.reset().await;
        self.bulk.reset().await;
        self.trade.reset().await;
        self.room.clear();
        self.observer.on_room_changed(&self.room.snapshot());
        info!("Sync engine reset");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::enrichment::IdentityEnricher;
    use crate::error::SyncError;
    use crate::item::Item;
    use crate::room::tests::{floor, wall};
    use crate::room::{RoomContents, RoomObject};
    use crate::test_support::{Observed, RecordingObserver, RecordingTransport, chair, poster};
    use crate::trade::{TradeOffer, TradeOffers, TradePhase};
    use crate::transport::{PageCursor, Request};

    struct Fixture {
        transport: Arc<RecordingTransport>,
        observer: Arc<RecordingObserver>,
        engine: SyncEngine,
    }

    fn fixture() -> Fixture {
        let transport = Arc::new(RecordingTransport::new());
        let observer = Arc::new(RecordingObserver::new());
        let mut config = EngineConfig::default();
        config.trade.local_party = "alice".to_string();
        let engine = SyncEngine::new(
            config,
            transport.clone(),
            Arc::new(IdentityEnricher),
            observer.clone(),
        );
        Fixture {
            transport,
            observer,
            engine,
        }
    }

    fn side(party: &str, items: Vec<Item>) -> TradeOffer {
        TradeOffer {
            party: party.to_string(),
            items,
            accepted: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_through_events() {
        let f = fixture();
        f.engine.start_scan();
        assert_eq!(
            f.transport.next_request().await,
            Request::InventoryPage(PageCursor::First)
        );
        f.engine
            .handle_event(InboundEvent::PageReceived(vec![chair(1), poster(2, "5")]));
        f.transport.next_request().await;
        f.engine.handle_event(InboundEvent::PageReceived(Vec::new()));

        assert!(!f.engine.scanner().is_scanning());
        assert_eq!(f.engine.inventory().len(), 2);
    }

    #[test]
    fn test_room_events_patch_mirror() {
        let f = fixture();
        f.engine
            .handle_event(InboundEvent::RoomContentsLoaded(RoomContents {
                floor: Some(vec![floor(1, "chair", 0, 0)]),
                wall: Some(vec![wall(2, "5", ":w=0,0 l=0,0 l")]),
            }));
        f.engine
            .handle_event(InboundEvent::RoomObjectAdded(RoomObject::Floor(floor(
                3, "table", 1, 1,
            ))));
        f.engine.handle_event(InboundEvent::RoomObjectRemoved(2));
        f.engine.handle_event(InboundEvent::RoomObjectRemoved(404));

        let room = f.engine.room().snapshot();
        assert_eq!(room.floor.len(), 2);
        assert!(room.wall.is_empty());
        assert_eq!(
            f.observer.events(),
            vec![
                Observed::Room(2),
                Observed::Room(3),
                Observed::Room(2),
            ]
        );
    }

    #[test]
    fn test_trade_events_routed() {
        let f = fixture();
        f.engine.inventory().upsert(chair(1));
        f.engine
            .handle_event(InboundEvent::TradeOfferUpdated(TradeOffers {
                first: side("alice", vec![]),
                second: side("bob", vec![]),
            }));
        assert!(f.engine.offer(1));

        let done = TradeOffers {
            first: side("alice", vec![chair(1)]),
            second: side("bob", vec![]),
        };
        f.engine
            .handle_event(InboundEvent::TradeCompleted(done.clone()));
        f.engine.handle_event(InboundEvent::TradeCompleted(done));
        f.engine.handle_event(InboundEvent::TradeClosed);

        assert_eq!(f.engine.trade().phase(), TradePhase::Closed);
        assert!(f.engine.inventory().is_empty());
        assert_eq!(f.engine.trade().log().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_validate_replicate() {
        let f = fixture();
        f.engine
            .handle_event(InboundEvent::RoomContentsLoaded(RoomContents {
                floor: Some(vec![floor(1, "chair", 4, 4)]),
                wall: None,
            }));
        let capture = f.engine.capture_room();

        assert!(!f.engine.validate(&capture).is_satisfied());
        f.engine.inventory().upsert(chair(100));
        assert!(f.engine.validate(&capture).is_satisfied());

        let report = f.engine.replicate(&capture).wait().await.unwrap();
        assert_eq!(report.completed, 1);
        assert_eq!(
            f.transport.sent(),
            vec![Request::PlaceFloor {
                item_id: 100,
                x: 4,
                y: 4,
                width: 1,
                height: 1,
                direction: 2
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_returns_to_initial_state() {
        let f = fixture();
        f.engine
            .handle_event(InboundEvent::RoomContentsLoaded(RoomContents {
                floor: Some(vec![floor(1, "chair", 0, 0), floor(2, "chair", 1, 0)]),
                wall: None,
            }));
        f.engine.inventory().upsert(chair(10));
        f.engine
            .handle_event(InboundEvent::TradeOfferUpdated(TradeOffers {
                first: side("alice", vec![]),
                second: side("bob", vec![]),
            }));
        f.engine.offer(10);
        f.engine.start_scan();
        let pickup = f.engine.pickup(vec![1, 2], None);

        f.engine.reset().await;

        assert!(!f.engine.scanner().is_scanning());
        assert_eq!(f.engine.trade().phase(), TradePhase::Closed);
        assert!(!f.engine.inventory().is_in_trade(10));
        assert!(f.engine.room().snapshot().is_empty());
        assert!(matches!(pickup.wait().await, Err(SyncError::Cancelled)));
        assert_eq!(f.engine.bulk().pending_batches(), 0);

        // Nothing left running: no page request after the warm-up.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(
            !f.transport
                .sent()
                .contains(&Request::InventoryPage(PageCursor::First))
        );
        assert!(f.engine.inventory().contains(10));
    }
}
