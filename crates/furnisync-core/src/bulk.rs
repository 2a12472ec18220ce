//! Bulk pickup and layout replication.
//!
//! The server has no bulk requests, so a batch is a sequence of single
//! requests spaced by a minimum interval. All batches share one lane: a
//! single executor task consumes them in submission order and one [`Pacer`]
//! spaces every request it sends, whichever batch it belongs to.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::inventory::InventoryMirror;
use crate::observer::SyncObserver;
use crate::room::{CaptureEntry, Placement, RoomCapture, RoomMirror, RoomObject};
use crate::task::{Pacer, Shutdown, Worker};
use crate::transport::{Request, Transport};

/// Bulk queue tuning.
#[derive(Debug, Clone)]
pub struct BulkConfig {
    /// Minimum spacing between two requests.
    pub request_spacing: Duration,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            request_spacing: Duration::from_millis(550),
        }
    }
}

/// One queued operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Pick up the room object with this id.
    Pickup(i64),
    /// Place an item of the captured group at the captured spot.
    Place(CaptureEntry),
}

/// Outcome of a finished batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Operations that sent a request.
    pub completed: usize,
    /// Ids skipped because they were no longer in the room.
    pub skipped: Vec<i64>,
}

/// Callback run when a pickup batch finishes.
pub type PickupCallback = Box<dyn FnOnce(&BatchReport) + Send>;

/// Resolves to the result of a submitted batch.
pub struct BatchHandle {
    rx: oneshot::Receiver<Result<BatchReport, SyncError>>,
}

impl BatchHandle {
    /// Wait for the batch. A batch dropped by a reset resolves to
    /// [`SyncError::Cancelled`].
    pub async fn wait(self) -> Result<BatchReport, SyncError> {
        self.rx.await.unwrap_or(Err(SyncError::Cancelled))
    }
}

struct Batch {
    label: &'static str,
    operations: Vec<Operation>,
    refresh_room: bool,
    on_complete: Option<PickupCallback>,
    reply: oneshot::Sender<Result<BatchReport, SyncError>>,
}

struct Executor {
    batches: mpsc::UnboundedSender<Batch>,
    worker: Worker<()>,
}

struct BulkShared {
    room: Arc<RoomMirror>,
    inventory: Arc<InventoryMirror>,
    transport: Arc<dyn Transport>,
    observer: Arc<dyn SyncObserver>,
    config: BulkConfig,
    next_pending_id: AtomicI64,
    pending: AtomicUsize,
}

/// FIFO queue of paced bulk operations.
pub struct BulkQueue {
    shared: Arc<BulkShared>,
    executor: Mutex<Option<Executor>>,
}

impl BulkQueue {
    /// Create an empty queue. The executor starts with the first batch.
    pub fn new(
        config: BulkConfig,
        room: Arc<RoomMirror>,
        inventory: Arc<InventoryMirror>,
        transport: Arc<dyn Transport>,
        observer: Arc<dyn SyncObserver>,
    ) -> Self {
        Self {
            shared: Arc::new(BulkShared {
                room,
                inventory,
                transport,
                observer,
                config,
                next_pending_id: AtomicI64::new(-1),
                pending: AtomicUsize::new(0),
            }),
            executor: Mutex::new(None),
        }
    }

    /// Batches submitted and not yet finished.
    pub fn pending_batches(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    /// Pick up room objects by id, in order.
    ///
    /// Ids not in the room when their turn comes are skipped. Each object is
    /// moved into the inventory mirror before its request is sent; floor
    /// objects get a negative placeholder id until the next scan confirms
    /// them.
    pub fn enqueue_pickup(
        &self,
        ids: Vec<i64>,
        on_complete: Option<PickupCallback>,
    ) -> BatchHandle {
        let operations = ids.into_iter().map(Operation::Pickup).collect();
        self.submit("pickup", operations, true, on_complete)
    }

    /// Place inventory items to reproduce a captured layout, in capture
    /// order.
    ///
    /// Stops at the first entry whose group has no confirmed item left,
    /// with [`SyncError::ReplicationShortfall`].
    pub fn replicate(&self, capture: &RoomCapture) -> BatchHandle {
        let operations = capture
            .entries
            .iter()
            .cloned()
            .map(Operation::Place)
            .collect();
        self.submit("replicate", operations, false, None)
    }

    fn submit(
        &self,
        label: &'static str,
        operations: Vec<Operation>,
        refresh_room: bool,
        on_complete: Option<PickupCallback>,
    ) -> BatchHandle {
        let (reply, rx) = oneshot::channel();
        let batch = Batch {
            label,
            operations,
            refresh_room,
            on_complete,
            reply,
        };

        let mut executor = self.executor.lock();
        if executor.as_ref().is_none_or(|e| e.worker.is_finished()) {
            let (tx, batches) = mpsc::unbounded_channel();
            let shared = Arc::clone(&self.shared);
            let worker = Worker::spawn("bulk-queue", move |shutdown| {
                shared.run(batches, shutdown)
            });
            *executor = Some(Executor {
                batches: tx,
                worker,
            });
        }
        if let Some(executor) = executor.as_ref() {
            self.shared.pending.fetch_add(1, Ordering::SeqCst);
            if let Err(mpsc::error::SendError(batch)) = executor.batches.send(batch) {
                self.shared.pending.fetch_sub(1, Ordering::SeqCst);
                let _ = batch.reply.send(Err(SyncError::Cancelled));
            }
        }
        BatchHandle { rx }
    }

    /// Cancel the running batch and drop every queued one. Their handles
    /// resolve to [`SyncError::Cancelled`].
    pub async fn reset(&self) {
        let executor = self.executor.lock().take();
        if let Some(Executor { batches, worker }) = executor {
            drop(batches);
            if let Err(e) = worker.cancel_and_wait().await {
                warn!("Bulk executor ended abnormally: {}", e);
            }
        }
        self.shared.pending.store(0, Ordering::SeqCst);
    }
}

impl BulkShared {
    async fn run(
        self: Arc<Self>,
        mut batches: mpsc::UnboundedReceiver<Batch>,
        mut shutdown: Shutdown,
    ) {
        let mut pacer = Pacer::new(self.config.request_spacing);
        loop {
            let batch = match shutdown.run(batches.recv()).await {
                Ok(Some(batch)) => batch,
                Ok(None) | Err(_) => return,
            };
            let Batch {
                label,
                operations,
                refresh_room,
                on_complete,
                reply,
            } = batch;

            info!("Bulk {} of {} operation(s) started", label, operations.len());
            let result = self.execute(&operations, &mut pacer, &mut shutdown).await;
            match &result {
                Ok(report) => {
                    info!(
                        "Bulk {} finished: {} done, {} skipped",
                        label,
                        report.completed,
                        report.skipped.len()
                    );
                    if refresh_room {
                        self.observer.on_room_changed(&self.room.snapshot());
                    }
                    if let Some(on_complete) = on_complete {
                        on_complete(report);
                    }
                }
                Err(SyncError::Cancelled) => debug!("Bulk {} cancelled", label),
                Err(e) => warn!("Bulk {} aborted: {}", label, e),
            }
            self.pending.fetch_sub(1, Ordering::SeqCst);
            let _ = reply.send(result);
            if shutdown.is_cancelled() {
                return;
            }
        }
    }

    async fn execute(
        &self,
        operations: &[Operation],
        pacer: &mut Pacer,
        shutdown: &mut Shutdown,
    ) -> Result<BatchReport, SyncError> {
        let mut report = BatchReport::default();
        for (index, operation) in operations.iter().enumerate() {
            match operation {
                Operation::Pickup(id) => {
                    if self.pickup(*id, pacer, shutdown).await? {
                        report.completed += 1;
                    } else {
                        report.skipped.push(*id);
                    }
                }
                Operation::Place(entry) => {
                    self.place(entry, pacer, shutdown)
                        .await
                        .map_err(|e| match e {
                            PlaceError::Shortfall => SyncError::ReplicationShortfall {
                                key: entry.key.clone(),
                                name: entry.name.clone(),
                                placed: index,
                                total: operations.len(),
                            },
                            PlaceError::Sync(e) => e,
                        })?;
                    report.completed += 1;
                }
            }
        }
        Ok(report)
    }

    /// Returns `false` when the object was not in the room.
    async fn pickup(
        &self,
        id: i64,
        pacer: &mut Pacer,
        shutdown: &mut Shutdown,
    ) -> Result<bool, SyncError> {
        if !self.room.contains(id) {
            debug!("Skipping pickup of {}: not in the room", id);
            return Ok(false);
        }
        pacer.wait_turn(shutdown).await?;

        // Room lock, then inventory lock.
        let taken = self.room.take_with(id, |object| {
            let item_id = match object {
                RoomObject::Floor(_) => self.next_pending_id.fetch_sub(1, Ordering::SeqCst),
                RoomObject::Wall(item) => item.id,
            };
            self.inventory.upsert(object.clone().into_item(item_id));
            item_id
        });
        let Some((object, item_id)) = taken else {
            debug!("Skipping pickup of {}: left the room", id);
            return Ok(false);
        };

        let kind = object.group_key().kind;
        if let Err(e) = self.transport.send(Request::Pickup { id, kind }) {
            // Not picked up: put the object back where it was.
            self.inventory.remove(item_id);
            self.room.insert(object);
            return Err(e.into());
        }
        debug!("Picked up {} as inventory item {}", id, item_id);
        self.observer.on_inventory_changed(&self.inventory.snapshot());
        Ok(true)
    }

    async fn place(
        &self,
        entry: &CaptureEntry,
        pacer: &mut Pacer,
        shutdown: &mut Shutdown,
    ) -> Result<(), PlaceError> {
        if self.inventory.count_available(&entry.key) == 0 {
            return Err(PlaceError::Shortfall);
        }
        pacer
            .wait_turn(shutdown)
            .await
            .map_err(|e| PlaceError::Sync(e.into()))?;
        let Some(item) = self.inventory.take_matching(&entry.key) else {
            return Err(PlaceError::Shortfall);
        };

        let request = match &entry.placement {
            Placement::Floor {
                x,
                y,
                width,
                height,
                direction,
                ..
            } => Request::PlaceFloor {
                item_id: item.id,
                x: *x,
                y: *y,
                width: *width,
                height: *height,
                direction: *direction,
            },
            Placement::Wall { location } => Request::PlaceWall {
                item_id: item.id,
                location: location.clone(),
            },
        };
        if let Err(e) = self.transport.send(request) {
            // Not placed: the item is still ours.
            self.inventory.upsert(item);
            return Err(PlaceError::Sync(e.into()));
        }
        debug!("Placed {} ({})", entry.name, item.id);
        self.observer.on_inventory_changed(&self.inventory.snapshot());
        Ok(())
    }
}

enum PlaceError {
    Shortfall,
    Sync(SyncError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichment::IdentityEnricher;
    use crate::item::ItemKind;
    use crate::room::RoomContents;
    use crate::room::tests::{floor, wall};
    use crate::test_support::{Observed, RecordingObserver, RecordingTransport, chair, poster};
    use crate::transport::TransportError;

    struct Fixture {
        room: Arc<RoomMirror>,
        inventory: Arc<InventoryMirror>,
        transport: Arc<RecordingTransport>,
        observer: Arc<RecordingObserver>,
        bulk: BulkQueue,
    }

    fn fixture() -> Fixture {
        let room = Arc::new(RoomMirror::new());
        let inventory = Arc::new(InventoryMirror::new(Arc::new(IdentityEnricher)));
        let transport = Arc::new(RecordingTransport::new());
        let observer = Arc::new(RecordingObserver::new());
        let bulk = BulkQueue::new(
            BulkConfig::default(),
            Arc::clone(&room),
            Arc::clone(&inventory),
            transport.clone(),
            observer.clone(),
        );
        Fixture {
            room,
            inventory,
            transport,
            observer,
            bulk,
        }
    }

    fn load_room(f: &Fixture) {
        f.room.load(RoomContents {
            floor: Some(vec![floor(10, "chair", 1, 1), floor(11, "chair", 2, 1)]),
            wall: Some(vec![wall(20, "5", ":w=1,1 l=0,0 r")]),
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_pickup_skips_missing_ids() {
        let f = fixture();
        load_room(&f);
        let (done_tx, done_rx) = oneshot::channel();
        let callback: PickupCallback = Box::new(move |report: &BatchReport| {
            let _ = done_tx.send(report.clone());
        });

        let report = f
            .bulk
            .enqueue_pickup(vec![10, 99, 20], Some(callback))
            .wait()
            .await
            .unwrap();

        assert_eq!(report.completed, 2);
        assert_eq!(report.skipped, vec![99]);
        assert_eq!(done_rx.await.unwrap(), report);
        assert_eq!(
            f.transport.sent(),
            vec![
                Request::Pickup {
                    id: 10,
                    kind: ItemKind::Floor
                },
                Request::Pickup {
                    id: 20,
                    kind: ItemKind::Wall
                },
            ]
        );
        assert!(!f.room.contains(10));
        assert!(!f.room.contains(20));
        assert!(f.room.contains(11));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pickup_moves_objects_into_inventory() {
        let f = fixture();
        load_room(&f);
        f.bulk
            .enqueue_pickup(vec![10, 20], None)
            .wait()
            .await
            .unwrap();

        // Floor objects wait for a scan to learn their inventory id.
        let snapshot = f.inventory.snapshot();
        let floor_item = snapshot.items.iter().find(|i| i.kind == ItemKind::Floor).unwrap();
        assert!(floor_item.id < 0);
        assert_eq!(floor_item.class, "chair");
        assert!(f.inventory.contains(20));
        assert_eq!(f.inventory.summary().total_items, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_are_spaced() {
        let f = fixture();
        load_room(&f);
        let start = tokio::time::Instant::now();
        f.bulk
            .enqueue_pickup(vec![10, 11, 20], None)
            .wait()
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(1100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_run_in_submission_order() {
        let f = fixture();
        load_room(&f);
        let first = f.bulk.enqueue_pickup(vec![10], None);
        let second = f.bulk.enqueue_pickup(vec![11, 20], None);
        assert_eq!(f.bulk.pending_batches(), 2);

        first.wait().await.unwrap();
        second.wait().await.unwrap();

        let ids: Vec<i64> = f
            .transport
            .sent()
            .into_iter()
            .filter_map(|r| match r {
                Request::Pickup { id, .. } => Some(id),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec![10, 11, 20]);
        assert_eq!(f.bulk.pending_batches(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pickup_refreshes_room_once() {
        let f = fixture();
        load_room(&f);
        f.bulk
            .enqueue_pickup(vec![10, 11], None)
            .wait()
            .await
            .unwrap();
        let room_events = f
            .observer
            .events()
            .into_iter()
            .filter(|e| matches!(e, Observed::Room(_)))
            .count();
        assert_eq!(room_events, 1);
    }

    fn capture_of_two_chairs_and_a_poster() -> RoomCapture {
        let room = RoomMirror::new();
        room.load(RoomContents {
            floor: Some(vec![floor(1, "chair", 3, 4), floor(2, "chair", 5, 6)]),
            wall: Some(vec![wall(3, "5", ":w=2,2 l=1,1 l")]),
        });
        room.capture(&IdentityEnricher)
    }

    #[tokio::test(start_paused = true)]
    async fn test_replicate_places_in_capture_order() {
        let f = fixture();
        f.inventory.upsert(chair(100));
        f.inventory.upsert(chair(101));
        f.inventory.upsert(poster(200, "5"));

        let report = f
            .bulk
            .replicate(&capture_of_two_chairs_and_a_poster())
            .wait()
            .await
            .unwrap();

        assert_eq!(report.completed, 3);
        assert_eq!(
            f.transport.sent(),
            vec![
                Request::PlaceFloor {
                    item_id: 100,
                    x: 3,
                    y: 4,
                    width: 1,
                    height: 1,
                    direction: 2
                },
                Request::PlaceFloor {
                    item_id: 101,
                    x: 5,
                    y: 6,
                    width: 1,
                    height: 1,
                    direction: 2
                },
                Request::PlaceWall {
                    item_id: 200,
                    location: ":w=2,2 l=1,1 l".to_string()
                },
            ]
        );
        assert!(f.inventory.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_replicate_fails_fast_on_shortfall() {
        let f = fixture();
        f.inventory.upsert(chair(100));
        f.inventory.upsert(poster(200, "5"));

        let result = f
            .bulk
            .replicate(&capture_of_two_chairs_and_a_poster())
            .wait()
            .await;

        match result {
            Err(SyncError::ReplicationShortfall {
                key, placed, total, ..
            }) => {
                assert_eq!(key.class, "chair");
                assert_eq!(placed, 1);
                assert_eq!(total, 3);
            }
            other => panic!("expected shortfall, got {other:?}"),
        }
        assert_eq!(f.transport.sent().len(), 1);
        assert!(f.inventory.contains(200), "poster must not be placed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_replicate_ignores_unconfirmed_and_offered_items() {
        let f = fixture();
        f.inventory.upsert(chair(-1));
        f.inventory.upsert(chair(100));
        f.inventory.mark_in_trade(100, true);

        let capture = RoomCapture {
            entries: capture_of_two_chairs_and_a_poster().entries[..1].to_vec(),
        };
        let result = f.bulk.replicate(&capture).wait().await;
        assert!(matches!(
            result,
            Err(SyncError::ReplicationShortfall { placed: 0, .. })
        ));
        assert!(f.transport.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_replicate_keeps_item_when_send_fails() {
        let f = fixture();
        f.inventory.upsert(chair(100));
        f.transport.disconnect();

        let capture = RoomCapture {
            entries: capture_of_two_chairs_and_a_poster().entries[..1].to_vec(),
        };
        let result = f.bulk.replicate(&capture).wait().await;
        assert!(matches!(
            result,
            Err(SyncError::Transport(TransportError::Disconnected))
        ));
        assert!(f.inventory.contains(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pickup_restores_mirrors_when_send_fails() {
        let f = fixture();
        load_room(&f);
        f.transport.disconnect();

        let result = f.bulk.enqueue_pickup(vec![10], None).wait().await;

        assert!(matches!(
            result,
            Err(SyncError::Transport(TransportError::Disconnected))
        ));
        assert!(f.room.contains(10));
        assert!(f.inventory.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pickup_of_absent_id_changes_nothing() {
        let f = fixture();
        load_room(&f);
        f.inventory.upsert(chair(100));
        let inventory_before = f.inventory.snapshot();
        let room_before = f.room.snapshot();

        let report = f.bulk.enqueue_pickup(vec![99], None).wait().await.unwrap();

        assert_eq!(report.completed, 0);
        assert_eq!(report.skipped, vec![99]);
        assert!(f.transport.sent().is_empty());
        assert_eq!(f.inventory.snapshot(), inventory_before);
        assert_eq!(f.room.snapshot(), room_before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_cancels_queued_batches() {
        let f = fixture();
        load_room(&f);
        let running = f.bulk.enqueue_pickup(vec![10, 11, 20], None);
        let queued = f.bulk.enqueue_pickup(vec![11], None);
        tokio::time::sleep(Duration::from_millis(100)).await;

        f.bulk.reset().await;

        assert!(matches!(running.wait().await, Err(SyncError::Cancelled)));
        assert!(matches!(queued.wait().await, Err(SyncError::Cancelled)));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(f.transport.sent().len(), 1);

        // The queue accepts work again after a reset.
        let report = f.bulk.enqueue_pickup(vec![20], None).wait().await.unwrap();
        assert_eq!(report.completed, 1);
    }
}
