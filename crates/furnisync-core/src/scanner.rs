//! Paginated inventory scan.
//!
//! The server lists the inventory one page at a time and wraps around to the
//! first page instead of signalling the end, so a scan stops at an empty page
//! or when a page starts with the same item as the first one did.
//!
//! Pages are applied by [`PaginationScanner::handle_page`] on the caller's
//! thread; a background worker only paces the page requests. The worker is
//! fenced by a scan generation so one left over from a cancelled scan can
//! never request pages for the next.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::inventory::InventoryMirror;
use crate::item::Item;
use crate::observer::SyncObserver;
use crate::task::{Shutdown, Worker};
use crate::transport::{PageCursor, Request, Transport, send_logged};

/// Scan timing.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Delay before the first page request.
    pub warmup: Duration,
    /// Delay between receiving a page and requesting the next.
    pub page_delay: Duration,
    /// How long to wait for a page before giving up.
    pub timeout: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            warmup: Duration::from_secs(5),
            page_delay: Duration::from_millis(500),
            timeout: Duration::from_secs(30),
        }
    }
}

/// How a scan ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// An empty page arrived.
    Completed,
    /// The listing wrapped around to the first page.
    LoopDetected,
    /// No page arrived in time. The mirror was left untouched.
    TimedOut,
    /// Cancelled by a restart or reset.
    Cancelled,
}

/// Result of the last finished scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanReport {
    /// How the scan ended.
    pub outcome: ScanOutcome,
    /// Pages received, the terminating one included.
    pub pages: u32,
    /// Distinct items seen.
    pub items: usize,
}

#[derive(Default)]
struct ScanState {
    scanning: bool,
    generation: u64,
    /// Whether the first-page request has gone out.
    requested: bool,
    anchor: Option<i64>,
    seen: HashSet<i64>,
    pages: u32,
    next_page: Option<mpsc::UnboundedSender<()>>,
    worker: Option<Worker<()>>,
    last_report: Option<ScanReport>,
}

impl ScanState {
    /// Return to idle and hand back what the caller must release outside
    /// the lock.
    fn finish(&mut self, outcome: ScanOutcome) -> (ScanReport, HashSet<i64>, Option<Worker<()>>) {
        let report = ScanReport {
            outcome,
            pages: self.pages,
            items: self.seen.len(),
        };
        self.scanning = false;
        self.requested = false;
        self.anchor = None;
        self.pages = 0;
        self.next_page = None;
        self.last_report = Some(report.clone());
        (report, std::mem::take(&mut self.seen), self.worker.take())
    }
}

struct ScannerShared {
    state: Mutex<ScanState>,
    inventory: Arc<InventoryMirror>,
    transport: Arc<dyn Transport>,
    observer: Arc<dyn SyncObserver>,
    config: ScanConfig,
}

/// Drives the paginated inventory listing into the inventory mirror.
pub struct PaginationScanner {
    shared: Arc<ScannerShared>,
}

impl PaginationScanner {
    /// Create an idle scanner.
    pub fn new(
        config: ScanConfig,
        inventory: Arc<InventoryMirror>,
        transport: Arc<dyn Transport>,
        observer: Arc<dyn SyncObserver>,
    ) -> Self {
        Self {
            shared: Arc::new(ScannerShared {
                state: Mutex::new(ScanState::default()),
                inventory,
                transport,
                observer,
                config,
            }),
        }
    }

    /// Whether a scan is in progress.
    pub fn is_scanning(&self) -> bool {
        self.shared.state.lock().scanning
    }

    /// Result of the most recent finished scan.
    pub fn last_report(&self) -> Option<ScanReport> {
        self.shared.state.lock().last_report.clone()
    }

    /// Start a scan. Returns `false` without doing anything if one is
    /// already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start_scan(&self) -> bool {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        if state.scanning {
            debug!("Inventory scan already running");
            return false;
        }
        state.generation += 1;
        state.scanning = true;
        state.requested = false;
        state.anchor = None;
        state.seen.clear();
        state.pages = 0;

        let (tx, rx) = mpsc::unbounded_channel();
        state.next_page = Some(tx);
        let generation = state.generation;
        let worker_shared = Arc::clone(shared);
        state.worker = Some(Worker::spawn("inventory-scan", move |shutdown| {
            worker_shared.run(generation, rx, shutdown)
        }));
        drop(state);

        info!("Inventory scan #{} started", generation);
        shared.observer.on_scan_state_changed(true);
        true
    }

    /// Cancel any running scan, wait for its worker, then start a new one.
    pub async fn restart_scan(&self) -> bool {
        self.cancel().await;
        self.start_scan()
    }

    /// Cancel the running scan. The mirror keeps what was applied so far.
    /// Returns `false` if no scan was running.
    pub async fn cancel(&self) -> bool {
        let worker = {
            let mut state = self.shared.state.lock();
            if !state.scanning {
                return false;
            }
            let (_, _, worker) = state.finish(ScanOutcome::Cancelled);
            worker
        };
        if let Some(worker) = worker
            && let Err(e) = worker.cancel_and_wait().await
        {
            warn!("Inventory scan worker ended abnormally: {}", e);
        }
        info!("Inventory scan cancelled");
        self.shared.observer.on_scan_state_changed(false);
        true
    }

    /// Cancel any scan and forget the last report.
    pub async fn reset(&self) {
        self.cancel().await;
        let mut state = self.shared.state.lock();
        state.last_report = None;
    }

    /// Apply one page of the listing.
    pub fn handle_page(&self, items: Vec<Item>) {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        if !state.scanning {
            debug!("Ignoring inventory page of {} item(s): no scan running", items.len());
            return;
        }
        if !state.requested {
            debug!(
                "Ignoring inventory page of {} item(s): first page not requested yet",
                items.len()
            );
            return;
        }
        state.pages += 1;

        let Some(first_id) = items.first().map(|item| item.id) else {
            drop(state);
            shared.end_scan(ScanOutcome::Completed, None);
            return;
        };
        match state.anchor {
            None => state.anchor = Some(first_id),
            Some(anchor) if anchor == first_id => {
                drop(state);
                shared.end_scan(ScanOutcome::LoopDetected, None);
                return;
            }
            Some(_) => {}
        }

        state.seen.extend(items.iter().map(|item| item.id));
        let snapshot = shared.inventory.upsert_all(items);
        if let Some(next_page) = &state.next_page {
            let _ = next_page.send(());
        }
        debug!(
            "Inventory page {} applied, {} item(s) seen",
            state.pages,
            state.seen.len()
        );
        drop(state);

        shared.observer.on_inventory_changed(&snapshot);
    }
}

impl ScannerShared {
    fn is_current(&self, generation: u64) -> bool {
        let state = self.state.lock();
        state.scanning && state.generation == generation
    }

    /// Open the scan to incoming pages. Returns `false` if the scan
    /// identified by `generation` is no longer running.
    fn begin_paging(&self, generation: u64) -> bool {
        let mut state = self.state.lock();
        if !state.scanning || state.generation != generation {
            return false;
        }
        state.requested = true;
        true
    }

    /// End the scan if it is still the one identified by `generation`
    /// (`None` matches any running scan).
    fn end_scan(&self, outcome: ScanOutcome, generation: Option<u64>) {
        let mut state = self.state.lock();
        if !state.scanning || generation.is_some_and(|g| g != state.generation) {
            return;
        }
        let (report, seen, worker) = state.finish(outcome);
        let snapshot = match outcome {
            ScanOutcome::Completed | ScanOutcome::LoopDetected => {
                let pruned = self.inventory.retain_ids(&seen);
                if pruned > 0 {
                    debug!("Pruned {} item(s) not seen by the scan", pruned);
                }
                Some(self.inventory.snapshot())
            }
            ScanOutcome::TimedOut | ScanOutcome::Cancelled => None,
        };
        drop(state);
        // Dropping the worker cancels it; a worker ending its own scan is
        // about to return anyway.
        drop(worker);

        match outcome {
            ScanOutcome::TimedOut => warn!(
                "Inventory scan got no response within {:?} after {} page(s)",
                self.config.timeout, report.pages
            ),
            _ => info!(
                "Inventory scan finished ({:?}): {} page(s), {} item(s)",
                report.outcome, report.pages, report.items
            ),
        }
        if let Some(snapshot) = snapshot {
            self.observer.on_inventory_changed(&snapshot);
        }
        self.observer.on_scan_state_changed(false);
    }

    async fn run(
        self: Arc<Self>,
        generation: u64,
        mut next_page: mpsc::UnboundedReceiver<()>,
        mut shutdown: Shutdown,
    ) {
        if shutdown.sleep(self.config.warmup).await.is_err() {
            debug!("Inventory scan #{} cancelled during warm-up", generation);
            return;
        }
        if !self.begin_paging(generation) {
            return;
        }
        send_logged(
            self.transport.as_ref(),
            Request::InventoryPage(PageCursor::First),
        );

        loop {
            let wait = tokio::time::timeout(self.config.timeout, next_page.recv());
            match shutdown.run(wait).await {
                Err(_) => return,
                // Sender dropped: the scan ended.
                Ok(Ok(None)) => return,
                Ok(Ok(Some(()))) => {
                    if shutdown.sleep(self.config.page_delay).await.is_err()
                        || !self.is_current(generation)
                    {
                        return;
                    }
                    send_logged(
                        self.transport.as_ref(),
                        Request::InventoryPage(PageCursor::Next),
                    );
                }
                Ok(Err(_elapsed)) => {
                    self.end_scan(ScanOutcome::TimedOut, Some(generation));
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichment::IdentityEnricher;
    use crate::test_support::{RecordingObserver, RecordingTransport, chair};

    struct Fixture {
        inventory: Arc<InventoryMirror>,
        transport: Arc<RecordingTransport>,
        observer: Arc<RecordingObserver>,
        scanner: PaginationScanner,
    }

    fn fixture() -> Fixture {
        let inventory = Arc::new(InventoryMirror::new(Arc::new(IdentityEnricher)));
        let transport = Arc::new(RecordingTransport::new());
        let observer = Arc::new(RecordingObserver::new());
        let scanner = PaginationScanner::new(
            ScanConfig::default(),
            Arc::clone(&inventory),
            transport.clone(),
            observer.clone(),
        );
        Fixture {
            inventory,
            transport,
            observer,
            scanner,
        }
    }

    fn page(ids: &[i64]) -> Vec<Item> {
        ids.iter().map(|&id| chair(id)).collect()
    }

    const FIRST: Request = Request::InventoryPage(PageCursor::First);
    const NEXT: Request = Request::InventoryPage(PageCursor::Next);

    #[tokio::test(start_paused = true)]
    async fn test_scan_waits_warmup_before_first_request() {
        let f = fixture();
        let start = tokio::time::Instant::now();
        assert!(f.scanner.start_scan());
        assert_eq!(f.transport.next_request().await, FIRST);
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert_eq!(f.observer.scan_states(), vec![true]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_stops_when_listing_wraps() {
        let f = fixture();
        f.scanner.start_scan();
        assert_eq!(f.transport.next_request().await, FIRST);
        f.scanner.handle_page(page(&[1, 2]));
        assert_eq!(f.transport.next_request().await, NEXT);
        f.scanner.handle_page(page(&[3, 4]));
        assert_eq!(f.transport.next_request().await, NEXT);
        f.scanner.handle_page(page(&[1, 2]));

        assert!(!f.scanner.is_scanning());
        assert_eq!(f.inventory.len(), 4);
        let report = f.scanner.last_report().unwrap();
        assert_eq!(report.outcome, ScanOutcome::LoopDetected);
        assert_eq!(report.items, 4);
        assert_eq!(f.observer.scan_states(), vec![true, false]);
        assert!(f.transport.is_quiet_for(Duration::from_secs(60)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_stops_on_empty_page() {
        let f = fixture();
        f.scanner.start_scan();
        assert_eq!(f.transport.next_request().await, FIRST);
        f.scanner.handle_page(page(&[1, 2]));
        assert_eq!(f.transport.next_request().await, NEXT);
        f.scanner.handle_page(Vec::new());

        assert!(!f.scanner.is_scanning());
        assert_eq!(f.inventory.len(), 2);
        assert_eq!(
            f.scanner.last_report().unwrap().outcome,
            ScanOutcome::Completed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_page_waits_page_delay() {
        let f = fixture();
        f.scanner.start_scan();
        f.transport.next_request().await;
        let received = tokio::time::Instant::now();
        f.scanner.handle_page(page(&[1]));
        assert_eq!(f.transport.next_request().await, NEXT);
        assert!(received.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicates_counted_once() {
        let f = fixture();
        f.scanner.start_scan();
        f.transport.next_request().await;
        f.scanner.handle_page(page(&[1, 2]));
        f.transport.next_request().await;
        f.scanner.handle_page(page(&[2, 3]));
        f.transport.next_request().await;
        f.scanner.handle_page(Vec::new());

        assert_eq!(f.inventory.summary().total_items, 3);
        assert_eq!(f.scanner.last_report().unwrap().items, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_scan_prunes_unseen_items() {
        let f = fixture();
        f.inventory.upsert(chair(99));
        f.scanner.start_scan();
        f.transport.next_request().await;
        f.scanner.handle_page(page(&[1]));
        f.transport.next_request().await;
        f.scanner.handle_page(Vec::new());

        assert!(!f.inventory.contains(99));
        assert!(f.inventory.contains(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_while_scanning_is_noop() {
        let f = fixture();
        assert!(f.scanner.start_scan());
        assert!(!f.scanner.start_scan());
        assert_eq!(f.transport.next_request().await, FIRST);
        assert!(f.transport.is_quiet_for(Duration::from_secs(20)).await);
        assert_eq!(f.observer.scan_states(), vec![true]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_page_ignored_while_idle() {
        let f = fixture();
        f.scanner.handle_page(page(&[1, 2]));
        assert!(f.inventory.is_empty());
        assert!(f.observer.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_page_during_warmup_is_ignored() {
        let f = fixture();
        f.scanner.start_scan();
        tokio::time::sleep(Duration::from_secs(1)).await;
        f.scanner.handle_page(page(&[1, 2]));
        assert!(f.inventory.is_empty());

        assert_eq!(f.transport.next_request().await, FIRST);
        f.scanner.handle_page(page(&[1, 2]));
        assert_eq!(f.transport.next_request().await, NEXT);
        f.scanner.handle_page(page(&[3]));

        assert!(f.scanner.is_scanning());
        assert_eq!(f.inventory.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_ends_scan_without_pruning() {
        let f = fixture();
        f.inventory.upsert(chair(99));
        f.scanner.start_scan();
        assert_eq!(f.transport.next_request().await, FIRST);
        f.scanner.handle_page(page(&[1]));
        assert_eq!(f.transport.next_request().await, NEXT);

        tokio::time::sleep(Duration::from_secs(31)).await;

        assert!(!f.scanner.is_scanning());
        assert_eq!(
            f.scanner.last_report().unwrap().outcome,
            ScanOutcome::TimedOut
        );
        assert!(f.inventory.contains(99));
        assert_eq!(f.observer.scan_states(), vec![true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_cancels_previous_worker() {
        let f = fixture();
        f.scanner.start_scan();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(f.scanner.restart_scan().await);
        let restarted = tokio::time::Instant::now();
        assert_eq!(f.transport.next_request().await, FIRST);
        assert!(restarted.elapsed() >= Duration::from_secs(5));
        assert!(f.transport.is_quiet_for(Duration::from_secs(10)).await);
        assert_eq!(f.observer.scan_states(), vec![true, false, true]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_stops_scan() {
        let f = fixture();
        f.scanner.start_scan();
        f.transport.next_request().await;
        f.scanner.handle_page(page(&[1]));

        f.scanner.reset().await;

        assert!(!f.scanner.is_scanning());
        assert!(f.scanner.last_report().is_none());
        assert!(f.transport.is_quiet_for(Duration::from_secs(60)).await);
        // A late page from the old scan is ignored.
        f.scanner.handle_page(page(&[2]));
        assert!(!f.inventory.contains(2));
    }
}
