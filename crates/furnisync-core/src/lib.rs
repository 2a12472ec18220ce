//! Client-side state synchronization for a furniture trading game.
//!
//! Keeps local mirrors of the player's inventory and the current room
//! consistent with a server that only offers paginated listings and one
//! item per request. The mirrors are fed by decoded [`InboundEvent`]s and
//! every outbound request goes through a [`Transport`]; presentation layers
//! subscribe through [`SyncObserver`].

pub mod bulk;
pub mod engine;
pub mod enrichment;
pub mod error;
pub mod inventory;
pub mod item;
pub mod observer;
pub mod room;
pub mod scanner;
pub mod task;
pub mod trade;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use bulk::{BatchHandle, BatchReport, BulkConfig, BulkQueue, PickupCallback};
pub use engine::{EngineConfig, SyncEngine};
pub use enrichment::{Catalog, Enricher, Enrichment, IdentityEnricher};
pub use error::SyncError;
pub use inventory::{InventoryMirror, InventorySnapshot, ItemGroup, Summary};
pub use item::{GroupKey, Item, ItemKind};
pub use observer::{NullObserver, SyncObserver};
pub use room::{
    FloorObject, Placement, RoomCapture, RoomContents, RoomMirror, RoomObject, RoomSnapshot,
    ValidationReport, WallItem,
};
pub use scanner::{PaginationScanner, ScanConfig, ScanOutcome, ScanReport};
pub use task::{Cancelled, Pacer, Shutdown, Worker};
pub use trade::{
    TradeConfig, TradeLog, TradeLogEntry, TradeLogError, TradeManager, TradeOffer, TradeOffers,
    TradePhase, TradeView,
};
pub use transport::{InboundEvent, PacketLogger, PageCursor, Request, Transport, TransportError};
