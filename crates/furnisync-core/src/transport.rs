//! Boundary with the packet transport.
//!
//! The transport owns framing and the connection; the core hands it typed
//! [`Request`]s and receives already-decoded [`InboundEvent`]s.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::item::{Item, ItemKind};
use crate::room::{RoomContents, RoomObject};
use crate::trade::TradeOffers;

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Which inventory page to ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageCursor {
    /// Restart the listing from the first page.
    First,
    /// The page after the last one delivered.
    Next,
}

/// A request the core asks the transport to send.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Ask for one page of the inventory listing.
    InventoryPage(PageCursor),
    /// Pick an object up from the room into the inventory.
    Pickup {
        /// Room object id.
        id: i64,
        /// Floor or wall, selects the request variant.
        kind: ItemKind,
    },
    /// Place an inventory item on the floor.
    PlaceFloor {
        /// Inventory item id.
        item_id: i64,
        /// Tile X.
        x: i32,
        /// Tile Y.
        y: i32,
        /// Footprint width.
        width: u32,
        /// Footprint length.
        height: u32,
        /// Rotation.
        direction: u8,
    },
    /// Hang an inventory item on a wall.
    PlaceWall {
        /// Inventory item id.
        item_id: i64,
        /// Wall location descriptor.
        location: String,
    },
    /// Put an item on the trade table.
    TradeOffer {
        /// Inventory item id.
        item_id: i64,
    },
    /// Accept the current offers.
    TradeAccept,
    /// Withdraw acceptance.
    TradeUnaccept,
    /// Cancel the trade.
    TradeClose,
}

impl Request {
    /// Packet header name in the client protocol.
    pub fn header(&self) -> &'static str {
        match self {
            Request::InventoryPage(_) => "GETSTRIP",
            Request::Pickup { .. } => "ADDSTRIPITEM",
            Request::PlaceFloor { .. } | Request::PlaceWall { .. } => "PLACESTUFF",
            Request::TradeOffer { .. } => "TRADE_ADDITEM",
            Request::TradeAccept => "TRADE_ACCEPT",
            Request::TradeUnaccept => "TRADE_UNACCEPT",
            Request::TradeClose => "TRADE_CLOSE",
        }
    }

    /// Text payload in the client protocol.
    pub fn payload(&self) -> String {
        match self {
            Request::InventoryPage(PageCursor::First) => "update".to_string(),
            Request::InventoryPage(PageCursor::Next) => "next".to_string(),
            Request::Pickup {
                id,
                kind: ItemKind::Floor,
            } => format!("new stuff {id}"),
            Request::Pickup {
                id,
                kind: ItemKind::Wall,
            } => format!("new item {id}"),
            Request::PlaceFloor {
                item_id,
                x,
                y,
                width,
                height,
                direction,
            } => format!("{item_id} {x} {y} {width} {height} {direction}"),
            Request::PlaceWall { item_id, location } => format!("{item_id} {location}"),
            Request::TradeOffer { item_id } => item_id.to_string(),
            Request::TradeAccept | Request::TradeUnaccept | Request::TradeClose => String::new(),
        }
    }
}

/// Errors a transport can report for a send.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// No connection to the game server.
    #[error("transport is disconnected")]
    Disconnected,
    /// The transport refused the request.
    #[error("request rejected: {0}")]
    Rejected(String),
}

/// Outbound side of the packet transport.
pub trait Transport: Send + Sync {
    /// Queue a request for sending. Must not block on the network.
    fn send(&self, request: Request) -> Result<(), TransportError>;
}

/// Send and log failures instead of propagating them.
///
/// Requests are fire-and-forget from the core's point of view; a failed
/// send looks the same as a request the server dropped.
pub(crate) fn send_logged(transport: &dyn Transport, request: Request) -> bool {
    let header = request.header();
    match transport.send(request) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("Failed to send {}: {}", header, e);
            false
        }
    }
}

/// Transport decorator that traces every outbound request while enabled.
pub struct PacketLogger<T> {
    inner: T,
    enabled: AtomicBool,
}

impl<T: Transport> PacketLogger<T> {
    /// Wrap `inner`, logging from the start if `enabled`.
    pub fn new(inner: T, enabled: bool) -> Self {
        Self {
            inner,
            enabled: AtomicBool::new(enabled),
        }
    }

    /// Turn logging on or off.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// The wrapped transport.
    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl<T: Transport> Transport for PacketLogger<T> {
    fn send(&self, request: Request) -> Result<(), TransportError> {
        if self.enabled.load(Ordering::Relaxed) {
            tracing::debug!(
                target: "furnisync::packets",
                "Outgoing packet: {}, Data: {:?}",
                request.header(),
                request.payload()
            );
        }
        self.inner.send(request)
    }
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// A decoded event delivered by the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// One page of the inventory listing.
    PageReceived(Vec<Item>),
    /// Authoritative contents of both sides of the trade.
    TradeOfferUpdated(TradeOffers),
    /// A party accepted or withdrew acceptance.
    TradeAccepted {
        /// Party name.
        party: String,
        /// New acceptance state.
        accepted: bool,
    },
    /// Trade completed with these final offers.
    TradeCompleted(TradeOffers),
    /// Trade window closed.
    TradeClosed,
    /// Full room contents broadcast.
    RoomContentsLoaded(RoomContents),
    /// A single object appeared in the room.
    RoomObjectAdded(RoomObject),
    /// A single object left the room.
    RoomObjectRemoved(i64),
}

impl InboundEvent {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            InboundEvent::PageReceived(_) => "PageReceived",
            InboundEvent::TradeOfferUpdated(_) => "TradeOfferUpdated",
            InboundEvent::TradeAccepted { .. } => "TradeAccepted",
            InboundEvent::TradeCompleted(_) => "TradeCompleted",
            InboundEvent::TradeClosed => "TradeClosed",
            InboundEvent::RoomContentsLoaded(_) => "RoomContentsLoaded",
            InboundEvent::RoomObjectAdded(_) => "RoomObjectAdded",
            InboundEvent::RoomObjectRemoved(_) => "RoomObjectRemoved",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingTransport;

    #[test]
    fn test_page_payloads() {
        let first = Request::InventoryPage(PageCursor::First);
        assert_eq!(first.header(), "GETSTRIP");
        assert_eq!(first.payload(), "update");
        assert_eq!(Request::InventoryPage(PageCursor::Next).payload(), "next");
    }

    #[test]
    fn test_pickup_payload_depends_on_kind() {
        let floor = Request::Pickup {
            id: 12,
            kind: ItemKind::Floor,
        };
        let wall = Request::Pickup {
            id: 13,
            kind: ItemKind::Wall,
        };
        assert_eq!(floor.header(), "ADDSTRIPITEM");
        assert_eq!(floor.payload(), "new stuff 12");
        assert_eq!(wall.payload(), "new item 13");
    }

    #[test]
    fn test_placement_payloads() {
        let floor = Request::PlaceFloor {
            item_id: 5,
            x: 3,
            y: 4,
            width: 1,
            height: 2,
            direction: 6,
        };
        assert_eq!(floor.payload(), "5 3 4 1 2 6");
        let wall = Request::PlaceWall {
            item_id: 6,
            location: ":w=1,2 l=3,4 r".to_string(),
        };
        assert_eq!(wall.payload(), "6 :w=1,2 l=3,4 r");
    }

    #[test]
    fn test_packet_logger_forwards() {
        let logger = PacketLogger::new(RecordingTransport::new(), true);
        logger.send(Request::TradeAccept).unwrap();
        logger.set_enabled(false);
        logger.send(Request::TradeClose).unwrap();
        assert_eq!(
            logger.inner().sent(),
            vec![Request::TradeAccept, Request::TradeClose]
        );
    }

    #[test]
    fn test_send_logged_swallows_errors() {
        let transport = RecordingTransport::new();
        transport.disconnect();
        assert!(!send_logged(&transport, Request::TradeAccept));
        assert!(transport.sent().is_empty());
    }
}
