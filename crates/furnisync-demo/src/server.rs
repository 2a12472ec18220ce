//! In-process stand-in for the game server.
//!
//! Answers the client's requests the way the real server does: paginated
//! listings that wrap around instead of ending, one item per pickup or
//! placement, and a counterparty that accepts whatever is offered.

use std::collections::BTreeMap;

use furnisync_core::{
    FloorObject, InboundEvent, Item, ItemKind, PageCursor, Request, RoomContents, RoomObject,
    Transport, TradeOffer, TradeOffers, TransportError, WallItem,
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

const PAGE_SIZE: usize = 9;

/// Out-of-band nudges that make the simulated server act on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerCommand {
    /// Broadcast the room contents, as on entering the room.
    EnterRoom,
    /// Have the trader open a trade window.
    OpenTrade,
}

/// Client side of the simulated connection.
pub struct ServerLink {
    requests: mpsc::UnboundedSender<Request>,
}

impl Transport for ServerLink {
    fn send(&self, request: Request) -> Result<(), TransportError> {
        self.requests
            .send(request)
            .map_err(|_| TransportError::Disconnected)
    }
}

/// Simulated server state.
pub struct SimulatedServer {
    player: String,
    trader: String,
    inventory: BTreeMap<i64, Item>,
    floor: BTreeMap<i64, FloorObject>,
    wall: BTreeMap<i64, WallItem>,
    next_id: i64,
    page: usize,
    trade_open: bool,
    offered: Vec<Item>,
    trader_items: Vec<Item>,
}

impl SimulatedServer {
    /// A server with a furnished room and a stocked inventory for `player`.
    pub fn new(player: &str) -> Self {
        let mut server = Self {
            player: player.to_string(),
            trader: "trader_bob".to_string(),
            inventory: BTreeMap::new(),
            floor: BTreeMap::new(),
            wall: BTreeMap::new(),
            next_id: 1000,
            page: 0,
            trade_open: false,
            offered: Vec::new(),
            trader_items: Vec::new(),
        };
        for _ in 0..12 {
            server.stock("chair", ItemKind::Floor, "");
        }
        for _ in 0..4 {
            server.stock("table_plasto", ItemKind::Floor, "4");
        }
        for _ in 0..3 {
            server.stock("poster", ItemKind::Wall, "5003");
        }
        server.stock("throne", ItemKind::Floor, "");

        for (x, class) in [(1, "chair"), (2, "chair"), (3, "table_plasto")] {
            let id = server.allocate_id();
            server.floor.insert(
                id,
                FloorObject {
                    id,
                    class: class.to_string(),
                    variant: if class == "chair" { String::new() } else { "4".to_string() },
                    x,
                    y: 2,
                    z: 0.0,
                    width: 1,
                    height: 1,
                    direction: 2,
                    owner: server.player.clone(),
                },
            );
        }
        let id = server.allocate_id();
        server.wall.insert(
            id,
            WallItem {
                id,
                class: "poster".to_string(),
                variant: "5003".to_string(),
                location: ":w=3,1 l=12,40 r".to_string(),
                owner: server.player.clone(),
            },
        );
        server
    }

    /// The client's transport for a request channel.
    pub fn link(requests: mpsc::UnboundedSender<Request>) -> ServerLink {
        ServerLink { requests }
    }

    fn room_contents(&self) -> InboundEvent {
        InboundEvent::RoomContentsLoaded(RoomContents {
            floor: Some(self.floor.values().cloned().collect()),
            wall: Some(self.wall.values().cloned().collect()),
        })
    }

    /// Serve requests and commands until shutdown or until the client hangs
    /// up.
    pub async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<Request>,
        mut commands: mpsc::UnboundedReceiver<ServerCommand>,
        events: mpsc::UnboundedSender<InboundEvent>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            let produced = tokio::select! {
                request = requests.recv() => {
                    let Some(request) = request else { break };
                    self.handle(request)
                }
                command = commands.recv() => {
                    match command {
                        Some(ServerCommand::EnterRoom) => vec![self.room_contents()],
                        Some(ServerCommand::OpenTrade) => self.open_trade(),
                        None => break,
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    Vec::new()
                }
            };
            for event in produced {
                if events.send(event).is_err() {
                    return;
                }
            }
        }
        debug!("Simulated server stopped");
    }

    /// Open a trade window; the trader then puts one item on the table.
    fn open_trade(&mut self) -> Vec<InboundEvent> {
        self.trade_open = true;
        self.offered.clear();
        self.trader_items.clear();
        let opened = InboundEvent::TradeOfferUpdated(self.offers(false));

        let lamp_id = self.allocate_id();
        self.trader_items = vec![
            Item::new(lamp_id, "rare_dragonlamp", ItemKind::Floor, "1")
                .with_owner(self.trader.clone()),
        ];
        vec![opened, InboundEvent::TradeOfferUpdated(self.offers(false))]
    }

    fn handle(&mut self, request: Request) -> Vec<InboundEvent> {
        match request {
            Request::InventoryPage(cursor) => vec![InboundEvent::PageReceived(self.page(cursor))],
            Request::Pickup { id, .. } => self.pickup(id),
            Request::PlaceFloor {
                item_id,
                x,
                y,
                width,
                height,
                direction,
            } => {
                let Some(item) = self.inventory.remove(&item_id) else {
                    return Vec::new();
                };
                let object = FloorObject {
                    id: item.id,
                    class: item.class,
                    variant: item.variant,
                    x,
                    y,
                    z: 0.0,
                    width,
                    height,
                    direction,
                    owner: item.owner,
                };
                self.floor.insert(object.id, object.clone());
                vec![InboundEvent::RoomObjectAdded(RoomObject::Floor(object))]
            }
            Request::PlaceWall { item_id, location } => {
                let Some(item) = self.inventory.remove(&item_id) else {
                    return Vec::new();
                };
                let object = WallItem {
                    id: item.id,
                    class: item.class,
                    variant: item.variant,
                    location,
                    owner: item.owner,
                };
                self.wall.insert(object.id, object.clone());
                vec![InboundEvent::RoomObjectAdded(RoomObject::Wall(object))]
            }
            Request::TradeOffer { item_id } => {
                if !self.trade_open || self.offered.iter().any(|item| item.id == item_id) {
                    return Vec::new();
                }
                let Some(item) = self.inventory.get(&item_id).cloned() else {
                    return Vec::new();
                };
                self.offered.push(item);
                vec![InboundEvent::TradeOfferUpdated(self.offers(false))]
            }
            Request::TradeAccept if self.trade_open => self.complete_trade(),
            Request::TradeUnaccept if self.trade_open => {
                vec![InboundEvent::TradeAccepted {
                    party: self.player.clone(),
                    accepted: false,
                }]
            }
            Request::TradeClose if self.trade_open => {
                self.trade_open = false;
                vec![InboundEvent::TradeClosed]
            }
            Request::TradeAccept | Request::TradeUnaccept | Request::TradeClose => Vec::new(),
        }
    }

    fn page(&mut self, cursor: PageCursor) -> Vec<Item> {
        self.page = match cursor {
            PageCursor::First => 0,
            PageCursor::Next => self.page + 1,
        };
        if self.page * PAGE_SIZE >= self.inventory.len() {
            // The listing never ends; it starts over.
            self.page = 0;
        }
        self.inventory
            .values()
            .skip(self.page * PAGE_SIZE)
            .take(PAGE_SIZE)
            .cloned()
            .collect()
    }

    fn pickup(&mut self, id: i64) -> Vec<InboundEvent> {
        let item = if let Some(object) = self.floor.remove(&id) {
            // Floor objects get a fresh inventory id.
            let new_id = self.allocate_id();
            Item::new(new_id, object.class, ItemKind::Floor, object.variant)
        } else if let Some(object) = self.wall.remove(&id) {
            Item::new(object.id, object.class, ItemKind::Wall, object.variant)
        } else {
            return Vec::new();
        };
        self.inventory
            .insert(item.id, item.with_owner(self.player.clone()));
        vec![InboundEvent::RoomObjectRemoved(id)]
    }

    fn complete_trade(&mut self) -> Vec<InboundEvent> {
        let offers = self.offers(true);
        for item in &self.offered {
            self.inventory.remove(&item.id);
        }
        for item in self.trader_items.drain(..) {
            self.inventory
                .insert(item.id, item.with_owner(self.player.clone()));
        }
        info!(
            "Simulated trade completed: {} item(s) for the trader",
            self.offered.len()
        );
        self.offered.clear();
        self.trade_open = false;
        vec![
            InboundEvent::TradeAccepted {
                party: self.trader.clone(),
                accepted: true,
            },
            InboundEvent::TradeCompleted(offers),
            InboundEvent::TradeClosed,
        ]
    }

    fn offers(&self, accepted: bool) -> TradeOffers {
        TradeOffers {
            first: TradeOffer {
                party: self.player.clone(),
                items: self.offered.clone(),
                accepted,
            },
            second: TradeOffer {
                party: self.trader.clone(),
                items: self.trader_items.clone(),
                accepted,
            },
        }
    }

    fn stock(&mut self, class: &str, kind: ItemKind, variant: &str) {
        let id = self.allocate_id();
        self.inventory.insert(
            id,
            Item::new(id, class, kind, variant).with_owner(self.player.clone()),
        );
    }

    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}
