//! furnisync demo: drives the sync engine against an in-process server.
//!
//! Loads a room, scans the inventory, captures the room layout, picks
//! everything up, rescans, puts the layout back, and trades with a
//! simulated counterparty.
//!
//! Run with: `cargo run -p furnisync-demo -- --warmup-ms 200`

mod observer;
mod server;

use std::sync::Arc;

use clap::Parser;
use furnisync_config::{CliArgs, Config};
use furnisync_core::{
    BatchReport, BulkConfig, Catalog, EngineConfig, GroupKey, ItemKind, PacketLogger, ScanConfig,
    SyncEngine, TradeConfig, TradePhase,
};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::observer::ConsoleObserver;
use crate::server::{ServerCommand, SimulatedServer};

const EXTERNAL_TEXTS: &str = "\
furni_chair_name=Plastic Chair
furni_table_plasto_name=Plastic Table
furni_throne_name=Throne
furni_rare_dragonlamp_name=Dragon Lamp
poster_5003_name=poster_5003
";

const PRICES: &[(&str, f64)] = &[
    ("Plastic Chair", 0.25),
    ("Plastic Table", 0.5),
    ("Throne", 40.0),
    ("Dragon Lamp", 12.0),
    ("Purple Garland", 1.5),
];

const DEFAULT_PARTY: &str = "demo_player";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Load config from --config when given, then apply CLI overrides.
    let mut config = match &args.config {
        Some(dir) => Config::load_or_create(dir)?,
        None => Config::default(),
    };
    config.apply_cli_overrides(&args);
    if config.trade.local_party.is_empty() {
        config.trade.local_party = DEFAULT_PARTY.to_string();
    }

    let log_dir = args.config.as_ref().map(|dir| dir.join("logs"));
    furnisync_log::init_logging(log_dir.as_deref(), cfg!(debug_assertions), Some(&config));

    info!("furnisync demo as {}", config.trade.local_party);
    info!(
        "Scan: warm-up {}ms, page delay {}ms, timeout {}s | Request spacing: {}ms",
        config.scan.warmup_ms,
        config.scan.page_delay_ms,
        config.scan.timeout_secs,
        config.bulk.request_spacing_ms
    );

    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let server = SimulatedServer::new(&config.trade.local_party);
    let server_task = tokio::spawn(server.run(
        request_rx,
        command_rx,
        event_tx,
        shutdown_rx.clone(),
    ));

    let transport = Arc::new(PacketLogger::new(
        SimulatedServer::link(request_tx),
        config.debug.log_packets,
    ));
    let catalog = Catalog::new()
        .parse_external_texts(EXTERNAL_TEXTS)
        .with_prices(PRICES.iter().copied());
    let observer = Arc::new(ConsoleObserver::new());
    let engine = Arc::new(SyncEngine::new(
        engine_config(&config),
        transport,
        Arc::new(catalog),
        observer.clone(),
    ));

    // Feed decoded server events into the engine.
    let pump_engine = Arc::clone(&engine);
    let mut pump_shutdown = shutdown_rx.clone();
    let pump_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                event = event_rx.recv() => {
                    let Some(event) = event else { break };
                    pump_engine.handle_event(event);
                }
                _ = pump_shutdown.changed() => {
                    if *pump_shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    });

    let result = run_scenario(&engine, &observer, &command_tx, &config).await;
    if let Err(ref e) = result {
        warn!("Demo stopped early: {}", e);
    }

    engine.reset().await;
    let _ = shutdown_tx.send(true);
    let _ = server_task.await;
    let _ = pump_task.await;
    info!("Demo finished");
    result
}

fn engine_config(config: &Config) -> EngineConfig {
    EngineConfig {
        scan: ScanConfig {
            warmup: config.scan.warmup(),
            page_delay: config.scan.page_delay(),
            timeout: config.scan.timeout(),
        },
        bulk: BulkConfig {
            request_spacing: config.bulk.request_spacing(),
        },
        trade: TradeConfig {
            local_party: config.trade.local_party.clone(),
            offer_spacing: config.bulk.request_spacing(),
        },
    }
}

async fn run_scenario(
    engine: &SyncEngine,
    observer: &ConsoleObserver,
    commands: &mpsc::UnboundedSender<ServerCommand>,
    config: &Config,
) -> Result<(), Box<dyn std::error::Error>> {
    commands.send(ServerCommand::EnterRoom)?;
    observer.room_loaded().await;
    info!("Room wealth:\n{}", engine.room_summary());

    engine.start_scan();
    observer.scan_finished().await;
    if let Some(report) = engine.scanner().last_report() {
        info!(
            "Scan {:?} after {} page(s), {} item(s)",
            report.outcome, report.pages, report.items
        );
    }
    info!("Inventory:\n{}", engine.inventory().summary());

    let capture = engine.capture_room();
    let validation = engine.validate(&capture);
    for group in validation.shortfalls() {
        warn!(
            "{} short by {} (need {}, have {})",
            group.name,
            group.shortfall(),
            group.required,
            group.available
        );
    }
    info!(
        "Captured {} object(s); inventory can replicate: {}",
        capture.len(),
        validation.is_satisfied()
    );

    let room = engine.room().snapshot();
    let ids = room
        .floor
        .iter()
        .map(|obj| obj.id)
        .chain(room.wall.iter().map(|item| item.id))
        .collect();
    let picked = engine
        .pickup(
            ids,
            Some(Box::new(|report: &BatchReport| {
                info!(
                    "Pickup done: {} picked, {} skipped",
                    report.completed,
                    report.skipped.len()
                );
            })),
        )
        .wait()
        .await?;
    info!("Room emptied ({} object(s))", picked.completed);

    // Picked-up floor objects only get their inventory ids from a scan.
    engine.restart_scan().await;
    observer.scan_finished().await;

    let placed = engine.replicate(&capture).wait().await?;
    info!("Layout restored with {} placement(s)", placed.completed);

    commands.send(ServerCommand::OpenTrade)?;
    observer
        .trade_reaches(|trade| trade.phase == TradePhase::Open)
        .await;
    let chairs = GroupKey::new("chair", ItemKind::Floor, "");
    engine.offer_group(chairs, 2);
    observer.trade_reaches(|trade| trade.offered >= 2).await;
    engine.trade().accept();
    observer.trades_completed(1).await;

    if let Some(path) = &config.trade.log_file {
        engine.trade().log().save(path)?;
    }
    info!("Inventory after trading:\n{}", engine.inventory().summary());
    Ok(())
}
