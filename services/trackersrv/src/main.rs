//! Tracker fleet service
//!
//! Modem supervisor, TCP device listener and message router over one
//! in-memory document store.

use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use common::service_bootstrap::ServiceInfo;
use errors::FleetResult;
use trackersrv::{
    bootstrap::{self, Args, ServiceArgs, DEFAULT_PORT},
    config::TrackerConfig,
    device::TRACKERS,
    geo::OfflineGeolocator,
    modem::{ModemSlot, ModemSupervisor},
    notify::LogNotifier,
    store::{DocumentStore, MemoryStore},
    tcp::TcpServer,
    EngineContext, MessageRouter,
};

#[tokio::main]
async fn main() -> FleetResult<()> {
    let args = Args::parse();
    let service_args: ServiceArgs = args.into();

    let service_info = ServiceInfo::new(
        "trackersrv",
        "GPS/GSM Tracker Fleet Service - SMS and GPRS device links",
        DEFAULT_PORT,
    );

    let config = TrackerConfig::load(service_args.config.as_deref())?;
    bootstrap::initialize_logging(&service_args, &service_info, &config.logging)?;
    if service_args.show_banner() {
        common::service_bootstrap::print_startup_banner(&service_info);
    }

    let bind = bootstrap::validate_configuration(&service_args, &config)?;
    if service_args.validate {
        info!("Validation completed successfully");
        return Ok(());
    }

    run_service(config, bind, service_args.config).await
}

async fn run_service(
    config: TrackerConfig,
    bind: String,
    config_path: Option<String>,
) -> FleetResult<()> {
    let store: Arc<dyn DocumentStore> = match &config.store.seed_file {
        Some(path) => {
            info!("Seeding document store from {}", path);
            Arc::new(MemoryStore::from_seed_file(path)?)
        },
        None => Arc::new(MemoryStore::new()),
    };
    let cancel = CancellationToken::new();
    tokio::spawn(bootstrap::reload_log_level_on_hangup(
        config_path,
        cancel.clone(),
    ));

    // ============ Modem ============
    let (modem_tx, modem_rx) = mpsc::unbounded_channel();
    let slot = if config.modem.enabled {
        let supervisor =
            ModemSupervisor::new(config.modem.clone(), config.assembly.limits(), modem_tx);
        let slot = supervisor.slot();
        tokio::spawn(supervisor.run(cancel.clone()));
        slot
    } else {
        info!("Modem disabled, SMS devices are unreachable");
        drop(modem_tx);
        Arc::new(ModemSlot::default())
    };

    let ctx = EngineContext::new(
        store.clone(),
        Arc::new(LogNotifier),
        Arc::new(OfflineGeolocator),
        slot,
        config.service.name.clone(),
    )
    .with_reconcile(config.reconcile.clone());
    let router = Arc::new(MessageRouter::new(ctx, &config.modem.country_code));

    // ============ TCP device link ============
    let (tcp_tx, tcp_rx) = mpsc::unbounded_channel();
    if config.tcp.enabled {
        let server = TcpServer::bind(&bind, config.tcp.clone(), tcp_tx).await?;
        tokio::spawn(server.run(cancel.clone()));
    } else {
        info!("TCP listener disabled");
        drop(tcp_tx);
    }

    // ============ Router ============
    let changes = store.subscribe(TRACKERS);
    let router_task = tokio::spawn(router.run(modem_rx, tcp_rx, changes, cancel.clone()));
    info!("trackersrv started");

    common::shutdown::cancel_on_shutdown(cancel.clone()).await;
    if let Err(e) = router_task.await {
        error!("Router task failed: {}", e);
    }
    info!("trackersrv stopped");
    Ok(())
}
