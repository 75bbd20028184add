use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::Router;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cswitch_common::{BreakerSettings, HealthSink, TelemetrySink};
use cswitch_pricing::PricingTable;
use cswitch_relay::{
    AppGate, BreakerManager, EngineConfig, EventHub, Forwarder, ForwarderConfig, Registry,
    RelayEngine, Selector,
};
use cswitch_router::{admin_router, proxy_router};
use cswitch_storage::backup::BACKUP_RETENTION;
use cswitch_storage::telemetry::spawn_body_sweeper;
use cswitch_storage::{RelayStore, TelemetryBus, TelemetryBusConfig};

mod cli;
mod data_dir;
mod dsn;
mod marker;
mod sinks;

use cli::Cli;
use marker::CrashMarker;
use sinks::{BusHealthSink, BusTelemetrySink, StderrEventSink};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
const BODY_SWEEP_INTERVAL: Duration = Duration::from_secs(600);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let data_dir = data_dir::resolve_data_dir(&cli.data_dir);
    let dsn = dsn::resolve_dsn(&data_dir)?;
    let (crash_marker, crashed) = CrashMarker::arm(&data_dir)?;

    let store = RelayStore::connect(&dsn).await?;
    store.sync().await?;

    if crashed {
        warn!(event = "unclean_shutdown_detected", data_dir = %data_dir.display());
        let report = store.recover_providers().await?;
        info!(
            event = "recovery_finished",
            restored = report.restored_providers,
            deleted = report.deleted_providers
        );
        store.restore_sidecars(&data_dir).await?;
    }
    store.prune_backups(BACKUP_RETENTION).await?;

    let bus = TelemetryBus::spawn(store.clone(), TelemetryBusConfig::default());
    let telemetry_sink = Arc::new(BusTelemetrySink::new(&bus));
    let telemetry: Arc<dyn TelemetrySink> = telemetry_sink.clone();
    let health_sink: Arc<dyn HealthSink> = Arc::new(BusHealthSink::new(&bus));

    let breakers = Arc::new(BreakerManager::new(BreakerSettings::default(), health_sink));
    breakers.rehydrate(&store.load_health().await?);

    let registry = Arc::new(Registry::load(store.clone()).await?);
    let gate = Arc::new(AppGate::load(store.clone()).await?);
    let events = EventHub::new(256);
    if cli.events_log {
        events.add_sink(Arc::new(StderrEventSink));
    }

    let engine = Arc::new(RelayEngine::new(
        registry,
        breakers,
        gate,
        Selector::new(cli.round_robin),
        Forwarder::new(ForwarderConfig::default())?,
        Arc::new(PricingTable::new()),
        telemetry,
        events,
        EngineConfig {
            body_logging: cli.body_logging,
            body_ttl: Duration::from_secs(cli.body_ttl_hours * 3600),
        },
    ));

    if cli.body_logging {
        spawn_body_sweeper(store.clone(), BODY_SWEEP_INTERVAL);
    }

    let app = Router::new()
        .merge(proxy_router(engine.clone()))
        .nest("/admin", admin_router(engine.clone(), store.clone()));

    let bind = format!("{}:{}", cli.host, cli.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(event = "listening", addr = %bind, data_dir = %data_dir.display());

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;

    info!(event = "shutting_down");
    bus.shutdown(SHUTDOWN_GRACE).await;
    let dropped = telemetry_sink.dropped();
    if dropped > 0 {
        warn!(event = "telemetry_dropped_total", dropped);
    }
    crash_marker.disarm();
    Ok(())
}
