use anyhow::{Context, Result};
use netmon::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize};
use tokio::sync::{broadcast, mpsc, watch};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let app_config = config::AppConfig::load()?;
    let interval = Arc::new(config::IntervalConfig::new(app_config.scheduler.interval_secs)?);

    let interface_repo = Arc::new(interface_repo::InterfaceRepo::new());
    let interfaces = interface_repo
        .list_interfaces()
        .await
        .context("enumerate network interfaces")?;
    for iface in &interfaces {
        tracing::info!(
            interface = %iface.name,
            mac = %iface.mac_address,
            addrs = ?iface.addrs,
            speed = iface.speed,
            is_up = iface.is_up,
            "interface"
        );
    }
    let store = Arc::new(counter_store::InterfaceCounterStore::with_interfaces(
        interfaces.iter().map(|i| i.name.clone()),
    ));

    let matcher = Arc::new(blocklist::BlocklistMatcher::load(&app_config.blocklist.path));
    let resolver = Arc::new(resolver::ReverseDnsResolver::new(
        app_config.resolver.to_resolver_config(),
    )?);
    let resolver_stats = resolver.shared_stats();

    let capture = if app_config.capture.enabled {
        let classifier = Arc::new(classifier::TrafficClassifier::new(
            matcher.clone(),
            resolver.clone(),
        ));
        let engine = Arc::new(capture::PacketCaptureEngine::new(classifier, store.clone()));
        match capture::open_sources(&app_config.capture).and_then(|s| engine.start(s)) {
            Ok(()) => {}
            Err(e) => {
                tracing::error!(
                    error = %e,
                    "packet capture unavailable; samples will carry speed tests and OS counters only"
                );
                engine.stop();
            }
        }
        Some(engine)
    } else {
        tracing::info!("packet capture disabled by configuration");
        None
    };

    let previous = match sink::load_history(&app_config.output.path).await {
        Ok(history) => {
            tracing::info!(
                path = %app_config.output.path,
                samples = history.len(),
                "sample history loaded"
            );
            history.into_iter().last()
        }
        Err(e) => {
            tracing::warn!(error = %e, path = %app_config.output.path, "cannot read sample history");
            None
        }
    };
    let sample_sink = sink::JsonLinesSink::open(&app_config.output.path)
        .await
        .with_context(|| format!("open sample history {}", app_config.output.path))?;

    let (samples_tx, _) = broadcast::channel::<models::Sample>(app_config.output.broadcast_capacity);
    let (write_tx, write_rx) = mpsc::channel::<models::Sample>(app_config.output.channel_capacity);
    let (latest_tx, latest_rx) = watch::channel(previous);
    let ws_sample_connections = Arc::new(AtomicUsize::new(0));
    let samples_saved_total = Arc::new(AtomicU64::new(0));
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

    let writer_handle = sink::spawn_sample_writer(write_rx, sample_sink, samples_saved_total.clone());

    let measurer = Arc::new(speedtest::HttpSpeedTest::new(app_config.speedtest.clone())?);
    let scheduler_handle = scheduler::spawn(
        scheduler::SchedulerDeps {
            sampler: scheduler::Sampler::new(
                measurer,
                store.clone(),
                Some(interface_repo.clone()),
                &app_config.scheduler,
            ),
            interval: interval.clone(),
            tx: samples_tx.clone(),
            write_tx,
            latest: latest_tx,
            store: store.clone(),
            resolver_stats: Some(resolver_stats.clone()),
            capture: capture.clone(),
            ws_sample_connections: ws_sample_connections.clone(),
            samples_saved_total,
            shutdown_rx,
        },
        &app_config.scheduler,
    );

    let app = routes::app(routes::AppState {
        samples_tx,
        latest: latest_rx,
        store,
        interval,
        interface_repo,
        capture: capture.clone(),
        resolver_stats: Some(resolver_stats),
        ws_sample_connections,
    });
    let addr = format!("{}:{}", app_config.server.host, app_config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = shutdown_signal() => {
            tracing::info!("Received shutdown signal");
        }
    }

    if let Some(engine) = capture {
        engine.stop();
        if let Err(e) = tokio::task::spawn_blocking(move || engine.join()).await {
            tracing::warn!(error = %e, "capture threads did not join cleanly");
        }
    }
    let _ = shutdown_tx.send(());
    let _ = scheduler_handle.await;
    let _ = writer_handle.await;
    tracing::info!("Shutdown complete");

    Ok(())
}
