//! Démon PMOBridge : expose un MediaServer UPnP dont le contenu vient de
//! backends externes pilotés en RPC, et sert les flux correspondants.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use pmoconfig::get_config;
use pmodevice::{DeviceRegistry, EventSink, spawn_event_loop};
use pmogateway::{StreamMode, StreamResolver, streaming_router};
use pmoplugin::PluginRegistry;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod control;
mod events;
mod mediaserver;
mod plugins;

use control::UpnpState;
use events::SubscriptionStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ========== PHASE 1 : Configuration et journalisation ==========

    let config = get_config();
    init_logging();

    info!("🚀 Starting PMOBridge...");

    let port = config.get_http_port();
    let base_url = config.get_base_url();
    let host_port = format!("{base_url}:{port}");
    let friendly_name = config.get_friendly_name();
    let udn = format!(
        "uuid:{}",
        config
            .get_device_udn("mediaserver", &friendly_name)
            .context("Failed to allocate a device UDN")?
    );

    // ========== PHASE 2 : Backends et appareil exposé ==========

    info!("🎵 Registering content plugins...");
    let plugins = Arc::new(PluginRegistry::new());
    plugins::register_plugins(&config, &plugins, &host_port).await?;
    info!("✅ {} content plugin(s) registered", plugins.count().await);
    for plugin in plugins.list().await {
        info!("  - {} ({})", plugin.name(), plugin.path_prefix());
    }

    info!("📡 Registering UPnP device...");
    let devices = Arc::new(DeviceRegistry::new());
    let device = mediaserver::build_media_server(&udn, &friendly_name, plugins.clone());
    devices.register(device).await?;

    // ========== PHASE 3 : Serveur HTTP et boucle d'événements ==========

    let mode = match StreamMode::from_name(&config.get_stream_mode()) {
        Some(mode) => mode,
        None => {
            warn!(
                mode = %config.get_stream_mode(),
                "⚠️ Unknown stream mode, falling back to redirect"
            );
            StreamMode::Redirect
        }
    };
    let resolver = Arc::new(StreamResolver::new(plugins.clone(), mode));

    let subscriptions = Arc::new(SubscriptionStore::new(
        config.get_subscription_timeout().unwrap_or(1800),
    ));
    let state = UpnpState {
        devices: devices.clone(),
        subscriptions: subscriptions.clone(),
        udn: udn.clone(),
    };
    let app = control::upnp_router(state).merge(streaming_router(resolver));

    info!("🌐 Starting HTTP server...");
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    let server_task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "💥 HTTP server stopped");
        }
    });

    let sink: Arc<dyn EventSink> = subscriptions.clone();
    let event_task = spawn_event_loop(devices.clone(), sink);

    info!(
        "✅ MediaServer '{}' ready at http://{}:{}/",
        friendly_name, base_url, port
    );
    info!("Press Ctrl+C to stop...");
    signal::ctrl_c().await.context("failed to listen for ctrl_c")?;

    info!("🛑 Shutting down...");
    event_task.abort();
    server_task.abort();
    Ok(())
}

/// Initialise la journalisation console selon la configuration.
///
/// `RUST_LOG` garde la priorité sur le niveau configuré.
fn init_logging() {
    let config = get_config();
    if !config.get_log_enable_console().unwrap_or(true) {
        return;
    }
    let level = config
        .get_log_min_level()
        .unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
