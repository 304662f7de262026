use anyhow::Result;
use botsense_bot_detect::BotDetector;
use botsense_server::{build_router, BotsenseService, LoadedConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().init();

    // Parse command-line args for config path
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/botsense.yaml".to_string());

    info!(config_path = %config_path, "starting botsense");

    let loaded = LoadedConfig::load(&config_path)?;
    let config = loaded.config.clone();

    let detector = Arc::new(BotDetector::new(&config));
    let admin_state = botsense_admin::new_shared_state(config.clone(), detector.clone());
    let service = Arc::new(BotsenseService::new(&config, admin_state.clone())?);

    // Low-priority sweep bounding session and cache memory.
    {
        let detector = detector.clone();
        let reputation = service.reputation.clone();
        let period = Duration::from_secs(config.sessions.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                detector.sweep_sessions(Instant::now());
                reputation.purge_cache();
            }
        });
    }

    spawn_list_reload(loaded, service.clone());

    if config.server.admin.enabled {
        let state = admin_state.clone();
        let admin_listen = config.server.admin.listen.clone();
        tokio::spawn(async move {
            info!(addr = %admin_listen, "starting admin API");
            if let Err(e) = botsense_admin::run_admin_server(state, &admin_listen).await {
                error!(error = %e, "admin API server error");
            }
        });
    }

    let listener = tokio::net::TcpListener::bind(&config.server.listen).await?;
    info!(addr = %config.server.listen, "public API listening");

    axum::serve(
        listener,
        build_router(service).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutting down");
    })
    .await?;

    Ok(())
}

/// Reload the IP allow/block lists from a re-read config on SIGHUP.
#[cfg(unix)]
fn spawn_list_reload(mut loaded: LoadedConfig, service: Arc<BotsenseService>) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGHUP, list reload disabled");
                return;
            }
        };
        while hangup.recv().await.is_some() {
            let lists = match loaded.reload() {
                Ok(config) => config.ip_reputation.clone(),
                Err(e) => {
                    warn!(error = %e, "config reload failed, keeping current lists");
                    continue;
                }
            };
            if let Err(e) = service
                .reputation
                .lists()
                .reload_from_config(lists.blocklist.as_deref(), lists.allowlist.as_deref())
            {
                warn!(error = %e, "IP list reload failed");
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_list_reload(_loaded: LoadedConfig, _service: Arc<BotsenseService>) {}
