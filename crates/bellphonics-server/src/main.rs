//! Bellphonics relay binary.
//!
//! Loads configuration, builds the speech backend and admission gate, serves
//! HTTP (optionally advertised over mDNS), and drains the delivery queue on
//! SIGTERM/SIGINT.

use bellphonics_gate::AdmissionGate;
use bellphonics_server::config::{self, ConfigOrigin};
use bellphonics_server::discovery::{Advertisement, DiscoveryError, MdnsAdvertiser};
use bellphonics_server::{app, AppState};
use bellphonics_voice::{DeliveryQueue, SpeechBackend, VoiceError};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Fatal startup and serving failures.
#[derive(Debug, Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error("speech backend: {0}")]
    Voice(#[from] VoiceError),
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("server error: {0}")]
    Serve(std::io::Error),
}

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("BELLPHONICS_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    // A missing .env is normal outside development.
    let dotenv = dotenvy::dotenv().ok();

    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path
        .as_deref()
        .or(Some("bellphonics.toml"));

    let (config, config_origin) = config::load_config(selected_config_path)?;

    // Initialize tracing
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        dotenv = dotenv.is_some(),
        "resolved startup configuration path"
    );
    if config_origin == ConfigOrigin::Defaults {
        tracing::info!(
            path = selected_config_path.unwrap_or("<none>"),
            "config file not found, using defaults"
        );
    }

    let backend = SpeechBackend::from_config(&config.tts).inspect_err(|e| {
        tracing::error!(error = %e, "failed to initialize speech backend");
    })?;
    let tts_backend = backend.kind();

    let gate = Arc::new(AdmissionGate::new(config.gate.clone()));
    let queue = Arc::new(DeliveryQueue::new(Arc::new(backend)));
    queue.start();

    let state = AppState {
        gate,
        queue: queue.clone(),
        instance_name: config.server.instance_name.clone(),
        tts_backend,
    };

    let addr = SocketAddr::new(config.server.host, config.server.port);
    tracing::info!(%addr, backend = %tts_backend, "starting bellphonics relay");

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| StartupError::Bind { addr, source })?;

    let advertiser = if config.discovery.enabled {
        let port = listener
            .local_addr()
            .map(|local| local.port())
            .unwrap_or(config.server.port);
        let advertisement = Advertisement::new(
            &config.discovery,
            &config.server.instance_name,
            config.server.host,
            port,
            local_host_name(),
        );
        Some(MdnsAdvertiser::start(advertisement)?)
    } else {
        tracing::info!("mDNS discovery disabled");
        None
    };

    // Serve with graceful shutdown
    let served = axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    if let Some(advertiser) = advertiser {
        advertiser.stop().await;
    }
    let cancelled = queue.stop().await;
    tracing::info!(cancelled, "bellphonics relay shut down");

    served.map_err(StartupError::Serve)
}

fn local_host_name() -> Option<String> {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
