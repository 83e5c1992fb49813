use std::{net::SocketAddr, path::PathBuf};

use anyhow::Context;
use tokio::signal;
use tracing::info;

mod adapters;
mod api;
mod config;
mod error;
mod probe;

pub use config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // When invoked as a Docker HEALTHCHECK, hit /healthz and exit immediately.
    if std::env::args().nth(1).as_deref() == Some("--healthcheck") {
        return healthcheck().await;
    }

    // Config first: the log level may come from it.
    let config_path = std::env::var("STACK_PROBE_CONFIG").ok().map(PathBuf::from);
    let config = Config::load(config_path.as_deref()).with_context(|| match &config_path {
        Some(path) => format!("Failed to load config from {}", path.display()),
        None => "Failed to load config from environment".to_string(),
    })?;

    init_tracing(config.server.log_level.as_deref());

    info!(
        port = config.server.port,
        brokers = %config.kafka.bootstrap_servers(),
        topic = %config.kafka.topic,
        "stack-probe starting"
    );

    let prober = adapters::build_prober(&config)?;

    let addr: SocketAddr = format!("0.0.0.0:{}", config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "probe API listening");

    let app = api::router(prober)
        .layer(tower_http::timeout::TimeoutLayer::with_status_code(
            axum::http::StatusCode::REQUEST_TIMEOUT,
            config.server.request_timeout(),
        ))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO))
                .on_response(tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO)),
        );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("probe API server error")?;

    info!("shutdown complete");
    Ok(())
}

/// `RUST_LOG` wins, then the configured level, then a quiet default.
/// `LOG_FORMAT=json` switches to one JSON object per line.
fn init_tracing(configured: Option<&str>) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        configured
            .map(|level| format!("stack_probe={level},tower_http=warn"))
            .unwrap_or_else(|| "stack_probe=info,tower_http=warn".into())
            .into()
    });

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

/// Lightweight healthcheck: GET /healthz and exit 0 on 2xx, 1 otherwise.
/// Invoked via `stack-probe --healthcheck` from Docker HEALTHCHECK.
async fn healthcheck() -> anyhow::Result<()> {
    let port = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(3000);

    let healthy = api::health::check(&format!("http://127.0.0.1:{port}/healthz"))
        .await
        .unwrap_or(false);
    std::process::exit(if healthy { 0 } else { 1 });
}
