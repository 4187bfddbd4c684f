use lingo_backend::config::Config;
use lingo_backend::db::DatabaseProxy;
use lingo_backend::logging::init_tracing;
use lingo_backend::state::AppState;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();
    let _log_guard = init_tracing(&config.log_level, config.log_dir.as_deref());

    if config.ai.api_key().is_none() {
        tracing::warn!("AI_API_KEY is not set; generation, speech and live sessions will fail");
    }

    let db_proxy = match DatabaseProxy::connect(&config.database_url).await {
        Ok(proxy) => proxy,
        Err(err) => {
            tracing::error!(error = %err, url = %config.database_url, "database initialisation failed");
            std::process::exit(1);
        }
    };

    let addr = config.bind_addr();
    let state = AppState::from_config(config, db_proxy);
    let app = lingo_backend::create_app(state);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = %err, %addr, "failed to bind listener");
            std::process::exit(1);
        }
    };
    tracing::info!(%addr, "lingo-backend listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "server error");
    }

    tracing::info!("graceful shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
