use std::net::SocketAddr;
use std::sync::OnceLock;

use mediathek::manager::{FatalStartupError, InitCell, Manager};
use mediathek::routes;
use mediathek::state::AppState;
use tracing::info;

fn manager_cell() -> &'static InitCell<Manager, FatalStartupError> {
    static CELL: OnceLock<InitCell<Manager, FatalStartupError>> = OnceLock::new();
    CELL.get_or_init(InitCell::new)
}

#[tokio::main]
async fn main() {
    let manager = match manager_cell().get_or_init(Manager::start).await {
        Ok(m) => m,
        Err(e) => {
            // logging may not be up yet
            eprintln!("FATAL: {}", e);
            tracing::error!("FATAL: {}", e);
            mediathek::logging::flush();
            std::process::exit(1);
        }
    };

    let code = match serve(manager.clone()).await {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!("server error: {:#}", e);
            1
        }
    };
    manager.shutdown(code).await
}

async fn serve(manager: std::sync::Arc<Manager>) -> anyhow::Result<()> {
    let settings = manager.config.settings();
    let app = routes::router(AppState::new(manager.clone()));

    // Server listen addr (from config)
    let addr: SocketAddr = format!("{}:{}", settings.host, settings.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid listen addr {}:{} - {}", settings.host, settings.port, e))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Mediathek listening on http://{}", listener.local_addr()?);
    if manager.config.is_new_system() {
        info!("Setup required: POST /api/system/setup");
    }
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("Shutdown signal received. Stopping server...");
}
