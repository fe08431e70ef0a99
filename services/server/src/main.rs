use server::{db, AppState};
use std::env;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .init();

    let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_owned());
    let cors_origins: Vec<String> = env::var("CORS_ORIGINS")
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect();

    let pool = match db::connect(&database_url).await {
        Ok(pool) => pool,
        Err(e) => {
            error!(error = %e, "could not reach Postgres");
            std::process::exit(1);
        }
    };
    if let Err(e) = db::migrate(&pool).await {
        error!(error = %e, "schema migration failed");
        std::process::exit(1);
    }
    info!("storage ready");

    let state = AppState::new(pool);
    let router = server::build_router(state, &cors_origins);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("failed to bind");
    info!(addr = %bind_addr, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            // SIGINT from a terminal, SIGTERM from an orchestrator.
            let interrupt = tokio::signal::ctrl_c();
            #[cfg(unix)]
            {
                let mut term =
                    tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                        .expect("failed to install SIGTERM handler");
                tokio::select! {
                    _ = interrupt => {}
                    _ = term.recv() => {}
                }
            }
            #[cfg(not(unix))]
            interrupt.await.expect("failed to install Ctrl+C handler");
            info!("shutdown signal received, draining");
        })
        .await
        .expect("server error");
    info!("stopped");
}
