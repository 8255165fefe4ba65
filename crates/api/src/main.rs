use tokio::sync::watch;

#[tokio::main]
async fn main() {
    docrelay_observability::init();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let services = std::sync::Arc::new(docrelay_api::app::services::build_services(shutdown_rx).await);
    let app = docrelay_api::app::build_app(services);

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {bind_addr}: {e}"));

    tracing::info!("listening on {}", listener.local_addr().unwrap());

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received, closing connections");
            }
            // Live relays watch this channel and close their loops.
            let _ = shutdown_tx.send(true);
        })
        .await
        .unwrap();
}
