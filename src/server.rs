use axum::{
    routing::{get, post},
    Router,
};
use http::{HeaderName, HeaderValue};
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};
use tracing::info;

use crate::api::handler::{
    create_agreement, dispute_agreement, get_agreement_status, get_payment, get_payment_history,
    health_check, initiate_payment, settle_agreement, AppState,
};

pub fn create_app(state: AppState) -> Router {
    info!("Setting up HTTP routes...");

    let app = Router::new()
        // Public health check endpoint
        .route("/health", get(health_check))
        .nest(
            "/api/v1",
            Router::new()
                // Agreement lifecycle
                .route("/agreements", post(create_agreement))
                .route("/agreements/:id", get(get_agreement_status))
                .route("/agreements/:id/payments", get(get_payment_history))
                .route("/agreements/:id/dispute", post(dispute_agreement))
                .route("/agreements/:id/settle", post(settle_agreement))
                // Payment lifecycle
                .route("/payments", post(initiate_payment))
                .route("/payments/:id", get(get_payment)),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(SetResponseHeaderLayer::if_not_present(
                    HeaderName::from_static("x-content-type-options"),
                    HeaderValue::from_static("nosniff"),
                ))
                .layer(CorsLayer::very_permissive()),
        )
        .with_state(state);

    info!("HTTP routes configured");
    app
}

pub async fn run_server(
    app: Router,
    bind_address: &str,
    shutdown: tokio::sync::watch::Sender<bool>,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("Server listening on: {}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
            let _ = shutdown.send(true);
        })
        .await?;

    Ok(())
}
