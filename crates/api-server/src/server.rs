//! API server — router assembly and HTTP/metrics startup.

use crate::rest::{self, AppState};
use axum::routing::{delete, get, post};
use axum::Router;
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use winback_core::config::AppConfig;

pub struct ApiServer {
    config: AppConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(config: AppConfig, state: AppState) -> Self {
        Self { config, state }
    }

    pub fn router(&self) -> Router {
        Router::new()
            // Campaigns
            .route("/v1/campaigns", post(rest::create_campaign))
            .route("/v1/campaigns/:id", get(rest::campaign_detail))
            .route("/v1/campaigns/:id/send", post(rest::send_campaign))
            // Sequences
            .route("/v1/sequences", post(rest::create_sequence_handler))
            .route("/v1/sequences/run", get(rest::run_sequences))
            .route("/v1/sequences/:id/outcomes", get(rest::sequence_outcomes))
            // Inbound engagement events
            .route("/v1/webhooks/email", post(rest::email_webhook))
            // Unsubscribe flow
            .route(
                "/unsubscribe",
                get(rest::unsubscribe_status).post(rest::unsubscribe_confirm),
            )
            // Suppression management
            .route(
                "/v1/suppressions",
                get(rest::list_suppressions).post(rest::add_suppression),
            )
            .route("/v1/suppressions/:address", delete(rest::remove_suppression))
            // Operational endpoints
            .route("/health", get(rest::health_check))
            .route("/ready", get(rest::readiness))
            .route("/live", get(rest::liveness))
            // Middleware
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Start the HTTP server (blocks until shutdown).
    pub async fn start_http(&self) -> anyhow::Result<()> {
        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);
        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, self.router()).await?;
        Ok(())
    }

    /// Start the Prometheus metrics exporter on a separate port.
    pub async fn start_metrics(&self) -> anyhow::Result<()> {
        let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
        builder
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.metrics.port,
            ))
            .install()?;

        info!(port = self.config.metrics.port, "Metrics exporter started");
        Ok(())
    }
}
