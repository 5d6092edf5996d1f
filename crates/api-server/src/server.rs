//! API server — wires the analyzer, collaborators and job store into the
//! HTTP router and runs it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use cohortlens_core::AppConfig;
use cohortlens_engine::CohortAnalyzer;
use cohortlens_insights::InsightsClient;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::jobs::JobStore;
use crate::rest::{self, AppState};

pub struct ApiServer {
    config: AppConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(
        config: AppConfig,
        analyzer: Arc<CohortAnalyzer>,
        insights: Arc<InsightsClient>,
    ) -> Self {
        let state = AppState {
            analyzer,
            insights,
            jobs: Arc::new(JobStore::new()),
            storage: config.storage.clone(),
            max_upload_bytes: config.analysis.max_upload_bytes,
            start_time: Instant::now(),
        };
        Self { config, state }
    }

    /// Start the HTTP REST server.
    pub async fn start_http(&self) -> anyhow::Result<()> {
        let app = Router::new()
            // Analysis endpoints
            .route("/api/upload", post(rest::upload_file))
            .route("/api/schema", get(rest::get_schema))
            .route("/api/analysis", post(rest::analyze))
            .route("/api/analysis-status", get(rest::analysis_status))
            // Rendered charts and exported result tables
            .nest_service(
                "/static/charts",
                ServeDir::new(&self.config.storage.charts_dir),
            )
            .nest_service("/exports", ServeDir::new(&self.config.storage.export_dir))
            // Operational endpoints
            .route("/health", get(rest::health_check))
            .route("/ready", get(rest::readiness))
            .route("/live", get(rest::liveness))
            // Middleware
            .layer(DefaultBodyLimit::max(self.state.max_upload_bytes))
            .layer(CompressionLayer::new())
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone());

        let addr = SocketAddr::new(
            self.config.api.host.parse()?,
            self.config.api.http_port,
        );

        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }

    /// Start the metrics server on a separate port.
    pub async fn start_metrics(&self) -> anyhow::Result<()> {
        let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
        let handle = builder
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.metrics.port,
            ))
            .install_recorder()?;

        info!(port = self.config.metrics.port, "Metrics exporter started");

        // Keep the handle alive
        std::mem::forget(handle);
        Ok(())
    }
}
