//! CohortLens — cohort retention and monetization analysis service.
//!
//! Main entry point that wires the analyzer and its collaborators together
//! and starts the server.

use std::sync::Arc;

use clap::Parser;
use cohortlens_api::ApiServer;
use cohortlens_charts::SvgHeatmap;
use cohortlens_core::AppConfig;
use cohortlens_engine::CohortAnalyzer;
use cohortlens_insights::InsightsClient;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "cohortlens")]
#[command(about = "Cohort retention and monetization analysis service")]
#[command(version)]
struct Cli {
    /// HTTP port (overrides config)
    #[arg(long, env = "COHORTLENS__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Bind host (overrides config)
    #[arg(long, env = "COHORTLENS__API__HOST")]
    host: Option<String>,

    /// Upload directory (overrides config)
    #[arg(long, env = "COHORTLENS__STORAGE__UPLOAD_DIR")]
    upload_dir: Option<String>,

    /// Disable the LLM insights collaborator regardless of config
    #[arg(long, default_value_t = false)]
    no_insights: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cohortlens=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("CohortLens starting up");

    // Load configuration
    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Apply CLI overrides
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(host) = cli.host {
        config.api.host = host;
    }
    if let Some(dir) = cli.upload_dir {
        config.storage.upload_dir = dir;
    }
    if cli.no_insights {
        config.insights.enabled = false;
    }

    info!(
        host = %config.api.host,
        http_port = config.api.http_port,
        upload_dir = %config.storage.upload_dir,
        insights = config.insights.enabled,
        "Configuration loaded"
    );

    // Storage directories are created here, once, not as a side effect of
    // constructing any service.
    for dir in [
        &config.storage.upload_dir,
        &config.storage.charts_dir,
        &config.storage.export_dir,
    ] {
        std::fs::create_dir_all(dir)?;
    }

    // Wire the analyzer with its chart collaborator
    let renderer = Arc::new(SvgHeatmap::new(
        config.storage.charts_dir.clone(),
        "/static/charts",
    ));
    let analyzer = Arc::new(CohortAnalyzer::with_renderer(renderer));
    let insights = Arc::new(InsightsClient::new(config.insights.clone()));
    if config.insights.enabled && !insights.is_enabled() {
        warn!("Insights enabled but no API key configured, observations disabled");
    }

    // Start API server
    let api_server = ApiServer::new(config, analyzer, insights);

    // Start metrics exporter
    if let Err(e) = api_server.start_metrics().await {
        error!(error = %e, "Failed to start metrics exporter");
    }

    info!("CohortLens is ready to serve traffic");

    // Start HTTP server (blocks until shutdown)
    api_server.start_http().await?;

    Ok(())
}
