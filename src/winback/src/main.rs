//! Winback — campaign delivery engine for re-engagement email.
//!
//! Main entry point: loads configuration, constructs every collaborator
//! explicitly (store, transport, templates), and starts the API server.

use clap::Parser;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};
use winback_api::{ApiServer, AppState};
use winback_core::config::AppConfig;
use winback_core::store::MemoryStore;
use winback_core::templates::TemplateStore;
use winback_core::users::MemoryDirectory;
use winback_delivery::runner::CampaignRunner;
use winback_provider::{build_transport, ActivityClient};
use winback_sequence::scheduler::SequenceScheduler;
use winback_tracking::ingest::EventIngestor;

#[derive(Parser, Debug)]
#[command(name = "winback")]
#[command(about = "Campaign delivery engine for re-engagement email")]
#[command(version)]
struct Cli {
    /// HTTP port (overrides config)
    #[arg(long, env = "WINBACK__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Delivery provider kind: mailgun, sendgrid, or memory (overrides config)
    #[arg(long, env = "WINBACK__PROVIDER__KIND")]
    provider: Option<String>,

    /// Email template directory (overrides config)
    #[arg(long, env = "WINBACK__TEMPLATES__DIR")]
    templates_dir: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "winback=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Winback starting up");

    // Load configuration
    let mut config = AppConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Apply CLI overrides
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(provider) = cli.provider {
        config.provider.kind = provider;
    }
    if let Some(dir) = cli.templates_dir {
        config.templates.dir = Some(dir);
    }

    info!(
        http_port = config.api.http_port,
        provider = %config.provider.kind,
        batch_size = config.delivery.batch_size,
        "Configuration loaded"
    );

    // Templates: directory when configured, built-in fallback otherwise.
    let templates = Arc::new(match &config.templates.dir {
        Some(dir) => TemplateStore::load_dir(&config.templates.fallback, dir)?,
        None => TemplateStore::new(&config.templates.fallback),
    });

    // Explicitly constructed collaborators, wired once here.
    let store = Arc::new(MemoryStore::new());
    let transport = build_transport(&config.provider)?;
    // Deployment wires the account system's directory client here.
    let directory = Arc::new(MemoryDirectory::default());
    let activity = Arc::new(ActivityClient::new(config.activity.api_url.clone()));

    let runner = Arc::new(CampaignRunner::new(
        store.clone(),
        directory,
        transport.clone(),
        templates.clone(),
        config.delivery.clone(),
        config.secrets.unsubscribe_secret.clone(),
    ));
    let scheduler = Arc::new(SequenceScheduler::new(
        store.clone(),
        templates,
        runner.clone(),
        activity,
    ));
    let ingestor = Arc::new(EventIngestor::new(
        store.clone(),
        config.secrets.webhook_signing_key.clone(),
    ));

    let state = AppState {
        store,
        transport,
        runner,
        scheduler,
        ingestor,
        secrets: config.secrets.clone(),
        default_template: config.templates.fallback.clone(),
        start_time: Instant::now(),
    };

    let api_server = ApiServer::new(config, state);

    // Start metrics exporter
    if let Err(e) = api_server.start_metrics().await {
        error!(error = %e, "Failed to start metrics exporter");
    }

    info!("Winback is ready to serve traffic");

    // Start HTTP server (blocks until shutdown)
    api_server.start_http().await?;

    Ok(())
}
