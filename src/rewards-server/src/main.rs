//! Cocoa Rewards: customer rewards engine for the chocolate storefront.
//!
//! Main entry point: loads configuration, seeds the program settings,
//! schedules the expiry/rollover sweep and serves the REST API.

use clap::Parser;
use rewards_api::ApiServer;
use rewards_core::config::AppConfig;
use rewards_core::event_bus::noop_sink;
use rewards_loyalty::{RewardsEngine, RewardsStore};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "rewards-server")]
#[command(about = "Loyalty tiers, points, referral campaigns and coupons")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "REWARDS__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "REWARDS__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Metrics port (overrides config)
    #[arg(long, env = "REWARDS__METRICS__PORT")]
    metrics_port: Option<u16>,

    /// Seconds between maintenance sweeps (overrides config)
    #[arg(long, env = "REWARDS__MAINTENANCE__SWEEP_INTERVAL_SECS")]
    sweep_interval_secs: Option<u64>,

    /// Disable the periodic maintenance sweep
    #[arg(long, default_value_t = false)]
    no_maintenance: bool,

    /// Load demo campaigns, coupons and a customer
    #[arg(long, default_value_t = false)]
    seed_demo: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "rewards_server=info,rewards_loyalty=info,rewards_api=info,tower_http=info".into()
            }),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Cocoa Rewards starting up");

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(port) = cli.metrics_port {
        config.metrics.port = port;
    }
    if let Some(secs) = cli.sweep_interval_secs {
        config.maintenance.sweep_interval_secs = secs;
    }
    if cli.no_maintenance {
        config.maintenance.enabled = false;
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        sweep_interval_secs = config.maintenance.sweep_interval_secs,
        "Configuration loaded"
    );

    let engine = Arc::new(RewardsEngine::new(RewardsStore::in_memory(), noop_sink()));
    engine.seed_program_config(config.program.clone())?;

    if cli.seed_demo {
        engine.seed_demo_data()?;
    }

    let api_server = ApiServer::new(config.clone(), engine.clone());

    if config.metrics.enabled {
        if let Err(e) = api_server.start_metrics() {
            error!(error = %e, "Failed to start metrics exporter");
        }
    }

    if config.maintenance.enabled {
        let engine_for_maintenance = engine.clone();
        let period = std::time::Duration::from_secs(config.maintenance.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let engine = engine_for_maintenance.clone();
                match tokio::task::spawn_blocking(move || engine.run_maintenance_now()).await {
                    Ok(report) if report.errors > 0 => {
                        warn!(errors = report.errors, "Maintenance sweep finished with errors")
                    }
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "Maintenance sweep panicked"),
                }
            }
        });
    }

    info!("Cocoa Rewards is ready to serve traffic");

    api_server.start_http().await?;

    Ok(())
}
