use tracing::{error, info};

use campaign_ops::infrastructure::logging::{cleanup_old_logs, init_logging};
use campaign_ops::{AppConfig, NodeDependencies, WorkerNode};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let config = AppConfig::from_env()?;
    let _log_guards = init_logging(&config.logging).map_err(|e| anyhow::anyhow!(e))?;
    if config.logging.enable_file {
        if let Err(e) = cleanup_old_logs(&config.logging.log_dir, config.logging.max_files) {
            error!("Failed to clean up old logs: {}", e);
        }
    }

    info!(
        "Starting campaign-ops node {} (broker: {}, dashboards: {})",
        config.node_name, config.broker, config.dashboard_mode
    );

    let deps = NodeDependencies::from_config(&config).await?;
    let mut node = WorkerNode::new(config, deps);
    node.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    node.shutdown().await;
    Ok(())
}
