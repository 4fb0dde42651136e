//! agentlb - dynamic local load-balancing proxy for lightweight Kubernetes
//! agents.
//!
//! Usage:
//!     agentlb --config <path>
//!
//! See --help for more options.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

use agentlb::config::{load_config, Config};
use agentlb::etcd::EtcdProxy;
use agentlb::metrics::{MetricsCollector, MetricsServer};
use agentlb::util::{init_logging, ShutdownSignal};

/// Local load-balancing proxy between cluster agents and the control plane.
#[derive(Parser, Debug)]
#[command(name = "agentlb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli.config).with_context(|| {
        format!(
            "failed to load configuration from '{}'",
            cli.config.display()
        )
    })?;

    // CLI overrides config
    let log_level = cli
        .log_level
        .as_deref()
        .unwrap_or(&config.global.log_level);

    init_logging(log_level, &config.global.log_format);

    if cli.validate {
        info!("Configuration is valid");
        println!("Configuration is valid.");
        println!("  Service:    {}", config.proxy.service_name);
        println!("  Server URL: {}", config.proxy.server_url);
        println!("  Data dir:   {}", config.proxy.data_dir.display());
        println!(
            "  Proxy:      {}",
            if config.proxy.enabled {
                format!("enabled on 127.0.0.1:{}", config.proxy.listen_port)
            } else {
                "disabled (direct connection)".to_string()
            }
        );
        return Ok(());
    }

    info!(
        config_path = %cli.config.display(),
        service = %config.proxy.service_name,
        server_url = %config.proxy.server_url,
        proxy_enabled = config.proxy.enabled,
        "agentlb starting"
    );

    run(config)
}

/// Run the proxy with the given configuration.
fn run(config: Config) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    runtime.block_on(async { run_async(config).await })
}

/// Async entry point.
async fn run_async(config: Config) -> Result<()> {
    let mut shutdown = ShutdownSignal::new();
    let metrics = MetricsCollector::new();

    let proxy = EtcdProxy::new(
        config.proxy.enabled,
        &config.proxy.data_dir,
        &config.proxy.server_url,
        config.proxy.listen_port,
        config.proxy.connect_timeout,
        metrics.clone(),
    )
    .context("failed to construct etcd proxy")?;

    if let Some(handle) = proxy
        .start(shutdown.subscribe())
        .await
        .context("failed to start load balancer")?
    {
        shutdown.register(handle);
    }

    info!(etcd_url = %proxy.etcd_url(), "clients should dial this endpoint");

    if config.global.metrics.enabled {
        let server = MetricsServer::new(
            config.global.metrics.address,
            config.global.metrics.path.clone(),
            metrics,
        );
        let shutdown_rx = shutdown.subscribe();
        shutdown.register(tokio::spawn(async move {
            server.run(shutdown_rx).await;
        }));
    }

    info!("agentlb is running");
    info!("press Ctrl+C to stop");

    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("received shutdown signal");
        }
        Err(e) => {
            error!(error = %e, "failed to listen for shutdown signal");
        }
    }

    shutdown.shutdown_and_join().await;

    info!("agentlb shut down complete");
    Ok(())
}
