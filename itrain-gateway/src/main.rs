//! iTrain gateway entry point.
//!
//! ```text
//! itrain-gateway                    Run with ./itrain.toml (or defaults)
//! itrain-gateway --config <path>    Load a custom config TOML
//! itrain-gateway --dialect DTTX     Override the initial dialect
//! itrain-gateway --gen-config       Write default config to stdout
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use itrain_core::Dialect;
use itrain_gateway::config::GatewayConfig;
use itrain_gateway::service::GatewayService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "itrain-gateway", about = "iTrain camera gateway daemon")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "itrain.toml")]
    config: PathBuf,

    /// Initial protocol dialect (DCTX or DTTX).
    #[arg(long)]
    dialect: Option<Dialect>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        println!("{}", GatewayConfig::default_toml()?);
        return Ok(());
    }

    let loaded = GatewayConfig::load(&cli.config);
    let mut config = match &loaded {
        Ok(Some(config)) => config.clone(),
        _ => GatewayConfig::default(),
    };
    if let Some(dialect) = cli.dialect {
        config.protocol.dialect = dialect;
    }

    // RUST_LOG wins over the config file.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("itrain-gateway v{}", env!("CARGO_PKG_VERSION"));
    match loaded {
        Ok(Some(_)) => info!("config: {}", cli.config.display()),
        Ok(None) => info!("no config at {}; using defaults", cli.config.display()),
        Err(e) => warn!("{e}; using defaults"),
    }
    info!("listen: {}", config.network.listen_address);
    info!("dialect: {}", config.protocol.dialect);
    info!("bus: {}", config.bus_address().unwrap_or("none"));

    let service = GatewayService::bind(&config).await?;
    let control = service.control();

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        control.quit().ok();
    });

    service.run().await?;
    Ok(())
}
