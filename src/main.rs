use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::cli::{CommonArgs, CommonCommands, utils};
use router::ServiceState;
use std::net::SocketAddr;

#[derive(Parser)]
#[command(name = "docseries")]
#[command(about = "docseries - serves document collections as Grafana SimpleJSON time series")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Option<Commands>,

    #[arg(long, help = "HTTP API server port", default_value = "3000")]
    port: u16,

    #[arg(long, help = "Bind address for the HTTP server", default_value = "0.0.0.0")]
    bind: String,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Common(CommonCommands),
}

impl Default for Commands {
    fn default() -> Self {
        Self::Common(CommonCommands::Start)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    utils::init_logging(&cli.common);

    let config = utils::load_config(cli.common.config.as_ref())?;

    let Commands::Common(command) = cli.command.unwrap_or_default();

    // Validation needs the store as well, so it is handled here
    if command == CommonCommands::Validate {
        utils::validate_config(&config)?;
        ServiceState::bootstrap(config)
            .await
            .context("Configuration is not valid for the data directory")?;
        log::info!("Collections validated against the data directory");
        return Ok(());
    }

    if utils::handle_common_command(&command, &config).await? {
        return Ok(());
    }

    log::info!("Starting docseries");

    let bind_ip = cli
        .bind
        .parse::<std::net::IpAddr>()
        .context("Invalid bind address")?;
    let http_addr = SocketAddr::new(bind_ip, cli.port);

    let state = ServiceState::bootstrap(config)
        .await
        .context("Failed to initialize service")?;

    let listener = tokio::net::TcpListener::bind(http_addr)
        .await
        .with_context(|| format!("Failed to bind HTTP server to {http_addr}"))?;
    log::info!("HTTP API server listening on {http_addr}");

    router::serve(listener, state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for ctrl+c signal: {e}");
        }
        log::info!("Shutting down docseries...");
    })
    .await?;

    log::info!("docseries stopped gracefully");

    Ok(())
}
