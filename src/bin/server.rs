use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use home_iot_query::config::Config;
use home_iot_query::db::DB;
use home_iot_query::ingest::ingest;
use home_iot_query::logging;
use home_iot_query::query::QueryEngine;
use home_iot_query::session::Server;
use home_iot_query::shell::prompt_port;
use log::LevelFilter;

#[derive(Parser)]
#[command(name = "home-iot-server")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Answers fixed analytics questions about home IoT sensor readings")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: LevelFilter,
}

#[derive(Subcommand)]
enum Command {
    /// Accept client connections (default)
    Serve {
        /// Port to listen on. Prompted for when not set here or in the config
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Load devices and readings from a newline-delimited JSON file
    Ingest { path: PathBuf },
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();
    logging::init(cli.log_level)?;

    if let Err(e) = run(cli).await {
        log::error!("{e:#}");
    }

    Ok(())
}

async fn run(cli: Cli) -> Result<(), anyhow::Error> {
    let config = Config::load(cli.config.as_deref())?;

    let db = DB::open(&config.database.path).context("Failed to open database")?;
    db.init().context("Failed to initialize database")?;

    match cli.command.unwrap_or(Command::Serve { port: None }) {
        Command::Ingest { path } => {
            let file = File::open(&path)
                .with_context(|| format!("Failed to open {}", path.display()))?;
            let stats = ingest(&db, BufReader::new(file))?;
            log::info!(
                "Loaded {} devices and {} readings from {}",
                stats.devices,
                stats.readings,
                path.display()
            );
            Ok(())
        }
        Command::Serve { port } => serve(config, db, port).await,
    }
}

async fn serve(config: Config, db: DB, port: Option<u16>) -> Result<(), anyhow::Error> {
    let port = match port.or(config.server.port) {
        Some(port) => port,
        None => tokio::task::spawn_blocking(|| {
            prompt_port(&mut io::stdin().lock(), &mut io::stdout())
        })
        .await
        .context("Port prompt panicked")??,
    };

    let engine = QueryEngine::new(db, config.analytics).context("Failed to start query engine")?;
    let server = Server::bind(
        (config.server.host.as_str(), port),
        engine,
        config.server.max_request_len,
    )
    .with_context(|| format!("Failed to bind port {port}"))?;
    let stopper = server.stopper().context("Failed to resolve listening address")?;
    log::info!("Server is listening on {}", server.local_addr()?);

    let mut accept_loop = tokio::task::spawn_blocking(move || server.serve());

    tokio::select! {
        result = &mut accept_loop => {
            result.context("Accept loop panicked")?;
            anyhow::bail!("Accept loop exited unexpectedly");
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to wait for Ctrl+C signal")?;
            log::info!("Shutting down");
            stopper.stop();
            accept_loop.await.context("Accept loop panicked")?;
        }
    }

    Ok(())
}
