use std::io;

use anyhow::Context;
use clap::Parser;
use home_iot_query::logging;
use home_iot_query::shell::{Shell, connect, prompt, prompt_port};
use log::LevelFilter;

#[derive(Parser)]
#[command(name = "home-iot-client")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Terminal menu for querying a home-iot-server")]
struct Cli {
    /// Server address. Prompted for when omitted
    #[arg(long)]
    host: Option<String>,

    /// Server port. Prompted for when omitted
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "warn")]
    log_level: LevelFilter,
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();
    logging::init(cli.log_level)?;

    if let Err(e) = run(cli) {
        log::error!("{e:#}");
    }

    Ok(())
}

fn run(cli: Cli) -> Result<(), anyhow::Error> {
    let mut input = io::stdin().lock();
    let mut output = io::stdout();

    let host = match cli.host {
        Some(host) => host,
        None => prompt(&mut input, &mut output, "Enter IP address: ")?
            .context("No IP address given")?,
    };
    let port = match cli.port {
        Some(port) => port,
        None => prompt_port(&mut input, &mut output)?,
    };

    let mut stream = connect(&host, port)?;
    Shell::new(input, output).run(&mut stream)
}
