use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod cli;

use cli::Cli;
use galah::server::Server;
use galah::service::Service;

fn print_banner() {
    println!(
        r#"
 ██████   █████  ██       █████  ██   ██
██       ██   ██ ██      ██   ██ ██   ██
██   ███ ███████ ██      ███████ ███████
██    ██ ██   ██ ██      ██   ██ ██   ██
 ██████  ██   ██ ███████ ██   ██ ██   ██
  llm-powered web honeypot // version {}
"#,
        env!("CARGO_PKG_VERSION")
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    print_banner();

    let filter = EnvFilter::try_new(&cli.log_level)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    let service = Service::new(cli.service_options())?;
    let server = Server::new(Arc::new(service), cli.interface.clone());

    if let Err(e) = server.run().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
