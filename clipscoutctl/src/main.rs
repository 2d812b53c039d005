use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() {
    // stdout carries command output and the serve protocol; logs go to stderr
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = clipscoutctl::Cli::parse();
    if let Err(err) = clipscoutctl::run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
