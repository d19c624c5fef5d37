use clap::Parser;
use terminal_web::telemetry::logging;
use terminal_web::terminal::{app, cli::Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.logging.to_config())?;
    app::run(cli).await?;
    Ok(())
}
