use rust_mention_bot::{bot, cli, logging};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv = dotenvy::dotenv();
    let cli = cli::parse_args();
    logging::init(&cli);

    if let Err(err) = dotenv {
        info!(%err, "No .env file loaded, using process environment only");
    }

    info!("Initializing mention bot...");
    bot::run(cli).await?;

    Ok(())
}
