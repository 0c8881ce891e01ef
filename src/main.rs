use std::sync::Arc;
use std::time::Duration;

use dotenvy::dotenv;
use tracing::info;

mod config;
mod db;
mod designer;
mod llm;
mod server;
mod state;
mod utils;

use config::Config;
use db::Database;
use llm::GeminiClient;
use state::AppState;
use utils::logging::init_logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let config = Arc::new(Config::load()?);
    let _guards = init_logging(&config.log_level);

    info!("Starting Lumina Interiors API");

    let db = Database::init(&config.database_url).await?;

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.http_timeout_seconds))
        .build()?;
    let gemini = Arc::new(GeminiClient::new(http, config.clone()));

    let state = AppState::new(config, db, gemini);
    server::serve(state).await
}
