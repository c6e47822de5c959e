pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod models;
pub mod relay;
pub mod server;

use cli::Args;
use config::FoundrySettings;
use log::info;
use server::Server;
use std::error::Error;
use std::sync::Arc;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    let settings = FoundrySettings::from(&args);
    settings.log_summary();
    settings.validate()?;

    let addr = args.server_addr.clone();
    info!("Starting server on: {}", addr);
    let server = Server::new(addr, Arc::new(settings), args);
    server.run().await?;

    Ok(())
}
