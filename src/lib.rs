pub mod agent;
pub mod models;
pub mod server;
pub mod llm;
pub mod cli;
pub mod session;

#[cfg(test)]
mod testing;

use agent::ChatAgent;
use cli::Args;
use log::{ info, warn };
use server::Server;
use std::error::Error;
use std::sync::Arc;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Dify Base URL: {}", args.dify_base_url);
    info!("Dify User: {}", args.dify_user);
    info!("Request Timeout: {}s", args.request_timeout_secs);
    info!("App Title: {}", args.app_title);
    info!("WebSocket Address: {}", args.server_addr);
    info!("HTTP Address: {}", args.http_addr);
    if let Some(url) = &args.public_ws_url {
        info!("Public WebSocket URL: {}", url);
    }
    info!("WS Connections/Second: {}", args.ws_connections_per_second);
    info!("TLS Enabled: {}", args.tls_enabled());
    info!("-------------------------");

    if args.enable_tls
        && rustls::crypto::ring::default_provider().install_default().is_err()
    {
        warn!("A rustls crypto provider was already installed; keeping it");
    }

    let agent = Arc::new(ChatAgent::from_args(&args)?);
    let server = Server::new(agent, args);
    server.run().await?;

    Ok(())
}
