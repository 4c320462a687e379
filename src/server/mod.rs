pub mod api;
pub mod websocket;

use crate::agent::ChatAgent;
use crate::cli::Args;
use crate::session::SessionRegistry;
use std::error::Error;
use std::sync::Arc;

pub struct Server {
    agent: Arc<ChatAgent>,
    sessions: Arc<SessionRegistry>,
    args: Args,
}

impl Server {
    pub fn new(agent: Arc<ChatAgent>, args: Args) -> Self {
        Self {
            agent,
            sessions: Arc::new(SessionRegistry::with_limit(args.max_sessions)),
            args,
        }
    }

    /// Starts the HTTP server in the background, then serves WebSocket
    /// sessions until the listener fails.
    pub async fn run(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.start_http_server().await?;
        self.start_ws_server().await?;

        Ok(())
    }

    async fn start_http_server(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        api::start_http_server(
            self.agent.clone(),
            self.sessions.clone(),
            self.args.clone(),
        ).await
    }

    async fn start_ws_server(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        websocket::start_ws_server(
            &self.args.server_addr,
            self.agent.clone(),
            self.args.clone(),
        ).await
    }
}
