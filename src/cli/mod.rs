use clap::Parser;

use crate::llm::{ DEFAULT_BASE_URL, DEFAULT_USER };
use crate::session::registry::DEFAULT_MAX_SESSIONS;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Chat Service Args ---
    /// Base URL of the Dify API (the `/chat-messages` route is appended)
    #[arg(long, env = "DIFY_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub dify_base_url: String,

    /// App token sent as the bearer credential on every chat call
    #[arg(long, env = "DIFY_API_KEY", hide_env_values = true)]
    pub dify_api_key: String,

    /// Caller identifier reported to the chat service
    #[arg(long, env = "DIFY_USER", default_value = DEFAULT_USER)]
    pub dify_user: String,

    /// Timeout in seconds for a single chat call.
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "30")]
    pub request_timeout_secs: u64,

    // --- Page Args ---
    /// Title shown in the page header and browser tab.
    #[arg(long, env = "APP_TITLE", default_value = "German Learning Bot")]
    pub app_title: String,

    /// Name of the tutor persona shown in the header, spinner and input label.
    #[arg(long, env = "ASSISTANT_NAME", default_value = "Frau Doaa")]
    pub assistant_name: String,

    /// WebSocket URL the chat page connects to. When unset the page derives it
    /// from its own host and the port of SERVER_ADDR.
    #[arg(long, env = "PUBLIC_WS_URL")]
    pub public_ws_url: Option<String>,

    // --- Server Args ---
    /// Host address and port for the WebSocket server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:4000")]
    pub server_addr: String,

    /// Host address and port for the HTTP server (chat page and session API).
    #[arg(long, env = "HTTP_ADDR", default_value = "127.0.0.1:8080")]
    pub http_addr: String,

    /// Maximum number of HTTP API sessions alive at once. Creating more answers 503.
    #[arg(long, env = "MAX_SESSIONS", default_value_t = DEFAULT_MAX_SESSIONS)]
    pub max_sessions: usize,

    /// Maximum number of new WebSocket connections accepted per second.
    #[arg(long, env = "WS_CONNECTIONS_PER_SECOND", default_value = "10")]
    pub ws_connections_per_second: u32,

    /// Optional path to the TLS certificate file (PEM format) for enabling WSS/HTTPS. Requires --tls-key-path.
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// Optional path to the TLS private key file (PEM format) for enabling WSS/HTTPS. Requires --tls-cert-path.
    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,

    #[arg(long, env = "ENABLE_TLS", default_value = "false")]
    pub enable_tls: bool,
}

impl Args {
    /// Port the WebSocket server listens on, if SERVER_ADDR carries one.
    pub fn ws_port(&self) -> Option<u16> {
        self.server_addr
            .rsplit_once(':')
            .and_then(|(_, port)| port.parse().ok())
    }

    pub fn tls_enabled(&self) -> bool {
        self.enable_tls && self.tls_cert_path.is_some() && self.tls_key_path.is_some()
    }
}
