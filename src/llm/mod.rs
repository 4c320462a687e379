pub mod dify;

use async_trait::async_trait;
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::cli::Args;
use self::dify::DifyChatClient;

pub const DEFAULT_BASE_URL: &str = "https://api.dify.ai/v1";
pub const DEFAULT_USER: &str = "web_user";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub base_url: String,
    pub api_key: String,
    pub user: String,
    pub timeout: Duration,
}

impl ChatConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            user: DEFAULT_USER.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn from_args(args: &Args) -> Self {
        let user = Some(args.dify_user.trim())
            .filter(|u| !u.is_empty())
            .unwrap_or(DEFAULT_USER);

        Self {
            base_url: args.dify_base_url.clone(),
            api_key: args.dify_api_key.clone(),
            user: user.to_string(),
            timeout: Duration::from_secs(args.request_timeout_secs),
        }
    }
}

/// A successful answer. Fields the service left out are already resolved to
/// empty strings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChatReply {
    pub answer: String,
    pub conversation_id: String,
    pub message_id: String,
}

/// Every way a single chat call can fail. None of them are retried.
///
/// The payload is the raw detail (e.g. `"timeout"`). The text shown to the
/// user is the `Display` form, which prefixes the kind: `Transport("timeout")`
/// displays as `API request failed: timeout`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("API request failed: {0}")]
    Transport(String),
    #[error("Invalid JSON response: {0}")]
    Parse(String),
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl ChatError {
    pub fn kind(&self) -> &'static str {
        match self {
            ChatError::Transport(_) => "transport",
            ChatError::Parse(_) => "parse",
            ChatError::Unexpected(_) => "unexpected",
        }
    }
}

pub type ChatResult = Result<ChatReply, ChatError>;

#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Sends one utterance. Never panics or propagates: every fault comes
    /// back as a `ChatError`.
    async fn send(&self, query: &str, conversation_id: Option<&str>) -> ChatResult;
}

pub fn new_client(
    config: &ChatConfig
) -> Result<Arc<dyn ChatClient>, Box<dyn StdError + Send + Sync>> {
    let client = DifyChatClient::from_config(config)?;
    Ok(Arc::new(client))
}
