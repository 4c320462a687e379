use async_trait::async_trait;
use log::{ debug, info, warn };
use reqwest::{ Client as HttpClient, header::{ HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION } };
use serde::{ Deserialize, Serialize };
use serde_json::{ Map, Value };
use std::error::Error as StdError;
use std::time::Duration;
use url::Url;

use super::{ ChatClient, ChatConfig, ChatError, ChatReply, ChatResult };

const CHAT_MESSAGES_ROUTE: &str = "/chat-messages";
const RESPONSE_MODE_BLOCKING: &str = "blocking";

pub struct DifyChatClient {
    http: HttpClient,
    endpoint: String,
    user: String,
    timeout: Duration,
}

#[derive(Serialize)]
struct ChatMessageRequest<'a> {
    inputs: Map<String, Value>,
    query: &'a str,
    response_mode: &'static str,
    user: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    conversation_id: Option<&'a str>,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    answer: Option<String>,
    conversation_id: Option<String>,
    message_id: Option<String>,
}

impl From<ChatMessageResponse> for ChatReply {
    fn from(resp: ChatMessageResponse) -> Self {
        Self {
            answer: resp.answer.unwrap_or_default(),
            conversation_id: resp.conversation_id.unwrap_or_default(),
            message_id: resp.message_id.unwrap_or_default(),
        }
    }
}

impl DifyChatClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        user: String,
        timeout: Duration
    ) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        Url::parse(base_url).map_err(|e| format!("Invalid Dify base URL '{}': {}", base_url, e))?;
        let endpoint = format!("{}{}", base_url.trim_end_matches('/'), CHAT_MESSAGES_ROUTE);

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key))
                .map_err(|e| format!("Invalid API key format: {}", e))?
        );

        let http = HttpClient::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| Box::new(e) as Box<dyn StdError + Send + Sync>)?;

        Ok(Self { http, endpoint, user, timeout })
    }

    pub fn from_config(config: &ChatConfig) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        if config.api_key.trim().is_empty() {
            warn!("Dify API key is empty; every chat call will be rejected by the service");
        }
        Self::new(&config.base_url, &config.api_key, config.user.clone(), config.timeout)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post(&self, query: &str, conversation_id: Option<&str>) -> ChatResult {
        let req = ChatMessageRequest {
            inputs: Map::new(),
            query,
            response_mode: RESPONSE_MODE_BLOCKING,
            user: &self.user,
            conversation_id: conversation_id.filter(|id| !id.is_empty()),
        };

        let resp = self.http
            .post(&self.endpoint)
            .json(&req)
            .send()
            .await
            .map_err(|e| ChatError::Transport(describe_transport_error(&e, self.timeout)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ChatError::Transport(describe_status(status, &body)));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| ChatError::Transport(describe_transport_error(&e, self.timeout)))?;

        parse_reply(&body)
    }
}

#[async_trait]
impl ChatClient for DifyChatClient {
    async fn send(&self, query: &str, conversation_id: Option<&str>) -> ChatResult {
        let result = self.post(query, conversation_id).await;
        match &result {
            Ok(reply) => {
                info!("Dify answered ({} chars)", reply.answer.chars().count());
                debug!(
                    "Dify message_id={} conversation_id={}",
                    reply.message_id,
                    reply.conversation_id
                );
            }
            Err(e) => warn!("Dify call failed: {}", e),
        }
        result
    }
}

/// Turns a 2xx body into a reply. Invalid JSON is a parse error; valid JSON
/// of the wrong shape is unexpected.
fn parse_reply(body: &str) -> ChatResult {
    let value: Value = serde_json::from_str(body).map_err(|e| ChatError::Parse(e.to_string()))?;
    if !value.is_object() {
        return Err(ChatError::Unexpected("response body is not a JSON object".to_string()));
    }
    let resp: ChatMessageResponse = serde_json::from_value(value)
        .map_err(|e| ChatError::Unexpected(e.to_string()))?;
    Ok(resp.into())
}

fn describe_status(status: reqwest::StatusCode, body: &str) -> String {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .filter(|m| !m.is_empty());

    match detail {
        Some(message) => format!("HTTP {}: {}", status, message),
        None => format!("HTTP {}", status),
    }
}

fn describe_transport_error(err: &reqwest::Error, timeout: Duration) -> String {
    if err.is_timeout() {
        format!("request timed out after {}s", timeout.as_secs_f32())
    } else {
        err.to_string()
    }
}
