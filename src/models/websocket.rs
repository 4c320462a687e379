use serde::{ Serialize, Deserialize };

use super::chat::Message;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "chat")] Chat {
        content: String,
        /// File name picked in the page. Only the name travels.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attachment: Option<String>,
    },
    #[serde(rename = "clear")]
    Clear,
    #[serde(rename = "history")]
    History,
}

impl ClientMessage {
    /// True when handling this message will reach the chat service.
    pub fn submits_query(&self) -> bool {
        matches!(self, ClientMessage::Chat { content, .. } if !content.trim().is_empty())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "response")] Response {
        content: String,
        message_id: String,
        message_count: usize,
        timestamp: i64,
    },
    #[serde(rename = "error")] Error {
        message: String,
        message_count: usize,
    },
    #[serde(rename = "processing")]
    Processing,
    #[serde(rename = "cleared")]
    Cleared,
    #[serde(rename = "transcript")] Transcript {
        messages: Vec<Message>,
        message_count: usize,
    },
}
