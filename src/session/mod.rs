pub mod registry;

use log::debug;
use serde::Serialize;
use thiserror::Error;

use crate::llm::{ ChatClient, ChatError, ChatReply };
use crate::models::chat::Message;

pub use self::registry::SessionRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Empty,
    Active,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("message is empty")]
    EmptyUtterance,
    #[error(transparent)]
    Chat(#[from] ChatError),
}

/// Transcript and conversation token for one session.
///
/// The user message is appended before the chat call and stays even when the
/// call fails, so the user can rephrase without losing context. The
/// conversation id is only ever replaced by a non-empty id from a successful
/// reply.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversationState {
    messages: Vec<Message>,
    conversation_id: Option<String>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn status(&self) -> SessionStatus {
        if self.messages.is_empty() && self.conversation_id.is_none() {
            SessionStatus::Empty
        } else {
            SessionStatus::Active
        }
    }

    pub async fn submit(
        &mut self,
        client: &dyn ChatClient,
        utterance: &str,
        attachment: Option<&str>
    ) -> Result<ChatReply, SubmitError> {
        if utterance.trim().is_empty() {
            return Err(SubmitError::EmptyUtterance);
        }

        self.messages.push(Message::user(decorate(utterance, attachment)));

        let reply = client.send(utterance, self.conversation_id.as_deref()).await?;

        if !reply.conversation_id.is_empty() {
            if self.conversation_id.as_deref() != Some(reply.conversation_id.as_str()) {
                debug!("Conversation id is now {}", reply.conversation_id);
            }
            self.conversation_id = Some(reply.conversation_id.clone());
        }
        self.messages.push(Message::bot(reply.answer.clone()));

        Ok(reply)
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.conversation_id = None;
    }
}

fn decorate(utterance: &str, attachment: Option<&str>) -> String {
    match attachment.map(str::trim).filter(|name| !name.is_empty()) {
        Some(name) => format!("{} [Attached file: {}]", utterance, name),
        None => utterance.to_string(),
    }
}
