use log::{ debug, info, warn };
use std::error::Error;
use std::sync::Arc;

use crate::cli::Args;
use crate::llm::{ self, ChatClient, ChatConfig, ChatReply };
use crate::models::chat::Message;
use crate::models::websocket::{ ClientMessage, ServerMessage };
use crate::session::{ ConversationState, SubmitError };

/// Shared front door to the chat service. Holds no per-session data: every
/// call takes the caller's `ConversationState`.
#[derive(Clone)]
pub struct ChatAgent {
    client: Arc<dyn ChatClient>,
}

impl ChatAgent {
    pub fn new(client: Arc<dyn ChatClient>) -> Self {
        Self { client }
    }

    pub fn from_args(args: &Args) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let config = ChatConfig::from_args(args);
        info!("Chat endpoint: {} (user '{}', timeout {:?})", config.base_url, config.user, config.timeout);
        Ok(Self::new(llm::new_client(&config)?))
    }

    pub async fn submit(
        &self,
        state: &mut ConversationState,
        utterance: &str,
        attachment: Option<&str>
    ) -> Result<ChatReply, SubmitError> {
        state.submit(self.client.as_ref(), utterance, attachment).await
    }

    /// Applies one client command to `state` and returns the frames to send
    /// back. Empty chat submissions produce nothing.
    pub async fn handle(
        &self,
        state: &mut ConversationState,
        msg: ClientMessage
    ) -> Vec<ServerMessage> {
        match msg {
            ClientMessage::Chat { content, attachment } => {
                match self.submit(state, &content, attachment.as_deref()).await {
                    Ok(reply) => {
                        let timestamp = state
                            .messages()
                            .last()
                            .map(|m| m.timestamp)
                            .unwrap_or_default();
                        vec![ServerMessage::Response {
                            content: reply.answer,
                            message_id: reply.message_id,
                            message_count: state.len(),
                            timestamp,
                        }]
                    }
                    Err(SubmitError::EmptyUtterance) => {
                        debug!("Ignoring empty chat submission");
                        Vec::new()
                    }
                    Err(SubmitError::Chat(e)) => {
                        warn!("Chat call failed ({}): {}", e.kind(), e);
                        vec![ServerMessage::Error {
                            message: e.to_string(),
                            message_count: state.len(),
                        }]
                    }
                }
            }
            ClientMessage::Clear => {
                state.clear();
                vec![ServerMessage::Cleared]
            }
            ClientMessage::History => vec![transcript(state)],
        }
    }
}

pub fn transcript(state: &ConversationState) -> ServerMessage {
    let messages: Vec<Message> = state.messages().to_vec();
    ServerMessage::Transcript {
        message_count: messages.len(),
        messages,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatError;
    use crate::models::chat::Role;
    use crate::testing::{ ScriptedClient, reply };

    fn agent(results: Vec<crate::llm::ChatResult>) -> (ChatAgent, Arc<ScriptedClient>) {
        let client = Arc::new(ScriptedClient::new(results));
        (ChatAgent::new(client.clone()), client)
    }

    fn chat(content: &str) -> ClientMessage {
        ClientMessage::Chat { content: content.into(), attachment: None }
    }

    #[tokio::test]
    async fn chat_then_failure_then_clear() {
        let (agent, _) = agent(vec![Ok(reply("Gut, danke!", "c1")), Err(ChatError::Transport("timeout".into()))]);
        let mut state = ConversationState::new();

        let out = agent.handle(&mut state, chat("Wie geht's?")).await;
        match &out[..] {
            [ServerMessage::Response { content, message_count, .. }] => {
                assert_eq!(content, "Gut, danke!");
                assert_eq!(*message_count, 2);
            }
            other => panic!("unexpected frames: {:?}", other),
        }

        let out = agent.handle(&mut state, chat("Und dir?")).await;
        assert_eq!(
            out,
            vec![ServerMessage::Error {
                message: "API request failed: timeout".into(),
                message_count: 3,
            }]
        );
        assert_eq!(state.conversation_id(), Some("c1"));

        let out = agent.handle(&mut state, ClientMessage::Clear).await;
        assert_eq!(out, vec![ServerMessage::Cleared]);
        assert!(state.is_empty());
        assert_eq!(state.conversation_id(), None);
    }

    #[tokio::test]
    async fn empty_chat_is_silent() {
        let (agent, client) = agent(vec![]);
        let mut state = ConversationState::new();

        let out = agent.handle(&mut state, chat("   ")).await;

        assert!(out.is_empty());
        assert!(state.is_empty());
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn history_returns_transcript_in_order() {
        let (agent, _) = agent(vec![Ok(reply("Hallo!", "c1"))]);
        let mut state = ConversationState::new();
        agent.handle(&mut state, ClientMessage::Chat {
            content: "Hi".into(),
            attachment: Some("vokabeln.txt".into()),
        }).await;

        match agent.handle(&mut state, ClientMessage::History).await.pop() {
            Some(ServerMessage::Transcript { messages, message_count }) => {
                assert_eq!(message_count, 2);
                assert_eq!(messages[0].role, Role::User);
                assert_eq!(messages[0].content, "Hi [Attached file: vokabeln.txt]");
                assert_eq!(messages[1].role, Role::Bot);
                assert_eq!(messages[1].content, "Hallo!");
            }
            other => panic!("expected transcript, got {:?}", other),
        }
    }
}
