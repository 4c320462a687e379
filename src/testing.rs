//! Test doubles shared by the unit tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::llm::{ ChatClient, ChatError, ChatReply, ChatResult };

pub fn reply(answer: &str, conversation_id: &str) -> ChatReply {
    ChatReply {
        answer: answer.to_string(),
        conversation_id: conversation_id.to_string(),
        message_id: format!("m-{}", answer.len()),
    }
}

/// Plays back canned results in order and records every call it receives.
pub struct ScriptedClient {
    results: Mutex<VecDeque<ChatResult>>,
    calls: Mutex<Vec<(String, Option<String>)>>,
}

impl ScriptedClient {
    pub fn new(results: Vec<ChatResult>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, Option<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatClient for ScriptedClient {
    async fn send(&self, query: &str, conversation_id: Option<&str>) -> ChatResult {
        self.calls.lock().unwrap().push((query.to_string(), conversation_id.map(str::to_string)));
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ChatError::Unexpected("no scripted result left".into())))
    }
}
