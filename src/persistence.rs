//! Persistence Collaborator Module
//!
//! Interfaces to the relational store the gateway depends on: stored agent
//! configurations, conversations/messages and per-user provider keys. The
//! schema itself lives elsewhere; the gateway only consumes this contract.
//! An in-memory implementation backs tests and standalone runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::cache::current_timestamp_ms;
use crate::error::{GatewayError, Result};

// == Agent Configuration ==
/// Stored agent record: the parameters a test call resolves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,
    pub name: String,
    pub system_prompt: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

// == Stored Message ==
/// One persisted conversation message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub conversation_id: String,
    /// "user" or "assistant"
    pub role: String,
    pub content: String,
    pub created_at_ms: u64,
}

// == Conversation Store Trait ==
/// The persistence layer contract the relay depends on.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Looks up a stored agent configuration.
    async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentConfig>>;

    /// Creates a conversation and returns its id.
    async fn create_conversation(
        &self,
        user_id: Option<&str>,
        agent_id: Option<&str>,
    ) -> Result<String>;

    /// Whether a conversation exists.
    async fn conversation_exists(&self, conversation_id: &str) -> Result<bool>;

    /// Appends a message to a conversation.
    async fn create_message(&self, conversation_id: &str, role: &str, content: &str) -> Result<()>;

    /// Returns the user's stored provider key, if any.
    async fn get_api_key(&self, user_id: &str) -> Result<Option<String>>;
}

// == In-Memory Store ==
/// HashMap-backed store for tests and standalone runs.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    agents: RwLock<HashMap<String, AgentConfig>>,
    conversations: RwLock<HashMap<String, Vec<StoredMessage>>>,
    api_keys: RwLock<HashMap<String, String>>,
    next_conversation: AtomicU64,
}

impl InMemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an agent record.
    pub async fn insert_agent(&self, agent: AgentConfig) {
        self.agents.write().await.insert(agent.id.clone(), agent);
    }

    /// Seeds a per-user provider key.
    pub async fn insert_api_key(&self, user_id: impl Into<String>, key: impl Into<String>) {
        self.api_keys.write().await.insert(user_id.into(), key.into());
    }

    /// Returns a conversation's messages (test inspection).
    pub async fn messages(&self, conversation_id: &str) -> Vec<StoredMessage> {
        self.conversations
            .read()
            .await
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentConfig>> {
        Ok(self.agents.read().await.get(agent_id).cloned())
    }

    async fn create_conversation(
        &self,
        _user_id: Option<&str>,
        _agent_id: Option<&str>,
    ) -> Result<String> {
        let n = self.next_conversation.fetch_add(1, Ordering::SeqCst);
        let id = format!("conv-{}-{}", current_timestamp_ms(), n);
        self.conversations
            .write()
            .await
            .insert(id.clone(), Vec::new());
        Ok(id)
    }

    async fn conversation_exists(&self, conversation_id: &str) -> Result<bool> {
        Ok(self.conversations.read().await.contains_key(conversation_id))
    }

    async fn create_message(&self, conversation_id: &str, role: &str, content: &str) -> Result<()> {
        let mut conversations = self.conversations.write().await;
        let messages = conversations
            .get_mut(conversation_id)
            .ok_or_else(|| GatewayError::NotFound(format!("conversation {}", conversation_id)))?;
        messages.push(StoredMessage {
            conversation_id: conversation_id.to_string(),
            role: role.to_string(),
            content: content.to_string(),
            created_at_ms: current_timestamp_ms(),
        });
        Ok(())
    }

    async fn get_api_key(&self, user_id: &str) -> Result<Option<String>> {
        Ok(self.api_keys.read().await.get(user_id).cloned())
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_agent_roundtrip() {
        let store = InMemoryStore::new();
        store
            .insert_agent(AgentConfig {
                id: "a1".to_string(),
                name: "Helper".to_string(),
                system_prompt: Some("You are helpful.".to_string()),
                model: None,
                temperature: None,
                max_tokens: None,
            })
            .await;

        let agent = store.get_agent("a1").await.unwrap().unwrap();
        assert_eq!(agent.name, "Helper");
        assert!(store.get_agent("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_conversation_and_messages() {
        let store = InMemoryStore::new();
        let id = store.create_conversation(Some("u1"), None).await.unwrap();

        assert!(store.conversation_exists(&id).await.unwrap());
        store.create_message(&id, "user", "hi").await.unwrap();
        store.create_message(&id, "assistant", "hello").await.unwrap();

        let messages = store.messages(&id).await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "user");
        assert_eq!(messages[1].content, "hello");
    }

    #[tokio::test]
    async fn test_message_to_missing_conversation_fails() {
        let store = InMemoryStore::new();
        let result = store.create_message("nope", "user", "hi").await;
        assert!(matches!(result, Err(GatewayError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_api_key_lookup() {
        let store = InMemoryStore::new();
        store.insert_api_key("u1", "sk-test").await;

        assert_eq!(
            store.get_api_key("u1").await.unwrap(),
            Some("sk-test".to_string())
        );
        assert_eq!(store.get_api_key("u2").await.unwrap(), None);
    }
}
