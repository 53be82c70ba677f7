//! Request DTOs for the agent gateway API
//!
//! Defines the structure of incoming HTTP request bodies.

use serde::Deserialize;

/// Request body for agent test calls (`POST /api/agents/test` and
/// `POST /api/agents/test/stream`).
///
/// The effective agent configuration comes either from a stored agent
/// (`agent_id`) or from the inline fields; inline fields override stored
/// ones when both are present.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TestAgentRequest {
    /// Stored agent to resolve configuration from
    #[serde(default)]
    pub agent_id: Option<String>,
    /// The user message to send
    pub message: String,
    /// Inline system prompt
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Inline model identifier
    #[serde(default)]
    pub model: Option<String>,
    /// Inline sampling temperature
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Inline max-token budget
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Conversation to append messages to (streaming path)
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Accepted for wire compatibility; the endpoint determines the mode
    #[serde(default)]
    pub stream: bool,
}

impl TestAgentRequest {
    /// Validates the request data.
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.message.trim().is_empty() {
            return Some("Message cannot be empty".to_string());
        }
        if let Some(temp) = self.temperature {
            if !(0.0..=2.0).contains(&temp) {
                return Some("Temperature must be between 0.0 and 2.0".to_string());
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_deserialize_minimal() {
        let json = r#"{"message": "hello"}"#;
        let req: TestAgentRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.message, "hello");
        assert!(req.agent_id.is_none());
        assert!(!req.stream);
    }

    #[test]
    fn test_request_deserialize_full() {
        let json = r#"{
            "agent_id": "a1",
            "message": "hi",
            "system_prompt": "You are terse.",
            "model": "gpt-4o",
            "temperature": 0.2,
            "max_tokens": 256,
            "conversation_id": "c1",
            "stream": false
        }"#;
        let req: TestAgentRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.agent_id.as_deref(), Some("a1"));
        assert_eq!(req.model.as_deref(), Some("gpt-4o"));
        assert_eq!(req.max_tokens, Some(256));
    }

    #[test]
    fn test_validate_empty_message() {
        let req = TestAgentRequest {
            message: "   ".to_string(),
            ..Default::default()
        };
        assert!(req.validate().is_some());
    }

    #[test]
    fn test_validate_temperature_range() {
        let req = TestAgentRequest {
            message: "hi".to_string(),
            temperature: Some(3.5),
            ..Default::default()
        };
        assert!(req.validate().is_some());
    }

    #[test]
    fn test_validate_valid_request() {
        let req = TestAgentRequest {
            message: "hi".to_string(),
            temperature: Some(0.7),
            ..Default::default()
        };
        assert!(req.validate().is_none());
    }
}
