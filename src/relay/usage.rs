//! Token Usage Module
//!
//! Canonical usage accounting: one internal usage type, one adapter for
//! the upstream's loosely-specified usage shapes, and the process-lifetime
//! usage log.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::cache::current_timestamp_ms;

// == Token Usage ==
/// Canonical token usage breakdown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Builds a usage value, deriving the total.
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    /// Normalizes a provider-reported usage object.
    ///
    /// Upstream responses spell the fields differently depending on API
    /// generation (`prompt_tokens`, `promptTokens`, `input_tokens`, ...);
    /// this is the single place those spellings are recognized. Unknown or
    /// absent fields become zero, and a missing total is derived.
    pub fn from_provider_json(usage: &Value) -> Self {
        let prompt_tokens = first_u64(usage, &["prompt_tokens", "promptTokens", "input_tokens", "inputTokens"]);
        let completion_tokens = first_u64(
            usage,
            &["completion_tokens", "completionTokens", "output_tokens", "outputTokens"],
        );
        let total_tokens = first_u64(usage, &["total_tokens", "totalTokens"]);

        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: if total_tokens > 0 {
                total_tokens
            } else {
                prompt_tokens + completion_tokens
            },
        }
    }

    /// Adds another usage value into this one.
    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

fn first_u64(value: &Value, keys: &[&str]) -> u64 {
    keys.iter()
        .find_map(|key| value.get(key).and_then(Value::as_u64))
        .unwrap_or(0)
}

// == Token Estimation ==
/// Estimates the token count of a text as characters / 4, rounded up.
///
/// The upstream protocol reports no per-chunk usage, so streamed
/// completions are accounted with this approximation; non-streaming calls
/// use provider-reported counts instead.
pub fn estimate_tokens(text: &str) -> u64 {
    let chars = text.chars().count() as u64;
    chars.div_ceil(4)
}

// == Usage Record ==
/// One completed call's usage, appended to the log and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsageRecord {
    #[serde(flatten)]
    pub usage: TokenUsage,
    /// Record timestamp (Unix milliseconds)
    pub timestamp_ms: u64,
    /// Caller identity, when authenticated
    pub user_id: Option<String>,
    /// Agent the call tested, when stored
    pub agent_id: Option<String>,
}

// == Usage Log ==
/// Process-lifetime, append-only usage log.
///
/// Constructed once and injected through application state so tests get
/// isolated instances. Safe under the single-process model; a sharded
/// deployment must externalize this behind the same interface.
#[derive(Debug, Default)]
pub struct UsageLog {
    records: RwLock<Vec<TokenUsageRecord>>,
}

impl UsageLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record for a completed call.
    pub async fn record(
        &self,
        usage: TokenUsage,
        user_id: Option<String>,
        agent_id: Option<String>,
    ) {
        let record = TokenUsageRecord {
            usage,
            timestamp_ms: current_timestamp_ms(),
            user_id,
            agent_id,
        };
        self.records.write().await.push(record);
    }

    /// Number of records in the log.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// True when nothing has been recorded yet.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Aggregates usage, optionally filtered by user and a lower time bound.
    ///
    /// Returns the matching record count and the summed usage.
    pub async fn summarize(
        &self,
        user_id: Option<&str>,
        since_ms: Option<u64>,
    ) -> (usize, TokenUsage) {
        let records = self.records.read().await;
        let mut total = TokenUsage::default();
        let mut count = 0;

        for record in records.iter() {
            if let Some(user) = user_id {
                if record.user_id.as_deref() != Some(user) {
                    continue;
                }
            }
            if let Some(since) = since_ms {
                if record.timestamp_ms < since {
                    continue;
                }
            }
            total.add(&record.usage);
            count += 1;
        }

        (count, total)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("ab"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens(&"x".repeat(400)), 100);
    }

    #[test]
    fn test_from_provider_json_snake_case() {
        let usage = TokenUsage::from_provider_json(&json!({
            "prompt_tokens": 10, "completion_tokens": 20, "total_tokens": 30
        }));
        assert_eq!(usage, TokenUsage::new(10, 20));
    }

    #[test]
    fn test_from_provider_json_camel_case() {
        let usage = TokenUsage::from_provider_json(&json!({
            "promptTokens": 5, "completionTokens": 7
        }));
        assert_eq!(usage.prompt_tokens, 5);
        assert_eq!(usage.completion_tokens, 7);
        assert_eq!(usage.total_tokens, 12);
    }

    #[test]
    fn test_from_provider_json_input_output_spelling() {
        let usage = TokenUsage::from_provider_json(&json!({
            "input_tokens": 3, "output_tokens": 4
        }));
        assert_eq!(usage, TokenUsage::new(3, 4));
    }

    #[test]
    fn test_from_provider_json_unknown_shape() {
        let usage = TokenUsage::from_provider_json(&json!({"tokens": 99}));
        assert_eq!(usage, TokenUsage::default());
    }

    #[tokio::test]
    async fn test_usage_log_append_and_summarize() {
        let log = UsageLog::new();

        log.record(TokenUsage::new(10, 5), Some("u1".to_string()), None)
            .await;
        log.record(TokenUsage::new(20, 10), Some("u2".to_string()), None)
            .await;
        log.record(TokenUsage::new(1, 1), None, None).await;

        assert_eq!(log.len().await, 3);

        let (count, total) = log.summarize(None, None).await;
        assert_eq!(count, 3);
        assert_eq!(total.prompt_tokens, 31);
        assert_eq!(total.completion_tokens, 16);

        let (count, total) = log.summarize(Some("u1"), None).await;
        assert_eq!(count, 1);
        assert_eq!(total.total_tokens, 15);
    }

    #[tokio::test]
    async fn test_usage_log_time_filter() {
        let log = UsageLog::new();
        log.record(TokenUsage::new(1, 1), None, None).await;

        let future = current_timestamp_ms() + 10_000;
        let (count, _) = log.summarize(None, Some(future)).await;
        assert_eq!(count, 0);
    }
}
