//! Response DTOs for the agent gateway API
//!
//! Defines outgoing HTTP response bodies, including the stream chunk
//! sequence emitted by the completion relay.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::cache::CacheStats;
use crate::relay::TokenUsage;

// == Stream Chunk ==
/// One unit of the concatenated-JSON sequence sent during streaming.
///
/// Clients must tolerate multiple objects arriving in one transport chunk
/// and one object split across transport chunks. Exactly one terminal
/// variant (`Done` or `Error`) ends every sequence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum StreamChunk {
    /// Terminal error variant
    Error {
        content: String,
        error: String,
        done: bool,
    },
    /// Terminal success variant with timing summary
    Done {
        content: String,
        done: bool,
        timing: StreamTiming,
    },
    /// Incremental content
    Content { content: String, done: bool },
}

/// Elapsed durations reported in the terminal chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamTiming {
    /// End-to-end duration in milliseconds (from request acceptance)
    pub total: u64,
    /// Streaming-only duration in milliseconds (from upstream stream open)
    pub streaming: u64,
}

impl StreamChunk {
    /// Creates an incremental content chunk.
    pub fn content(text: impl Into<String>) -> Self {
        StreamChunk::Content {
            content: text.into(),
            done: false,
        }
    }

    /// Creates the terminal success chunk.
    pub fn done(timing: StreamTiming) -> Self {
        StreamChunk::Done {
            content: String::new(),
            done: true,
            timing,
        }
    }

    /// Creates the terminal error chunk.
    pub fn error(message: impl Into<String>) -> Self {
        StreamChunk::Error {
            content: String::new(),
            error: message.into(),
            done: true,
        }
    }

    /// Whether this chunk terminates the sequence.
    pub fn is_terminal(&self) -> bool {
        match self {
            StreamChunk::Content { done, .. } => *done,
            _ => true,
        }
    }
}

// == Test Agent Response ==
/// Response body for the non-streaming test call (`POST /api/agents/test`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestAgentResponse {
    /// The full completion text
    pub content: String,
    /// Provider-reported token usage
    pub usage: TokenUsage,
}

// == Cache Stats Response ==
/// Response body for `GET /api/cache/stats`: statistics per named cache.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatsResponse {
    pub caches: BTreeMap<String, CacheStatsEntry>,
}

/// One cache's statistics with the derived hit rate.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatsEntry {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub total_entries: usize,
    pub total_bytes: usize,
    pub hit_rate: f64,
}

impl From<CacheStats> for CacheStatsEntry {
    fn from(stats: CacheStats) -> Self {
        let hit_rate = stats.hit_rate();
        Self {
            hits: stats.hits,
            misses: stats.misses,
            evictions: stats.evictions,
            total_entries: stats.total_entries,
            total_bytes: stats.total_bytes,
            hit_rate,
        }
    }
}

// == Usage Summary Response ==
/// Response body for `GET /api/usage`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSummaryResponse {
    /// Number of records in the filtered window
    pub requests: usize,
    /// Aggregated usage over the filtered window
    pub usage: TokenUsage,
}

// == Health Response ==
/// Response body for the health endpoint (`GET /health`).
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp.
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

// == Error Response ==
/// Error response body for all pre-commit error conditions.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error message describing what went wrong
    pub error: String,
}

impl ErrorResponse {
    /// Creates a new ErrorResponse.
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
