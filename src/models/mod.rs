//! Data Models Module
//!
//! Request and response DTOs for the HTTP API.

mod requests;
mod responses;

pub use requests::TestAgentRequest;
pub use responses::{
    CacheStatsEntry, CacheStatsResponse, ErrorResponse, HealthResponse, StreamChunk, StreamTiming,
    TestAgentResponse, UsageSummaryResponse,
};
