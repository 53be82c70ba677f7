//! Completion Relay Module
//!
//! Drives one completion request end to end: resolves the effective agent
//! configuration, persists conversation messages, consumes the upstream
//! stream under idle and total-duration ceilings, accounts token usage and
//! re-emits chunks to the client in arrival order.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::cache::{get_or_compute, MemoryCache};
use crate::error::{GatewayError, Result};
use crate::models::{StreamChunk, StreamTiming, TestAgentRequest, TestAgentResponse};
use crate::persistence::{AgentConfig, ConversationStore};
use crate::relay::provider::{CompletionProvider, CompletionRequest};
use crate::relay::usage::{estimate_tokens, TokenUsage, UsageLog};

// == Relay Configuration ==
/// Timeout and retry ceilings for the relay.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Maximum gap between upstream chunks
    pub idle_timeout: Duration,
    /// Maximum end-to-end stream duration
    pub total_timeout: Duration,
    /// Model used when neither agent nor request names one
    pub default_model: String,
}

/// Retries for transient upstream failures, non-streaming path only.
const MAX_RETRIES: u32 = 2;
/// Linear backoff step between retries.
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Channel capacity between the relay task and the response body.
const CHUNK_BUFFER: usize = 16;

// == Completion Relay ==
/// Orchestrates completion calls against the provider, with read-through
/// caches for agent records and per-user provider keys.
pub struct CompletionRelay {
    provider: Arc<dyn CompletionProvider>,
    store: Arc<dyn ConversationStore>,
    usage_log: Arc<UsageLog>,
    agent_cache: Arc<RwLock<MemoryCache<AgentConfig>>>,
    api_key_cache: Arc<RwLock<MemoryCache<String>>>,
    config: RelayConfig,
    /// Environment-default credential, used when no per-user key is stored
    env_api_key: Option<String>,
}

impl CompletionRelay {
    /// Creates a relay over the given collaborators.
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        store: Arc<dyn ConversationStore>,
        usage_log: Arc<UsageLog>,
        agent_cache: Arc<RwLock<MemoryCache<AgentConfig>>>,
        api_key_cache: Arc<RwLock<MemoryCache<String>>>,
        config: RelayConfig,
        env_api_key: Option<String>,
    ) -> Self {
        Self {
            provider,
            store,
            usage_log,
            agent_cache,
            api_key_cache,
            config,
            env_api_key,
        }
    }

    // == Configuration Resolution ==
    /// Resolves the effective completion parameters from a stored agent
    /// and/or inline request fields; inline fields win.
    ///
    /// A configuration without a system prompt is a fatal error reported
    /// before any chunk is emitted.
    async fn resolve_request(
        &self,
        request: &TestAgentRequest,
        user_id: Option<&str>,
    ) -> Result<CompletionRequest> {
        let agent = match &request.agent_id {
            Some(agent_id) => Some(self.lookup_agent(agent_id).await?),
            None => None,
        };

        let system_prompt = request
            .system_prompt
            .clone()
            .or_else(|| agent.as_ref().and_then(|a| a.system_prompt.clone()))
            .filter(|prompt| !prompt.trim().is_empty())
            .ok_or(GatewayError::MissingSystemPrompt)?;

        let model = request
            .model
            .clone()
            .or_else(|| agent.as_ref().and_then(|a| a.model.clone()))
            .unwrap_or_else(|| self.config.default_model.clone());

        let temperature = request
            .temperature
            .or_else(|| agent.as_ref().and_then(|a| a.temperature));
        let max_tokens = request
            .max_tokens
            .or_else(|| agent.as_ref().and_then(|a| a.max_tokens));

        let api_key = self.resolve_api_key(user_id).await?;

        Ok(CompletionRequest {
            model,
            system_prompt,
            message: request.message.clone(),
            temperature,
            max_tokens,
            api_key,
        })
    }

    /// Read-through agent lookup; only found agents are cached.
    async fn lookup_agent(&self, agent_id: &str) -> Result<AgentConfig> {
        let key = format!("agent:{}", agent_id);
        if let Some(agent) = self.agent_cache.write().await.get(&key) {
            return Ok(agent);
        }

        let agent = self
            .store
            .get_agent(agent_id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("agent {}", agent_id)))?;
        self.agent_cache
            .write()
            .await
            .set(key, agent.clone(), None);
        Ok(agent)
    }

    /// Resolves the provider credential: per-user stored key first, then
    /// the environment default. Stored-key lookups are memoized.
    async fn resolve_api_key(&self, user_id: Option<&str>) -> Result<Option<String>> {
        if let Some(user) = user_id {
            let key = format!("apikey:{}", user);
            let store = self.store.clone();
            let user = user.to_string();
            let lookup = get_or_compute(&self.api_key_cache, &key, None, || async move {
                match store.get_api_key(&user).await? {
                    Some(stored) => Ok(stored),
                    // not cached: absence falls through to the env default
                    None => Err(GatewayError::NotFound("api key".to_string())),
                }
            })
            .await;

            match lookup {
                Ok(stored) => return Ok(Some(stored)),
                Err(GatewayError::NotFound(_)) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(self.env_api_key.clone())
    }

    // == Non-Streaming Path ==
    /// Performs the full-response sibling of the streaming call.
    ///
    /// Usage comes from the provider's own report. Transient upstream 5xx
    /// failures are retried a bounded number of times with linear backoff;
    /// auth and rate-limit errors are surfaced immediately.
    pub async fn complete(
        &self,
        request: &TestAgentRequest,
        user_id: Option<&str>,
    ) -> Result<TestAgentResponse> {
        let completion_request = self.resolve_request(request, user_id).await?;

        let mut attempt = 0;
        let response = loop {
            match self.provider.complete(&completion_request).await {
                Ok(response) => break response,
                Err(err) if err.is_retryable() && attempt < MAX_RETRIES => {
                    attempt += 1;
                    warn!(attempt, error = %err, "Retrying transient upstream failure");
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                }
                Err(err) => return Err(err),
            }
        };

        self.usage_log
            .record(
                response.usage.clone(),
                user_id.map(str::to_string),
                request.agent_id.clone(),
            )
            .await;

        Ok(TestAgentResponse {
            content: response.content,
            usage: response.usage,
        })
    }

    // == Streaming Path ==
    /// Opens the streaming call and returns the chunk sequence.
    ///
    /// The relay runs as a spawned task feeding a bounded channel; when the
    /// client disconnects the channel closes and the task stops consuming
    /// the upstream stream. Exactly one terminal chunk ends every sequence.
    pub fn stream_chunks(
        self: &Arc<Self>,
        request: TestAgentRequest,
        user_id: Option<String>,
    ) -> ReceiverStream<StreamChunk> {
        let (tx, rx) = mpsc::channel(CHUNK_BUFFER);
        let relay = self.clone();

        tokio::spawn(async move {
            relay.run_stream(request, user_id, tx).await;
        });

        ReceiverStream::new(rx)
    }

    async fn run_stream(
        &self,
        request: TestAgentRequest,
        user_id: Option<String>,
        tx: mpsc::Sender<StreamChunk>,
    ) {
        let started = Instant::now();

        let completion_request = match self.resolve_request(&request, user_id.as_deref()).await {
            Ok(resolved) => resolved,
            Err(err) => {
                let _ = tx.send(StreamChunk::error(err.to_string())).await;
                return;
            }
        };

        // Persist the user message before streaming so it survives a
        // failed generation.
        let conversation_id = match self
            .prepare_conversation(&request, user_id.as_deref())
            .await
        {
            Ok(conversation_id) => conversation_id,
            Err(err) => {
                let _ = tx.send(StreamChunk::error(err.to_string())).await;
                return;
            }
        };

        let mut upstream = match self.provider.stream(&completion_request).await {
            Ok(stream) => stream,
            Err(err) => {
                let _ = tx.send(StreamChunk::error(err.to_string())).await;
                return;
            }
        };

        let stream_started = Instant::now();
        let deadline = stream_started + self.config.total_timeout;
        let mut accumulated = String::new();
        let mut completion_tokens: u64 = 0;

        loop {
            let idle_deadline = Instant::now() + self.config.idle_timeout;
            let effective = idle_deadline.min(deadline);

            match tokio::time::timeout_at(effective, upstream.next()).await {
                Err(_) => {
                    // Which ceiling fired decides the error variant
                    let err = if Instant::now() >= deadline {
                        GatewayError::StreamTimeout
                    } else {
                        GatewayError::StreamIdleTimeout
                    };
                    warn!(error = %err, "Completion stream timed out");
                    let _ = tx.send(StreamChunk::error(err.to_string())).await;
                    return;
                }
                Ok(Some(Ok(delta))) => {
                    accumulated.push_str(&delta);
                    completion_tokens += estimate_tokens(&delta);
                    if tx.send(StreamChunk::content(delta)).await.is_err() {
                        info!("Client disconnected, abandoning upstream stream");
                        return;
                    }
                }
                Ok(Some(Err(err))) => {
                    warn!(error = %err, "Upstream stream failed mid-flight");
                    let _ = tx.send(StreamChunk::error(err.to_string())).await;
                    return;
                }
                Ok(None) => break,
            }
        }

        // Stream exhausted: account usage, persist the reply, emit the
        // terminal chunk.
        let prompt = format!(
            "{}{}",
            completion_request.system_prompt, completion_request.message
        );
        let usage = TokenUsage::new(estimate_tokens(&prompt), completion_tokens);
        self.usage_log
            .record(usage, user_id.clone(), request.agent_id.clone())
            .await;

        if let Some(conversation_id) = &conversation_id {
            if let Err(err) = self
                .store
                .create_message(conversation_id, "assistant", &accumulated)
                .await
            {
                warn!(error = %err, "Failed to persist assistant message");
            }
        }

        let timing = StreamTiming {
            total: started.elapsed().as_millis() as u64,
            streaming: stream_started.elapsed().as_millis() as u64,
        };
        debug!(
            total_ms = timing.total,
            streaming_ms = timing.streaming,
            "Completion stream finished"
        );
        let _ = tx.send(StreamChunk::done(timing)).await;
    }

    /// Verifies the requested conversation and persists the incoming user
    /// message. Requests without a `conversation_id` are not persisted; a
    /// `conversation_id` that doesn't exist is an error, since messages
    /// written under a substitute id would be unreachable for the client.
    async fn prepare_conversation(
        &self,
        request: &TestAgentRequest,
        _user_id: Option<&str>,
    ) -> Result<Option<String>> {
        let Some(requested) = &request.conversation_id else {
            return Ok(None);
        };

        if !self.store.conversation_exists(requested).await? {
            return Err(GatewayError::NotFound(format!(
                "conversation {}",
                requested
            )));
        }

        self.store
            .create_message(requested, "user", &request.message)
            .await?;
        Ok(Some(requested.clone()))
    }
}
