//! Span lifecycle wrapping for GenAI operations.
//!
//! The [`Instrumentor`] wraps a unit of work (embed, retrieve, rerank,
//! generate, tool call) in an OpenTelemetry span: it populates static
//! attributes up front, runs the wrapped future or closure under the span's
//! context, extracts usage metadata from the result through a caller-supplied
//! extractor, attaches cost and timing, records failures, and ends the span
//! on every exit path exactly once.
//!
//! The wrapper never changes the wrapped call's contract: the result or
//! error comes back unchanged, and internal telemetry failures degrade to
//! omitted attributes.
//!
//! # Example
//!
//! ```no_run
//! use genai_telemetry::{GenerateOptions, GenerateUsage, Instrumentor};
//!
//! # async fn call_llm(prompt: &str) -> Result<String, std::io::Error> { Ok(String::new()) }
//! # async fn demo() -> Result<(), std::io::Error> {
//! let telemetry = Instrumentor::default();
//! let options = GenerateOptions::new("gpt-4", "openai").with_temperature(0.7);
//!
//! let answer = telemetry
//!     .generate(
//!         &options,
//!         |text: &String| GenerateUsage {
//!             output_tokens: Some(text.len() as u64 / 4),
//!             ..GenerateUsage::default()
//!         },
//!         call_llm("What is a span?"),
//!     )
//!     .await?;
//! # Ok(()) }
//! ```

use std::any::type_name;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use opentelemetry::global;
use opentelemetry::trace::{FutureExt, SpanKind, Status, TraceContextExt, Tracer};
use opentelemetry::{Context, KeyValue};
use serde::Serialize;

use crate::config::{global_config, ConfigHandle, GenAiConfig};
use crate::cost::{global_calculator, CostCalculator};
use crate::metrics::TelemetryMetrics;
use crate::redaction::{global_redactor, Redactor};

const TRACER_NAME: &str = "genai-telemetry";
const ERROR_MESSAGE_MAX_CHARS: usize = 200;

/// The kind of GenAI operation being instrumented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Embedding generation
    Embed,
    /// Vector/document retrieval
    Retrieve,
    /// Candidate reranking
    Rerank,
    /// LLM text generation
    Generate,
    /// Agent tool/function invocation
    ToolCall,
}

impl OperationKind {
    /// Short operation name used in attributes and metric labels.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Embed => "embed",
            Self::Retrieve => "retrieve",
            Self::Rerank => "rerank",
            Self::Generate => "generate",
            Self::ToolCall => "tool_call",
        }
    }

    fn span_name(self) -> &'static str {
        match self {
            Self::Embed => "gen_ai.embed",
            Self::Retrieve => "gen_ai.retrieve",
            Self::Rerank => "gen_ai.rerank",
            Self::Generate => "gen_ai.generate",
            Self::ToolCall => "gen_ai.tool_call",
        }
    }
}

/// Static descriptor for an embedding operation.
#[derive(Debug, Clone)]
pub struct EmbedOptions<'a> {
    /// Model identifier (e.g. `text-embedding-3-small`)
    pub model: &'a str,
    /// Provider name (e.g. `openai`, `cohere`)
    pub provider: &'a str,
    /// Number of texts being embedded
    pub batch_size: Option<u64>,
    /// Embedding vector dimensions
    pub dimensions: Option<u64>,
}

impl<'a> EmbedOptions<'a> {
    /// Create a descriptor for the given model and provider.
    #[must_use]
    pub fn new(model: &'a str, provider: &'a str) -> Self {
        Self {
            model,
            provider,
            batch_size: None,
            dimensions: None,
        }
    }

    /// Set the batch size
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: u64) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    /// Set the embedding dimensions
    #[must_use]
    pub fn with_dimensions(mut self, dimensions: u64) -> Self {
        self.dimensions = Some(dimensions);
        self
    }
}

/// Static descriptor for a retrieval operation.
#[derive(Debug, Clone)]
pub struct RetrieveOptions<'a> {
    /// Vector store / document source (e.g. `pinecone`, `qdrant`)
    pub source: &'a str,
    /// Number of results requested
    pub top_k: u64,
    /// Target index or collection name
    pub index_name: Option<&'a str>,
    /// Metadata filters applied (serialized and redacted before attaching)
    pub filters: Option<&'a serde_json::Value>,
}

impl<'a> RetrieveOptions<'a> {
    /// Create a descriptor for the given source and requested top-k.
    #[must_use]
    pub fn new(source: &'a str, top_k: u64) -> Self {
        Self {
            source,
            top_k,
            index_name: None,
            filters: None,
        }
    }

    /// Set the index name
    #[must_use]
    pub fn with_index_name(mut self, index_name: &'a str) -> Self {
        self.index_name = Some(index_name);
        self
    }

    /// Set the metadata filters
    #[must_use]
    pub fn with_filters(mut self, filters: &'a serde_json::Value) -> Self {
        self.filters = Some(filters);
        self
    }
}

/// Static descriptor for a rerank operation.
#[derive(Debug, Clone)]
pub struct RerankOptions<'a> {
    /// Reranker model (e.g. `rerank-english-v3.0`)
    pub model: &'a str,
    /// Provider name
    pub provider: &'a str,
    /// Number of candidates being reranked
    pub input_count: Option<u64>,
    /// Requested top-n results
    pub top_n: Option<u64>,
}

impl<'a> RerankOptions<'a> {
    /// Create a descriptor for the given model and provider.
    #[must_use]
    pub fn new(model: &'a str, provider: &'a str) -> Self {
        Self {
            model,
            provider,
            input_count: None,
            top_n: None,
        }
    }

    /// Set the candidate count
    #[must_use]
    pub fn with_input_count(mut self, input_count: u64) -> Self {
        self.input_count = Some(input_count);
        self
    }

    /// Set the requested top-n
    #[must_use]
    pub fn with_top_n(mut self, top_n: u64) -> Self {
        self.top_n = Some(top_n);
        self
    }
}

/// Static descriptor for a generation operation.
#[derive(Debug, Clone)]
pub struct GenerateOptions<'a> {
    /// Model identifier (e.g. `gpt-4`, `claude-3-opus`)
    pub model: &'a str,
    /// Provider name
    pub provider: &'a str,
    /// Sampling temperature
    pub temperature: Option<f64>,
    /// Maximum completion length
    pub max_tokens: Option<u64>,
    /// Whether streaming is used
    pub streaming: bool,
    /// Prompt text; attached (redacted, truncated) only when prompt logging
    /// is enabled in configuration
    pub prompt: Option<&'a str>,
}

impl<'a> GenerateOptions<'a> {
    /// Create a descriptor for the given model and provider.
    #[must_use]
    pub fn new(model: &'a str, provider: &'a str) -> Self {
        Self {
            model,
            provider,
            temperature: None,
            max_tokens: None,
            streaming: false,
            prompt: None,
        }
    }

    /// Set the sampling temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the maximum completion length
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Mark the request as streaming
    #[must_use]
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// Provide the prompt text for (configuration-gated) logging
    #[must_use]
    pub fn with_prompt(mut self, prompt: &'a str) -> Self {
        self.prompt = Some(prompt);
        self
    }
}

/// Static descriptor for a tool invocation.
#[derive(Debug, Clone)]
pub struct ToolCallOptions<'a> {
    /// Tool/function name
    pub name: &'a str,
    /// Tool parameters (serialized and redacted before attaching)
    pub parameters: Option<&'a serde_json::Value>,
}

impl<'a> ToolCallOptions<'a> {
    /// Create a descriptor for the named tool.
    #[must_use]
    pub fn new(name: &'a str) -> Self {
        Self {
            name,
            parameters: None,
        }
    }

    /// Set the tool parameters
    #[must_use]
    pub fn with_parameters(mut self, parameters: &'a serde_json::Value) -> Self {
        self.parameters = Some(parameters);
        self
    }
}

/// Usage metadata extracted from an embedding result.
#[derive(Debug, Clone, Default)]
pub struct EmbedUsage {
    /// Tokens consumed by the embedding request
    pub input_tokens: Option<u64>,
}

/// Usage metadata extracted from a generation result.
///
/// Every field is optional; extraction is best-effort and missing fields are
/// simply not attached to the span.
#[derive(Debug, Clone, Default)]
pub struct GenerateUsage {
    /// Prompt tokens consumed
    pub input_tokens: Option<u64>,
    /// Completion tokens produced
    pub output_tokens: Option<u64>,
    /// Total tokens
    pub total_tokens: Option<u64>,
    /// Why generation stopped (e.g. `stop`, `length`)
    pub finish_reason: Option<String>,
    /// Completion text; attached (redacted, truncated) only when prompt
    /// logging is enabled in configuration
    pub completion: Option<String>,
}

/// Span guard owning one operation's span and timing state.
///
/// Ends the span exactly once: either explicitly on the success/error path,
/// or from `Drop` when the wrapped future is cancelled or the call unwinds.
struct SpanGuard {
    cx: Context,
    kind: OperationKind,
    start: Instant,
    max_attr: usize,
    ended: bool,
}

impl SpanGuard {
    fn set_str(&self, key: &'static str, value: &str) {
        let value = truncate_chars(value, self.max_attr);
        self.cx
            .span()
            .set_attribute(KeyValue::new(key, value.to_string()));
    }

    fn set_i64(&self, key: &'static str, value: i64) {
        self.cx.span().set_attribute(KeyValue::new(key, value));
    }

    fn set_f64(&self, key: &'static str, value: f64) {
        self.cx.span().set_attribute(KeyValue::new(key, value));
    }

    fn set_bool(&self, key: &'static str, value: bool) {
        self.cx.span().set_attribute(KeyValue::new(key, value));
    }

    fn finish(&mut self, status: Status) {
        if self.ended {
            return;
        }
        self.ended = true;
        let span = self.cx.span();
        span.set_attribute(KeyValue::new(
            "gen_ai.request.duration_ms",
            self.start.elapsed().as_millis() as i64,
        ));
        span.set_status(status);
        span.end();
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        if !self.ended {
            // Cancelled future or unwinding call: the span must still close,
            // with an error status.
            self.set_bool("error", true);
            self.cx
                .span()
                .set_attribute(KeyValue::new("error.type", "aborted"));
            self.finish(Status::error("operation aborted before completion"));
        }
    }
}

/// Instruments GenAI operations with spans, cost, and redaction.
///
/// Holds explicit references to its collaborators so tests and multi-tenant
/// setups can wire isolated instances; [`Instrumentor::default`] wires the
/// process-wide configuration, calculator, and redactor.
pub struct Instrumentor {
    config: Arc<ConfigHandle>,
    costs: Arc<CostCalculator>,
    redactor: Arc<Redactor>,
    metrics: Option<Arc<TelemetryMetrics>>,
}

impl Default for Instrumentor {
    fn default() -> Self {
        Self::new(global_config(), global_calculator(), global_redactor())
    }
}

impl Instrumentor {
    /// Create an instrumentor with explicit collaborators.
    #[must_use]
    pub fn new(
        config: Arc<ConfigHandle>,
        costs: Arc<CostCalculator>,
        redactor: Arc<Redactor>,
    ) -> Self {
        Self {
            config,
            costs,
            redactor,
            metrics: None,
        }
    }

    /// Also feed per-span values to a prometheus metric family.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<TelemetryMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Access the configuration handle this instrumentor reads.
    #[must_use]
    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    /// Access the cost calculator this instrumentor uses.
    #[must_use]
    pub fn costs(&self) -> &CostCalculator {
        &self.costs
    }

    /// Access the redactor this instrumentor uses.
    #[must_use]
    pub fn redactor(&self) -> &Redactor {
        &self.redactor
    }

    /// Instrument an asynchronous embedding operation.
    pub async fn embed<T, E, Fut, X>(
        &self,
        options: &EmbedOptions<'_>,
        extract: X,
        fut: Fut,
    ) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        X: FnOnce(&T) -> EmbedUsage,
        E: Display,
    {
        let cfg = self.config.snapshot();
        let guard = self.start(OperationKind::Embed, &cfg);
        self.set_embed_attrs(&guard, options);
        let cx = guard.cx.clone();
        let result = fut.with_context(cx).await;
        self.complete_embed(guard, options, extract, result)
    }

    /// Instrument a synchronous embedding operation.
    pub fn embed_sync<T, E, F, X>(
        &self,
        options: &EmbedOptions<'_>,
        extract: X,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        X: FnOnce(&T) -> EmbedUsage,
        E: Display,
    {
        let cfg = self.config.snapshot();
        let guard = self.start(OperationKind::Embed, &cfg);
        self.set_embed_attrs(&guard, options);
        let result = {
            let _attached = guard.cx.clone().attach();
            f()
        };
        self.complete_embed(guard, options, extract, result)
    }

    /// Instrument an asynchronous retrieval operation. `count` maps the
    /// result to its number of returned items.
    pub async fn retrieve<T, E, Fut, X>(
        &self,
        options: &RetrieveOptions<'_>,
        count: X,
        fut: Fut,
    ) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        X: FnOnce(&T) -> usize,
        E: Display,
    {
        let cfg = self.config.snapshot();
        let guard = self.start(OperationKind::Retrieve, &cfg);
        self.set_retrieve_attrs(&guard, &cfg, options);
        let cx = guard.cx.clone();
        let result = fut.with_context(cx).await;
        self.complete_retrieve(guard, count, result)
    }

    /// Instrument a synchronous retrieval operation.
    pub fn retrieve_sync<T, E, F, X>(
        &self,
        options: &RetrieveOptions<'_>,
        count: X,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        X: FnOnce(&T) -> usize,
        E: Display,
    {
        let cfg = self.config.snapshot();
        let guard = self.start(OperationKind::Retrieve, &cfg);
        self.set_retrieve_attrs(&guard, &cfg, options);
        let result = {
            let _attached = guard.cx.clone().attach();
            f()
        };
        self.complete_retrieve(guard, count, result)
    }

    /// Instrument an asynchronous rerank operation. `count` maps the result
    /// to the number of reranked items returned.
    pub async fn rerank<T, E, Fut, X>(
        &self,
        options: &RerankOptions<'_>,
        count: X,
        fut: Fut,
    ) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        X: FnOnce(&T) -> usize,
        E: Display,
    {
        let cfg = self.config.snapshot();
        let guard = self.start(OperationKind::Rerank, &cfg);
        self.set_rerank_attrs(&guard, options);
        let cx = guard.cx.clone();
        let result = fut.with_context(cx).await;
        self.complete_rerank(guard, count, result)
    }

    /// Instrument a synchronous rerank operation.
    pub fn rerank_sync<T, E, F, X>(
        &self,
        options: &RerankOptions<'_>,
        count: X,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        X: FnOnce(&T) -> usize,
        E: Display,
    {
        let cfg = self.config.snapshot();
        let guard = self.start(OperationKind::Rerank, &cfg);
        self.set_rerank_attrs(&guard, options);
        let result = {
            let _attached = guard.cx.clone().attach();
            f()
        };
        self.complete_rerank(guard, count, result)
    }

    /// Instrument an asynchronous generation operation.
    pub async fn generate<T, E, Fut, X>(
        &self,
        options: &GenerateOptions<'_>,
        extract: X,
        fut: Fut,
    ) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        X: FnOnce(&T) -> GenerateUsage,
        E: Display,
    {
        let cfg = self.config.snapshot();
        let guard = self.start(OperationKind::Generate, &cfg);
        self.set_generate_attrs(&guard, &cfg, options);
        let cx = guard.cx.clone();
        let result = fut.with_context(cx).await;
        self.complete_generate(guard, &cfg, options, extract, result)
    }

    /// Instrument a synchronous generation operation.
    pub fn generate_sync<T, E, F, X>(
        &self,
        options: &GenerateOptions<'_>,
        extract: X,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        X: FnOnce(&T) -> GenerateUsage,
        E: Display,
    {
        let cfg = self.config.snapshot();
        let guard = self.start(OperationKind::Generate, &cfg);
        self.set_generate_attrs(&guard, &cfg, options);
        let result = {
            let _attached = guard.cx.clone().attach();
            f()
        };
        self.complete_generate(guard, &cfg, options, extract, result)
    }

    /// Instrument an asynchronous tool invocation. The result is serialized
    /// to measure its size; serialization failure omits the attribute.
    pub async fn tool_call<T, E, Fut>(
        &self,
        options: &ToolCallOptions<'_>,
        fut: Fut,
    ) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        T: Serialize,
        E: Display,
    {
        let cfg = self.config.snapshot();
        let guard = self.start(OperationKind::ToolCall, &cfg);
        self.set_tool_attrs(&guard, &cfg, options);
        let cx = guard.cx.clone();
        let result = fut.with_context(cx).await;
        self.complete_tool_call(guard, result)
    }

    /// Instrument a synchronous tool invocation.
    pub fn tool_call_sync<T, E, F>(&self, options: &ToolCallOptions<'_>, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        T: Serialize,
        E: Display,
    {
        let cfg = self.config.snapshot();
        let guard = self.start(OperationKind::ToolCall, &cfg);
        self.set_tool_attrs(&guard, &cfg, options);
        let result = {
            let _attached = guard.cx.clone().attach();
            f()
        };
        self.complete_tool_call(guard, result)
    }

    fn start(&self, kind: OperationKind, cfg: &GenAiConfig) -> SpanGuard {
        let tracer = global::tracer(TRACER_NAME);
        let span = tracer
            .span_builder(kind.span_name())
            .with_kind(SpanKind::Internal)
            .start(&tracer);
        let guard = SpanGuard {
            cx: Context::current_with_span(span),
            kind,
            start: Instant::now(),
            max_attr: cfg.max_attribute_length,
            ended: false,
        };

        guard.set_str("gen_ai.operation.name", kind.as_str());
        guard.set_str("gen_ai.environment", &cfg.environment);
        if let Some(ref tenant) = cfg.tenant_id {
            guard.set_str("gen_ai.tenant.id", tenant);
        }
        if let Some(ref user) = cfg.user_id {
            guard.set_str("gen_ai.user.id", user);
        }
        guard
    }

    fn set_embed_attrs(&self, guard: &SpanGuard, options: &EmbedOptions<'_>) {
        guard.set_str("gen_ai.request.model", options.model);
        guard.set_str("gen_ai.request.provider", options.provider);
        if let Some(batch_size) = options.batch_size {
            guard.set_i64("gen_ai.request.batch_size", batch_size as i64);
        }
        if let Some(dimensions) = options.dimensions {
            guard.set_i64("gen_ai.response.dimensions", dimensions as i64);
        }
    }

    fn set_retrieve_attrs(
        &self,
        guard: &SpanGuard,
        cfg: &GenAiConfig,
        options: &RetrieveOptions<'_>,
    ) {
        guard.set_str("gen_ai.retrieval.source", options.source);
        guard.set_i64("gen_ai.retrieval.top_k", options.top_k as i64);
        if let Some(index_name) = options.index_name {
            guard.set_str("gen_ai.retrieval.index_name", index_name);
        }
        if let Some(filters) = options.filters {
            if let Some(serialized) = self.serialize_redacted(cfg, filters) {
                guard.set_str("gen_ai.retrieval.filters", &serialized);
            }
        }
    }

    fn set_rerank_attrs(&self, guard: &SpanGuard, options: &RerankOptions<'_>) {
        guard.set_str("gen_ai.request.model", options.model);
        guard.set_str("gen_ai.request.provider", options.provider);
        if let Some(input_count) = options.input_count {
            guard.set_i64("gen_ai.rerank.input_count", input_count as i64);
        }
        if let Some(top_n) = options.top_n {
            guard.set_i64("gen_ai.rerank.top_n", top_n as i64);
        }
    }

    fn set_generate_attrs(
        &self,
        guard: &SpanGuard,
        cfg: &GenAiConfig,
        options: &GenerateOptions<'_>,
    ) {
        guard.set_str("gen_ai.request.model", options.model);
        guard.set_str("gen_ai.request.provider", options.provider);
        if let Some(temperature) = options.temperature {
            guard.set_f64("gen_ai.request.temperature", temperature);
        }
        if let Some(max_tokens) = options.max_tokens {
            guard.set_i64("gen_ai.request.max_tokens", max_tokens as i64);
        }
        if options.streaming {
            guard.set_bool("gen_ai.request.streaming", true);
        }
        if cfg.log_prompts {
            if let Some(prompt) = options.prompt {
                let redacted = self.redactor.redact(prompt, &cfg.redact_patterns);
                guard.set_str("gen_ai.prompt", &redacted);
            }
        }
    }

    fn set_tool_attrs(&self, guard: &SpanGuard, cfg: &GenAiConfig, options: &ToolCallOptions<'_>) {
        guard.set_str("gen_ai.tool.name", options.name);
        if let Some(parameters) = options.parameters {
            if let Some(serialized) = self.serialize_redacted(cfg, parameters) {
                guard.set_str("gen_ai.tool.parameters", &serialized);
            }
        }
    }

    fn complete_embed<T, E: Display>(
        &self,
        mut guard: SpanGuard,
        options: &EmbedOptions<'_>,
        extract: impl FnOnce(&T) -> EmbedUsage,
        result: Result<T, E>,
    ) -> Result<T, E> {
        match result {
            Ok(value) => {
                let usage = extract(&value);
                if let Some(tokens) = usage.input_tokens {
                    guard.set_i64("gen_ai.usage.input_tokens", tokens as i64);
                    let cost = self
                        .costs
                        .calculate_cost(options.provider, options.model, tokens, 0);
                    if cost > 0.0 {
                        guard.set_f64("gen_ai.usage.cost_usd", cost);
                    }
                    if let Some(ref metrics) = self.metrics {
                        metrics.record_tokens(guard.kind.as_str(), tokens, 0);
                        metrics.record_cost(options.provider, options.model, cost);
                    }
                }
                self.succeed(&mut guard);
                Ok(value)
            }
            Err(err) => {
                self.fail(guard, &err);
                Err(err)
            }
        }
    }

    fn complete_retrieve<T, E: Display>(
        &self,
        mut guard: SpanGuard,
        count: impl FnOnce(&T) -> usize,
        result: Result<T, E>,
    ) -> Result<T, E> {
        match result {
            Ok(value) => {
                let results_count = count(&value);
                guard.set_i64("gen_ai.retrieval.results_count", results_count as i64);
                // Coarse hit@k proxy: did we get anything at all? Not a
                // relevance judgment.
                let hit = results_count > 0;
                guard.set_i64("gen_ai.retrieval.hit_at_k", i64::from(hit));
                if let Some(ref metrics) = self.metrics {
                    metrics.record_hit_at_k(hit);
                }
                self.succeed(&mut guard);
                Ok(value)
            }
            Err(err) => {
                self.fail(guard, &err);
                Err(err)
            }
        }
    }

    fn complete_rerank<T, E: Display>(
        &self,
        mut guard: SpanGuard,
        count: impl FnOnce(&T) -> usize,
        result: Result<T, E>,
    ) -> Result<T, E> {
        match result {
            Ok(value) => {
                let output_count = count(&value);
                guard.set_i64("gen_ai.rerank.output_count", output_count as i64);
                self.succeed(&mut guard);
                Ok(value)
            }
            Err(err) => {
                self.fail(guard, &err);
                Err(err)
            }
        }
    }

    fn complete_generate<T, E: Display>(
        &self,
        mut guard: SpanGuard,
        cfg: &GenAiConfig,
        options: &GenerateOptions<'_>,
        extract: impl FnOnce(&T) -> GenerateUsage,
        result: Result<T, E>,
    ) -> Result<T, E> {
        match result {
            Ok(value) => {
                let usage = extract(&value);

                if let Some(tokens) = usage.input_tokens {
                    guard.set_i64("gen_ai.usage.input_tokens", tokens as i64);
                }
                if let Some(tokens) = usage.output_tokens {
                    guard.set_i64("gen_ai.usage.output_tokens", tokens as i64);
                }
                if let Some(tokens) = usage.total_tokens {
                    guard.set_i64("gen_ai.usage.total_tokens", tokens as i64);
                }

                if usage.input_tokens.is_some() || usage.output_tokens.is_some() {
                    let input = usage.input_tokens.unwrap_or(0);
                    let output = usage.output_tokens.unwrap_or(0);
                    let cost =
                        self.costs
                            .calculate_cost(options.provider, options.model, input, output);
                    if cost > 0.0 {
                        guard.set_f64("gen_ai.usage.cost_usd", cost);
                    }
                    if let Some(ref metrics) = self.metrics {
                        metrics.record_tokens(guard.kind.as_str(), input, output);
                        metrics.record_cost(options.provider, options.model, cost);
                    }
                }

                if let Some(ref finish_reason) = usage.finish_reason {
                    guard.set_str("gen_ai.response.finish_reason", finish_reason);
                }
                if cfg.log_prompts {
                    if let Some(ref completion) = usage.completion {
                        let redacted = self.redactor.redact(completion, &cfg.redact_patterns);
                        guard.set_str("gen_ai.completion", &redacted);
                    }
                }

                self.succeed(&mut guard);
                Ok(value)
            }
            Err(err) => {
                self.fail(guard, &err);
                Err(err)
            }
        }
    }

    fn complete_tool_call<T: Serialize, E: Display>(
        &self,
        mut guard: SpanGuard,
        result: Result<T, E>,
    ) -> Result<T, E> {
        match result {
            Ok(value) => {
                match serde_json::to_vec(&value) {
                    Ok(bytes) => {
                        guard.set_i64("gen_ai.tool.result_size_bytes", bytes.len() as i64);
                    }
                    Err(err) => {
                        tracing::debug!(error = %err, "tool result not serializable, omitting size");
                    }
                }
                guard.set_str("gen_ai.tool.result_status", "success");
                self.succeed(&mut guard);
                Ok(value)
            }
            Err(err) => {
                guard.set_str("gen_ai.tool.result_status", "error");
                guard
                    .cx
                    .span()
                    .set_attribute(KeyValue::new("gen_ai.tool.error_type", type_name::<E>()));
                self.fail(guard, &err);
                Err(err)
            }
        }
    }

    fn succeed(&self, guard: &mut SpanGuard) {
        if let Some(ref metrics) = self.metrics {
            metrics.record_request(guard.kind.as_str(), true, guard.start.elapsed());
        }
        guard.finish(Status::Ok);
    }

    fn fail<E: Display>(&self, mut guard: SpanGuard, err: &E) {
        let message = err.to_string();
        guard.set_bool("error", true);
        guard
            .cx
            .span()
            .set_attribute(KeyValue::new("error.type", type_name::<E>()));
        guard.cx.span().set_attribute(KeyValue::new(
            "error.message",
            truncate_chars(&message, ERROR_MESSAGE_MAX_CHARS).to_string(),
        ));
        if let Some(ref metrics) = self.metrics {
            metrics.record_request(guard.kind.as_str(), false, guard.start.elapsed());
        }
        guard.finish(Status::error(message));
    }

    fn serialize_redacted(&self, cfg: &GenAiConfig, value: &serde_json::Value) -> Option<String> {
        match serde_json::to_string(value) {
            Ok(serialized) => Some(self.redactor.redact(&serialized, &cfg.redact_patterns)),
            Err(err) => {
                tracing::debug!(error = %err, "attribute not serializable, omitting");
                None
            }
        }
    }
}

fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigUpdate;

    fn isolated() -> Instrumentor {
        Instrumentor::new(
            Arc::new(ConfigHandle::default()),
            Arc::new(CostCalculator::new()),
            Arc::new(Redactor::new()),
        )
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 3), "hel");
        // Multi-byte characters are kept whole
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("日本語テスト", 3), "日本語");
    }

    #[test]
    fn test_operation_kind_names() {
        assert_eq!(OperationKind::Embed.as_str(), "embed");
        assert_eq!(OperationKind::ToolCall.as_str(), "tool_call");
        assert_eq!(OperationKind::Generate.span_name(), "gen_ai.generate");
    }

    #[test]
    fn test_sync_success_returns_value_unchanged() {
        let telemetry = isolated();
        let options = GenerateOptions::new("gpt-4", "openai");
        let result: Result<String, std::io::Error> = telemetry.generate_sync(
            &options,
            |_| GenerateUsage::default(),
            || Ok("answer".to_string()),
        );
        assert_eq!(result.unwrap(), "answer");
    }

    #[test]
    fn test_sync_error_propagates_unchanged() {
        let telemetry = isolated();
        let options = ToolCallOptions::new("web_search");
        let result: Result<serde_json::Value, std::io::Error> = telemetry
            .tool_call_sync(&options, || {
                Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "upstream timed out"))
            });
        let err = result.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::TimedOut);
        assert_eq!(err.to_string(), "upstream timed out");
    }

    #[test]
    fn test_retrieve_counts_results() {
        let telemetry = isolated();
        let options = RetrieveOptions::new("qdrant", 5);
        let result: Result<Vec<&str>, std::io::Error> =
            telemetry.retrieve_sync(&options, Vec::len, || Ok(vec!["doc-1", "doc-2"]));
        assert_eq!(result.unwrap().len(), 2);
    }

    #[test]
    fn test_extractor_failures_do_not_alter_result() {
        let telemetry = isolated();
        let options = EmbedOptions::new("text-embedding-3-small", "openai");
        // An extractor that finds nothing must not affect the returned value.
        let result: Result<Vec<f32>, std::io::Error> = telemetry.embed_sync(
            &options,
            |_| EmbedUsage::default(),
            || Ok(vec![0.1, 0.2, 0.3]),
        );
        assert_eq!(result.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_async_success_and_error_paths() {
        let telemetry = isolated();
        let options = GenerateOptions::new("gpt-4", "openai");

        let ok: Result<&str, std::fmt::Error> = telemetry
            .generate(&options, |_| GenerateUsage::default(), async { Ok("out") })
            .await;
        assert_eq!(ok.unwrap(), "out");

        let err: Result<&str, std::fmt::Error> = telemetry
            .generate(&options, |_| GenerateUsage::default(), async {
                Err(std::fmt::Error)
            })
            .await;
        assert!(err.is_err());
    }

    #[test]
    fn test_config_snapshot_read_once_per_call() {
        let handle = Arc::new(ConfigHandle::default());
        let telemetry = Instrumentor::new(
            Arc::clone(&handle),
            Arc::new(CostCalculator::new()),
            Arc::new(Redactor::new()),
        );

        // Updating config between calls is fine; within a call the wrapper
        // holds one snapshot. This just exercises the read path both ways.
        let options = RerankOptions::new("rerank-english-v3.0", "cohere");
        let before: Result<Vec<u8>, std::fmt::Error> =
            telemetry.rerank_sync(&options, Vec::len, || Ok(vec![1, 2]));
        assert!(before.is_ok());

        handle
            .update(&ConfigUpdate::new().with_log_prompts(true))
            .unwrap();

        let after: Result<Vec<u8>, std::fmt::Error> =
            telemetry.rerank_sync(&options, Vec::len, || Ok(vec![1]));
        assert!(after.is_ok());
    }
}
