//! Standardized OpenTelemetry instrumentation for GenAI/LLM applications.
//!
//! Wraps the operations of an LLM/RAG pipeline (embedding, retrieval,
//! reranking, generation, and agent tool calls) in spans that carry a
//! consistent `gen_ai.*` attribute vocabulary, with token-based cost
//! attribution, pattern-based redaction of sensitive content, and
//! hot-swappable configuration.
//!
//! # Components
//!
//! - [`Instrumentor`]: wraps a future or closure in a span, extracts usage
//!   metadata from the result, and guarantees the span closes on every exit
//!   path (success, error, cancellation)
//! - [`CostCalculator`]: maps provider/model/token-counts to estimated USD
//! - [`Redactor`]: named regex patterns applied to prompt-like attributes
//!   before they leave the process
//! - [`GenAiConfig`] / [`ConfigHandle`]: snapshot-consistent runtime
//!   configuration, seeded from the environment
//! - [`TelemetryMetrics`]: prometheus counters and histograms fed with one
//!   observation per finished span
//! - [`init_telemetry`]: builds the tracer provider and subscriber stack
//!   (OTLP export behind the `otlp` feature)
//!
//! # Quick start
//!
//! ```no_run
//! use genai_telemetry::{init_telemetry, GenAiConfig, GenerateOptions, GenerateUsage, Instrumentor};
//!
//! # async fn call_model() -> Result<String, std::io::Error> { Ok(String::new()) }
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = GenAiConfig::from_env();
//! let provider = init_telemetry(&config)?;
//!
//! let telemetry = Instrumentor::default();
//! let options = GenerateOptions::new("gpt-4", "openai");
//! let out = telemetry
//!     .generate(&options, |_: &String| GenerateUsage::default(), call_model())
//!     .await?;
//!
//! genai_telemetry::shutdown_telemetry(provider);
//! # Ok(()) }
//! ```

pub mod config;
pub mod cost;
pub mod instrument;
pub mod metrics;
pub mod redaction;
pub mod tracing_setup;

pub use config::{
    global_config, ConfigError, ConfigHandle, ConfigUpdate, GenAiConfig, MIN_ATTRIBUTE_LENGTH,
};
pub use cost::{global_calculator, CostCalculator, ModelPricing};
pub use instrument::{
    EmbedOptions, EmbedUsage, GenerateOptions, GenerateUsage, Instrumentor, OperationKind,
    RerankOptions, RetrieveOptions, ToolCallOptions,
};
pub use metrics::TelemetryMetrics;
pub use redaction::{global_redactor, RedactionError, Redactor};
pub use tracing_setup::{init_telemetry, shutdown_telemetry, TracingError};
