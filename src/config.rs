//! Process-wide instrumentation configuration.
//!
//! Configuration is held as an immutable snapshot behind an [`ConfigHandle`].
//! Every instrumented call reads the snapshot exactly once at span start, so
//! a reconfiguration mid-call never mixes old and new settings within one
//! span's lifetime.

use std::env;
use std::sync::Arc;

use arc_swap::ArcSwap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Smallest permitted value for [`GenAiConfig::max_attribute_length`].
pub const MIN_ATTRIBUTE_LENGTH: usize = 100;

/// Immutable configuration snapshot for GenAI instrumentation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenAiConfig {
    /// Service name reported on the trace resource
    pub service_name: String,
    /// Deployment environment (dev, staging, prod)
    pub environment: String,
    /// OTLP collector endpoint
    pub otlp_endpoint: String,
    /// OTLP transport protocol (grpc or http/protobuf)
    pub otlp_protocol: String,
    /// Attach (redacted, truncated) prompt and completion text to spans
    pub log_prompts: bool,
    /// Trace sampling rate in `[0.0, 1.0]`
    pub sample_rate: f64,
    /// Redaction pattern names applied to prompt-like attributes, in order
    pub redact_patterns: Vec<String>,
    /// Tenant identifier for cost attribution
    pub tenant_id: Option<String>,
    /// User identifier for cost attribution
    pub user_id: Option<String>,
    /// Maximum length (in characters) of any string span attribute
    pub max_attribute_length: usize,
}

impl Default for GenAiConfig {
    fn default() -> Self {
        Self {
            service_name: "genai-app".to_string(),
            environment: "dev".to_string(),
            otlp_endpoint: "http://localhost:4317".to_string(),
            otlp_protocol: "grpc".to_string(),
            log_prompts: false,
            sample_rate: 0.01,
            redact_patterns: vec![
                "email".to_string(),
                "ssn".to_string(),
                "api_key".to_string(),
                "credit_card".to_string(),
            ],
            tenant_id: None,
            user_id: None,
            max_attribute_length: 2000,
        }
    }
}

impl GenAiConfig {
    /// Build a configuration from environment variables, falling back to
    /// defaults for anything unset or unparseable.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            service_name: env_string("OTEL_SERVICE_NAME", &defaults.service_name),
            environment: env_string("GENAI_ENVIRONMENT", &defaults.environment),
            otlp_endpoint: env_string("OTEL_EXPORTER_OTLP_ENDPOINT", &defaults.otlp_endpoint),
            otlp_protocol: env_string("OTEL_EXPORTER_OTLP_PROTOCOL", &defaults.otlp_protocol),
            log_prompts: env::var("GENAI_OTEL_LOG_PROMPTS")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(defaults.log_prompts),
            sample_rate: env_parsed("GENAI_OTEL_SAMPLE_RATE", defaults.sample_rate),
            redact_patterns: env::var("GENAI_OTEL_REDACT_PATTERNS")
                .map(|v| v.split(',').map(|p| p.trim().to_string()).collect())
                .unwrap_or(defaults.redact_patterns),
            tenant_id: env::var("GENAI_TENANT_ID").ok(),
            user_id: env::var("GENAI_USER_ID").ok(),
            max_attribute_length: env_parsed("GENAI_MAX_ATTR_LENGTH", defaults.max_attribute_length),
        }
    }

    /// Set the deployment environment
    #[must_use]
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    /// Enable or disable prompt/completion logging
    #[must_use]
    pub fn with_log_prompts(mut self, log_prompts: bool) -> Self {
        self.log_prompts = log_prompts;
        self
    }

    /// Set the sampling rate (validated on [`Self::validate`])
    #[must_use]
    pub fn with_sample_rate(mut self, sample_rate: f64) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Set the active redaction pattern names
    #[must_use]
    pub fn with_redact_patterns(mut self, patterns: Vec<String>) -> Self {
        self.redact_patterns = patterns;
        self
    }

    /// Set the tenant identifier
    #[must_use]
    pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Set the maximum string attribute length (validated on
    /// [`Self::validate`])
    #[must_use]
    pub fn with_max_attribute_length(mut self, length: usize) -> Self {
        self.max_attribute_length = length;
        self
    }

    /// Validate invariants: `sample_rate` in `[0, 1]`,
    /// `max_attribute_length >= 100`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.sample_rate) {
            return Err(ConfigError::InvalidSampleRate(self.sample_rate));
        }
        if self.max_attribute_length < MIN_ATTRIBUTE_LENGTH {
            return Err(ConfigError::AttributeLengthTooSmall(
                self.max_attribute_length,
            ));
        }
        Ok(())
    }
}

/// Partial configuration for shallow-merge updates via
/// [`ConfigHandle::update`]. Unset fields keep their current value.
#[derive(Debug, Clone, Default)]
pub struct ConfigUpdate {
    /// Replacement service name
    pub service_name: Option<String>,
    /// Replacement environment
    pub environment: Option<String>,
    /// Replacement OTLP endpoint
    pub otlp_endpoint: Option<String>,
    /// Replacement OTLP transport protocol
    pub otlp_protocol: Option<String>,
    /// Replacement prompt-logging flag
    pub log_prompts: Option<bool>,
    /// Replacement sampling rate
    pub sample_rate: Option<f64>,
    /// Replacement redaction pattern list
    pub redact_patterns: Option<Vec<String>>,
    /// Replacement tenant identifier
    pub tenant_id: Option<String>,
    /// Replacement user identifier
    pub user_id: Option<String>,
    /// Replacement maximum attribute length
    pub max_attribute_length: Option<usize>,
}

impl ConfigUpdate {
    /// Create an empty update
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the OTLP transport protocol
    #[must_use]
    pub fn with_otlp_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.otlp_protocol = Some(protocol.into());
        self
    }

    /// Set the sampling rate
    #[must_use]
    pub fn with_sample_rate(mut self, sample_rate: f64) -> Self {
        self.sample_rate = Some(sample_rate);
        self
    }

    /// Set the prompt-logging flag
    #[must_use]
    pub fn with_log_prompts(mut self, log_prompts: bool) -> Self {
        self.log_prompts = Some(log_prompts);
        self
    }

    /// Set the redaction pattern list
    #[must_use]
    pub fn with_redact_patterns(mut self, patterns: Vec<String>) -> Self {
        self.redact_patterns = Some(patterns);
        self
    }

    /// Set the maximum attribute length
    #[must_use]
    pub fn with_max_attribute_length(mut self, length: usize) -> Self {
        self.max_attribute_length = Some(length);
        self
    }

    fn apply_to(&self, current: &GenAiConfig) -> GenAiConfig {
        let mut merged = current.clone();
        if let Some(ref v) = self.service_name {
            merged.service_name = v.clone();
        }
        if let Some(ref v) = self.environment {
            merged.environment = v.clone();
        }
        if let Some(ref v) = self.otlp_endpoint {
            merged.otlp_endpoint = v.clone();
        }
        if let Some(ref v) = self.otlp_protocol {
            merged.otlp_protocol = v.clone();
        }
        if let Some(v) = self.log_prompts {
            merged.log_prompts = v;
        }
        if let Some(v) = self.sample_rate {
            merged.sample_rate = v;
        }
        if let Some(ref v) = self.redact_patterns {
            merged.redact_patterns = v.clone();
        }
        if let Some(ref v) = self.tenant_id {
            merged.tenant_id = Some(v.clone());
        }
        if let Some(ref v) = self.user_id {
            merged.user_id = Some(v.clone());
        }
        if let Some(v) = self.max_attribute_length {
            merged.max_attribute_length = v;
        }
        merged
    }
}

/// Shared, swappable configuration holder.
///
/// Readers get a consistent `Arc` snapshot; writers replace the whole
/// snapshot atomically. A rejected update leaves the prior snapshot in place.
#[derive(Debug)]
pub struct ConfigHandle {
    inner: ArcSwap<GenAiConfig>,
}

impl ConfigHandle {
    /// Create a handle from a validated configuration.
    pub fn new(config: GenAiConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            inner: ArcSwap::from_pointee(config),
        })
    }

    /// Current snapshot. Callers should read this once per operation.
    #[must_use]
    pub fn snapshot(&self) -> Arc<GenAiConfig> {
        self.inner.load_full()
    }

    /// Shallow-merge a partial update, validate the merged result, and swap
    /// it in. On validation failure nothing is retained from the update.
    pub fn update(&self, update: &ConfigUpdate) -> Result<(), ConfigError> {
        let merged = update.apply_to(&self.snapshot());
        merged.validate()?;
        self.inner.store(Arc::new(merged));
        Ok(())
    }

    /// Replace the configuration wholesale after validation.
    pub fn replace(&self, config: GenAiConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.inner.store(Arc::new(config));
        Ok(())
    }
}

impl Default for ConfigHandle {
    fn default() -> Self {
        Self {
            inner: ArcSwap::from_pointee(GenAiConfig::default()),
        }
    }
}

static GLOBAL_CONFIG: Lazy<Arc<ConfigHandle>> = Lazy::new(|| {
    match ConfigHandle::new(GenAiConfig::from_env()) {
        Ok(handle) => Arc::new(handle),
        Err(err) => {
            tracing::warn!(error = %err, "invalid environment configuration, using defaults");
            Arc::new(ConfigHandle::default())
        }
    }
});

/// Process-wide configuration handle, seeded from the environment on first
/// access. Library users who want isolation construct their own
/// [`ConfigHandle`] instead.
#[must_use]
pub fn global_config() -> Arc<ConfigHandle> {
    Arc::clone(&GLOBAL_CONFIG)
}

/// Configuration validation error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Sampling rate outside `[0, 1]`
    #[error("sample_rate must be between 0.0 and 1.0, got {0}")]
    InvalidSampleRate(f64),
    /// Attribute length below the minimum
    #[error("max_attribute_length must be at least 100, got {0}")]
    AttributeLengthTooSmall(usize),
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = GenAiConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.log_prompts);
        assert_eq!(config.max_attribute_length, 2000);
        assert_eq!(config.redact_patterns.len(), 4);
    }

    #[test]
    fn test_sample_rate_bounds() {
        let config = GenAiConfig::default().with_sample_rate(1.5);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSampleRate(_))
        ));

        let config = GenAiConfig::default().with_sample_rate(-0.1);
        assert!(config.validate().is_err());

        let config = GenAiConfig::default().with_sample_rate(1.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_attribute_length_minimum() {
        let mut config = GenAiConfig::default();
        config.max_attribute_length = 99;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::AttributeLengthTooSmall(99))
        ));

        config.max_attribute_length = 100;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejected_update_keeps_prior_config() {
        let handle = ConfigHandle::default();
        let before = handle.snapshot();

        let update = ConfigUpdate::new()
            .with_log_prompts(true)
            .with_sample_rate(1.5);
        assert!(handle.update(&update).is_err());

        let after = handle.snapshot();
        assert_eq!(after.log_prompts, before.log_prompts);
        assert!((after.sample_rate - before.sample_rate).abs() < f64::EPSILON);
    }

    #[test]
    fn test_update_shallow_merges() {
        let handle = ConfigHandle::default();
        handle
            .update(&ConfigUpdate::new().with_sample_rate(0.5))
            .unwrap();

        let snapshot = handle.snapshot();
        assert!((snapshot.sample_rate - 0.5).abs() < f64::EPSILON);
        // Untouched fields keep their values
        assert_eq!(snapshot.service_name, "genai-app");
    }

    #[test]
    fn test_update_covers_transport_settings() {
        let handle = ConfigHandle::default();
        handle
            .update(
                &ConfigUpdate::new().with_otlp_protocol("http/protobuf"),
            )
            .unwrap();

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.otlp_protocol, "http/protobuf");
        // Endpoint keeps its current value
        assert_eq!(snapshot.otlp_endpoint, "http://localhost:4317");
    }

    #[test]
    fn test_snapshot_is_stable_across_updates() {
        let handle = ConfigHandle::default();
        let snapshot = handle.snapshot();

        handle
            .update(&ConfigUpdate::new().with_log_prompts(true))
            .unwrap();

        // The earlier snapshot is unaffected by the swap
        assert!(!snapshot.log_prompts);
        assert!(handle.snapshot().log_prompts);
    }
}
