//! Iterator configuration.
//!
//! A `Config` is built either with the builder methods or deserialized from
//! JSON, and validated once when an iterator is opened. Durations are given in
//! seconds as floats, the way they appear in configuration files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_SERVER: &str = "nats://127.0.0.1:4222";
pub const DEFAULT_STREAM: &str = "NATSCALE";
pub const DEFAULT_DURABLE: &str = "ns_worker_group";
const DEFAULT_TIMEOUT_SECS: f64 = 30.0;
const DEFAULT_RETRY: u32 = 10;
const DEFAULT_ERROR_BACKOFF_SECS: f64 = 1.0;
const DEFAULT_SHUTDOWN_GRACE_SECS: f64 = 5.0;
/// Longest accepted duration, one year. Deadlines built from larger values
/// would overflow `Instant`.
const MAX_DURATION_SECS: f64 = 365.0 * 24.0 * 3600.0;

/// Parameters for a [`TaskIter`](crate::TaskIter).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Subject pattern to pull from, e.g. `hpc.tasks.*`
    pub subject: String,
    #[serde(default = "default_server")]
    pub nats_server: String,
    #[serde(default = "default_stream")]
    pub stream_name: String,
    /// Durable consumer name; the broker tracks the read position under it
    #[serde(default = "default_durable")]
    pub durable_name: String,
    /// Acknowledge automatically, one pull late, instead of handing out ack handles
    #[serde(default)]
    pub auto_ack: bool,
    /// Seconds a pull waits for the next message before iteration ends
    #[serde(default = "default_timeout")]
    pub timeout: f64,
    /// Reserved retry budget; currently advisory only
    #[serde(default = "default_retry")]
    pub retry: u32,
    /// Seconds a single broker fetch waits; defaults to `timeout`
    #[serde(default)]
    pub fetch_timeout: Option<f64>,
    /// Seconds the broker waits for an ack before redelivering
    #[serde(default)]
    pub ack_wait: Option<f64>,
    /// Send the last pending auto-ack when the iterator is closed
    #[serde(default)]
    pub flush_on_close: bool,
    /// Pause after a transport error before fetching again
    #[serde(default = "default_error_backoff")]
    pub error_backoff: f64,
    /// Upper bound on how long closing waits for in-flight acks
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace: f64,
}

fn default_server() -> String {
    DEFAULT_SERVER.to_string()
}

fn default_stream() -> String {
    DEFAULT_STREAM.to_string()
}

fn default_durable() -> String {
    DEFAULT_DURABLE.to_string()
}

fn default_timeout() -> f64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_retry() -> u32 {
    DEFAULT_RETRY
}

fn default_error_backoff() -> f64 {
    DEFAULT_ERROR_BACKOFF_SECS
}

fn default_shutdown_grace() -> f64 {
    DEFAULT_SHUTDOWN_GRACE_SECS
}

impl Config {
    /// Create a config for `subject` with every other option at its default.
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            nats_server: default_server(),
            stream_name: default_stream(),
            durable_name: default_durable(),
            auto_ack: false,
            timeout: DEFAULT_TIMEOUT_SECS,
            retry: DEFAULT_RETRY,
            fetch_timeout: None,
            ack_wait: None,
            flush_on_close: false,
            error_backoff: DEFAULT_ERROR_BACKOFF_SECS,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE_SECS,
        }
    }

    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn server(mut self, server: impl Into<String>) -> Self {
        self.nats_server = server.into();
        self
    }

    pub fn stream(mut self, name: impl Into<String>) -> Self {
        self.stream_name = name.into();
        self
    }

    pub fn durable(mut self, name: impl Into<String>) -> Self {
        self.durable_name = name.into();
        self
    }

    pub fn auto_ack(mut self, auto_ack: bool) -> Self {
        self.auto_ack = auto_ack;
        self
    }

    pub fn timeout_secs(mut self, secs: f64) -> Self {
        self.timeout = secs;
        self
    }

    pub fn retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }

    pub fn fetch_timeout_secs(mut self, secs: f64) -> Self {
        self.fetch_timeout = Some(secs);
        self
    }

    pub fn ack_wait_secs(mut self, secs: f64) -> Self {
        self.ack_wait = Some(secs);
        self
    }

    pub fn flush_on_close(mut self, flush: bool) -> Self {
        self.flush_on_close = flush;
        self
    }

    pub fn error_backoff_secs(mut self, secs: f64) -> Self {
        self.error_backoff = secs;
        self
    }

    pub fn shutdown_grace_secs(mut self, secs: f64) -> Self {
        self.shutdown_grace = secs;
        self
    }

    /// Check every field. Called by the iterator before anything is started.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_subject(&self.subject)?;
        if self.nats_server.trim().is_empty() {
            return Err(ConfigError::invalid("nats_server", "must not be empty"));
        }
        validate_name("stream_name", &self.stream_name, &['.', '*', '>'])?;
        validate_name("durable_name", &self.durable_name, &['.'])?;
        positive_secs("timeout", self.timeout)?;
        if let Some(secs) = self.fetch_timeout {
            positive_secs("fetch_timeout", secs)?;
        }
        if let Some(secs) = self.ack_wait {
            positive_secs("ack_wait", secs)?;
        }
        positive_secs("shutdown_grace", self.shutdown_grace)?;
        if !(0.0..=MAX_DURATION_SECS).contains(&self.error_backoff) {
            return Err(ConfigError::invalid(
                "error_backoff",
                format!(
                    "must be between 0 and {} seconds, got {}",
                    MAX_DURATION_SECS, self.error_backoff
                ),
            ));
        }
        Ok(())
    }

    /// How long one pull on the iterator waits.
    pub fn pull_timeout(&self) -> Duration {
        secs_to_duration(self.timeout)
    }

    /// How long one broker fetch waits.
    pub fn fetch_wait(&self) -> Duration {
        secs_to_duration(self.fetch_timeout.unwrap_or(self.timeout))
    }

    pub fn ack_wait_duration(&self) -> Option<Duration> {
        self.ack_wait.map(secs_to_duration)
    }

    pub fn error_backoff_duration(&self) -> Duration {
        secs_to_duration(self.error_backoff)
    }

    pub fn shutdown_grace_duration(&self) -> Duration {
        secs_to_duration(self.shutdown_grace)
    }
}

fn positive_secs(field: &'static str, secs: f64) -> Result<(), ConfigError> {
    if secs > 0.0 && secs <= MAX_DURATION_SECS {
        Ok(())
    } else {
        Err(ConfigError::invalid(
            field,
            format!(
                "must be positive and at most {} seconds, got {}",
                MAX_DURATION_SECS, secs
            ),
        ))
    }
}

// Fields are public, so getters may see values that never went through `validate`.
fn secs_to_duration(secs: f64) -> Duration {
    if secs.is_nan() {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs.min(MAX_DURATION_SECS)).unwrap_or(Duration::ZERO)
}

fn validate_subject(subject: &str) -> Result<(), ConfigError> {
    if subject.is_empty() {
        return Err(ConfigError::invalid("subject", "must not be empty"));
    }
    if subject.chars().any(char::is_whitespace) {
        return Err(ConfigError::invalid("subject", "must not contain whitespace"));
    }
    let tokens: Vec<&str> = subject.split('.').collect();
    for (i, token) in tokens.iter().enumerate() {
        if token.is_empty() {
            return Err(ConfigError::invalid("subject", "contains an empty token"));
        }
        if token.contains('>') && (*token != ">" || i + 1 != tokens.len()) {
            return Err(ConfigError::invalid(
                "subject",
                "`>` is only allowed as the last token",
            ));
        }
        if token.contains('*') && *token != "*" {
            return Err(ConfigError::invalid(
                "subject",
                "`*` must be a whole token",
            ));
        }
    }
    Ok(())
}

fn validate_name(field: &'static str, name: &str, forbidden: &[char]) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::invalid(field, "must not be empty"));
    }
    if name.chars().any(|c| c.is_whitespace() || forbidden.contains(&c)) {
        return Err(ConfigError::invalid(
            field,
            format!("must not contain whitespace or any of {:?}", forbidden),
        ));
    }
    Ok(())
}
