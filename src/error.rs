//! Error types shared across the broker seam, the decoder and the iterator.

use std::error::Error;
use std::fmt;

/// Error returned by broker operations (connect, subscribe, fetch, ack).
#[derive(Debug)]
pub enum BrokerError {
    /// No message arrived within the fetch window
    Timeout,
    /// Connecting to the server failed
    ConnectionFailed(String),
    /// Stream or durable consumer could not be set up
    Setup(String),
    /// Protocol or I/O failure on an established connection
    Transport(String),
    /// The connection or subscription has already been closed
    Closed,
    /// Other error
    Other(Box<dyn Error + Send + Sync>),
}

impl BrokerError {
    /// Whether the fetch loop should simply try again without pausing.
    pub fn is_timeout(&self) -> bool {
        matches!(self, BrokerError::Timeout)
    }
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerError::Timeout => write!(f, "no message within fetch timeout"),
            BrokerError::ConnectionFailed(msg) => write!(f, "connection failed: {}", msg),
            BrokerError::Setup(msg) => write!(f, "subscription setup failed: {}", msg),
            BrokerError::Transport(msg) => write!(f, "transport error: {}", msg),
            BrokerError::Closed => write!(f, "connection closed"),
            BrokerError::Other(e) => write!(f, "broker error: {}", e),
        }
    }
}

impl Error for BrokerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BrokerError::Other(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

/// Error produced when a payload cannot be turned into a [`Message`](crate::Message).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Payload is not valid UTF-8 JSON
    InvalidJson(String),
    /// Payload is JSON but not an object
    NotAnObject,
    /// The mandatory `id` field is absent
    MissingId,
    /// `id` is present but not an integer
    InvalidId(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::InvalidJson(msg) => write!(f, "invalid json payload: {}", msg),
            DecodeError::NotAnObject => write!(f, "payload is not a json object"),
            DecodeError::MissingId => write!(f, "payload has no `id` field"),
            DecodeError::InvalidId(found) => write!(f, "`id` must be an integer, got {}", found),
        }
    }
}

impl Error for DecodeError {}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        DecodeError::InvalidJson(err.to_string())
    }
}

/// Error raised while validating a [`Config`](crate::Config).
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A field holds a value outside its allowed range
    Invalid { field: &'static str, reason: String },
    /// The configuration document could not be parsed
    Parse(String),
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Invalid { field, reason } => {
                write!(f, "invalid config field `{}`: {}", field, reason)
            }
            ConfigError::Parse(msg) => write!(f, "config parse error: {}", msg),
        }
    }
}

impl Error for ConfigError {}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

/// Error returned when an iterator cannot be started.
#[derive(Debug)]
pub enum OpenError {
    /// Configuration failed validation
    Config(ConfigError),
    /// The background runtime could not be built
    Runtime(std::io::Error),
}

impl fmt::Display for OpenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenError::Config(e) => write!(f, "{}", e),
            OpenError::Runtime(e) => write!(f, "failed to start background runtime: {}", e),
        }
    }
}

impl Error for OpenError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            OpenError::Config(e) => Some(e),
            OpenError::Runtime(e) => Some(e),
        }
    }
}

impl From<ConfigError> for OpenError {
    fn from(err: ConfigError) -> Self {
        OpenError::Config(err)
    }
}

impl From<std::io::Error> for OpenError {
    fn from(err: std::io::Error) -> Self {
        OpenError::Runtime(err)
    }
}
