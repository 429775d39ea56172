use std::fmt;

/// Errors produced while loading or validating relay configuration.
///
/// Configuration is validated once before the relay starts; the core never
/// sees an invalid `InstanceConfig`.
#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// No instance was configured at all.
    NoInstances,

    /// An instance ended up with neither its own webhooks nor global ones.
    NoWebhooks {
        instance: String,
    },

    /// Two instances share the same name.
    DuplicateInstance {
        instance: String,
    },

    /// A numeric parameter could not be parsed.
    InvalidNumber {
        key: String,
        value: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::NoInstances =>
                write!(f, "no instances configured"),
            ConfigError::NoWebhooks { instance } =>
                write!(f, "instance {:?} has no webhooks (own or global)", instance),
            ConfigError::DuplicateInstance { instance } =>
                write!(f, "duplicate instance name: {:?}", instance),
            ConfigError::InvalidNumber { key, value } =>
                write!(f, "invalid numeric value for {}: {:?}", key, value),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Errors returned by an `EventSource` when establishing a connection fails.
///
/// Never fatal: the connection supervisor backs off and retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// The upstream could not be reached at all.
    Unreachable(String),

    /// The upstream was reached but refused or closed the handshake.
    Rejected(String),
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectError::Unreachable(detail) =>
                write!(f, "upstream unreachable: {}", detail),
            ConnectError::Rejected(detail) =>
                write!(f, "upstream rejected connection: {}", detail),
        }
    }
}

impl std::error::Error for ConnectError {}

/// Reasons why a single webhook delivery attempt failed.
///
/// Every variant is retryable; the relay treats any non-success status or
/// I/O failure identically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// No response within the configured per-attempt timeout.
    Timeout,

    /// Connection-level failure before a response arrived.
    Network,

    /// A response arrived with a non-success status.
    Status(u16),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Timeout =>
                write!(f, "request timed out"),
            FailureReason::Network =>
                write!(f, "network error"),
            FailureReason::Status(code) =>
                write!(f, "non-success status {}", code),
        }
    }
}
