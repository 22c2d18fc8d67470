//! Domain error types for the dispatch bridge
//!
//! Structured thiserror types for navigable diagnostics and compile-time
//! exhaustive handling.
//!
//! The binaries in `src/bin/` are the ONLY modules allowed to use
//! anyhow::Result (process boundary). Library code returns
//! Result<T, DispatchError>.

use crate::registry::HandlerKind;
use thiserror::Error;

/// Boxed source error carried by transport and outbound-call variants
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Dispatch bridge domain errors
///
/// Every variant carries structured context fields for diagnostics.
/// Only the configuration family (`Config`, `DuplicateHandler`,
/// `InvalidDefinition`) is fatal; everything else is contained at the layer
/// where it is detected and logged.
///
/// Example log output:
/// ```text
/// DispatchError::DuplicateHandler { kind: SelectMenu, key: "media_selection" }
/// → "duplicate select-menu handler 'media_selection'"
/// ```
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Shard exceeded consecutive error threshold (circuit breaker tripped)
    #[error("shard {shard_id} exceeded consecutive error threshold ({count}/{max})")]
    ShardCircuitBroken {
        shard_id: u64,
        count: u32,
        max: u32,
    },

    /// Shard reconnection failed (fatal, shard marked dead)
    #[error("shard {shard_id} reconnection failed")]
    ShardReconnectFailed {
        shard_id: u64,
        #[source]
        source: BoxError,
    },

    /// Shard ID overflow: u64 value exceeds u32::MAX (Twilight API boundary)
    #[error("shard ID overflow: {value} exceeds u32::MAX")]
    ShardIdOverflow { value: u64 },

    /// Broker connection failed
    #[error("broker connection failed")]
    ConnectionFailed(#[source] BoxError),

    /// Publish failed for a specific subject
    #[error("publish failed for subject '{subject}'")]
    PublishFailed {
        subject: String,
        #[source]
        source: BoxError,
    },

    /// Stream, consumer or subscription setup failed
    #[error("subscription to '{target}' failed")]
    SubscribeFailed {
        target: String,
        #[source]
        source: BoxError,
    },

    /// Acknowledging a delivery to the broker failed
    #[error("ack failed for message '{message_id}'")]
    AckFailed {
        message_id: String,
        #[source]
        source: BoxError,
    },

    /// Session store read or write failed
    #[error("session store {operation} failed for shard {shard_id}")]
    SessionStore {
        operation: &'static str,
        shard_id: u64,
        #[source]
        source: BoxError,
    },

    /// Serialization of an outgoing payload failed
    #[error("serialization failed for {context}")]
    SerializationFailed {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    /// Incoming envelope could not be decoded
    #[error("malformed envelope on channel '{channel}': {reason}")]
    Decode { channel: String, reason: String },

    /// Configuration error (environment variable missing or invalid)
    #[error("configuration error: {0}")]
    Config(String),

    /// Two handler definitions of the same kind share a key
    #[error("duplicate {kind} handler '{key}'")]
    DuplicateHandler { kind: HandlerKind, key: String },

    /// A handler definition is missing a required field or is inconsistent
    #[error("invalid {kind} handler definition '{key}': {reason}")]
    InvalidDefinition {
        kind: HandlerKind,
        key: String,
        reason: String,
    },

    /// Discord HTTP call failed
    #[error("discord http call '{operation}' failed")]
    Http {
        operation: &'static str,
        #[source]
        source: BoxError,
    },

    /// Linked-account lookup failed
    #[error("account lookup failed for user {user_id}")]
    AccountLookup {
        user_id: u64,
        #[source]
        source: BoxError,
    },

    /// Origin API call failed
    #[error("origin API call to '{endpoint}' failed")]
    Api {
        endpoint: String,
        #[source]
        source: BoxError,
    },

    /// Prometheus recorder could not be installed
    #[error("metrics recorder install failed: {0}")]
    Metrics(String),
}

impl DispatchError {
    /// Returns a static label string suitable for Prometheus metrics.
    ///
    /// Used as the `error_type` label on the `*_errors_total` counters,
    /// enabling per-error-type monitoring and alerting.
    pub fn error_type_label(&self) -> &'static str {
        match self {
            Self::ShardCircuitBroken { .. } => "circuit_broken",
            Self::ShardReconnectFailed { .. } => "reconnect_failed",
            Self::ShardIdOverflow { .. } => "shard_overflow",
            Self::ConnectionFailed(_) => "broker_connection",
            Self::PublishFailed { .. } => "broker_publish",
            Self::SubscribeFailed { .. } => "broker_subscribe",
            Self::AckFailed { .. } => "broker_ack",
            Self::SessionStore { .. } => "session_store",
            Self::SerializationFailed { .. } => "serialization",
            Self::Decode { .. } => "decode",
            Self::Config(_) => "config",
            Self::DuplicateHandler { .. } => "duplicate_handler",
            Self::InvalidDefinition { .. } => "invalid_definition",
            Self::Http { .. } => "discord_http",
            Self::AccountLookup { .. } => "account_lookup",
            Self::Api { .. } => "origin_api",
            Self::Metrics(_) => "metrics",
        }
    }

    /// Whether this error must stop the process from serving.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::DuplicateHandler { .. } | Self::InvalidDefinition { .. }
        )
    }
}

/// Validation failure raised by a handler's `parse`.
///
/// The message is shown to the user, so it must not leak internals.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Errors returned by command and component handlers.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// Input rejected; reported back to the user verbatim
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Anything else; the user only sees a generic failure reply
    #[error("handler failed: {0}")]
    Failed(#[source] BoxError),

    /// Failure the handler explains to the user with `notice`
    #[error("handler failed: {source}")]
    Reported {
        notice: String,
        #[source]
        source: BoxError,
    },
}

impl HandlerError {
    pub fn failed(source: impl Into<BoxError>) -> Self {
        Self::Failed(source.into())
    }

    pub fn reported(notice: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Reported {
            notice: notice.into(),
            source: source.into(),
        }
    }
}

impl From<DispatchError> for HandlerError {
    fn from(err: DispatchError) -> Self {
        Self::Failed(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_error() -> BoxError {
        Box::new(std::io::Error::new(std::io::ErrorKind::Other, "test"))
    }

    #[test]
    fn every_variant_has_distinct_error_type_label() {
        let labels = [
            DispatchError::ShardCircuitBroken { shard_id: 0, count: 10, max: 10 }
                .error_type_label(),
            DispatchError::ShardReconnectFailed {
                shard_id: 0,
                source: test_error(),
            }
            .error_type_label(),
            DispatchError::ShardIdOverflow { value: u64::MAX }.error_type_label(),
            DispatchError::ConnectionFailed(test_error()).error_type_label(),
            DispatchError::PublishFailed {
                subject: "gateway.dispatch".to_string(),
                source: test_error(),
            }
            .error_type_label(),
            DispatchError::SubscribeFailed {
                target: "GATEWAY".to_string(),
                source: test_error(),
            }
            .error_type_label(),
            DispatchError::AckFailed {
                message_id: "m".to_string(),
                source: test_error(),
            }
            .error_type_label(),
            DispatchError::SessionStore {
                operation: "get",
                shard_id: 0,
                source: test_error(),
            }
            .error_type_label(),
            DispatchError::SerializationFailed {
                context: "test".to_string(),
                source: serde_json::from_str::<()>("invalid").unwrap_err(),
            }
            .error_type_label(),
            DispatchError::Decode {
                channel: "dispatch".to_string(),
                reason: "test".to_string(),
            }
            .error_type_label(),
            DispatchError::Config("test".to_string()).error_type_label(),
            DispatchError::DuplicateHandler {
                kind: HandlerKind::Command,
                key: "a".to_string(),
            }
            .error_type_label(),
            DispatchError::InvalidDefinition {
                kind: HandlerKind::Modal,
                key: "a".to_string(),
                reason: "test".to_string(),
            }
            .error_type_label(),
            DispatchError::Http {
                operation: "create_response",
                source: test_error(),
            }
            .error_type_label(),
            DispatchError::AccountLookup {
                user_id: 1,
                source: test_error(),
            }
            .error_type_label(),
            DispatchError::Api {
                endpoint: "/expire-user".to_string(),
                source: test_error(),
            }
            .error_type_label(),
            DispatchError::Metrics("test".to_string()).error_type_label(),
        ];

        // All labels are unique
        let mut unique = labels.to_vec();
        unique.sort();
        unique.dedup();
        assert_eq!(labels.len(), unique.len(), "Duplicate error_type_label found");
    }

    #[test]
    fn error_messages_contain_context() {
        let err = DispatchError::ShardCircuitBroken {
            shard_id: 3,
            count: 10,
            max: 10,
        };
        let msg = err.to_string();
        assert!(msg.contains("shard 3"), "message should contain shard_id");
        assert!(msg.contains("10/10"), "message should contain count/max");

        let err = DispatchError::PublishFailed {
            subject: "gateway.dispatch".to_string(),
            source: test_error(),
        };
        assert!(err.to_string().contains("gateway.dispatch"));

        let err = DispatchError::DuplicateHandler {
            kind: HandlerKind::SelectMenu,
            key: "media_selection".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "duplicate select-menu handler 'media_selection'"
        );
    }

    #[test]
    fn only_configuration_errors_are_fatal() {
        assert!(DispatchError::Config("DISCORD_TOKEN must be set".to_string()).is_fatal());
        assert!(DispatchError::DuplicateHandler {
            kind: HandlerKind::Button,
            key: "x".to_string(),
        }
        .is_fatal());
        assert!(!DispatchError::ConnectionFailed(test_error()).is_fatal());
        assert!(!DispatchError::SessionStore {
            operation: "put",
            shard_id: 1,
            source: test_error(),
        }
        .is_fatal());
    }

    #[test]
    fn validation_is_distinguishable_from_failure() {
        let err: HandlerError = ValidationError::new("Invalid Select Menu Data").into();
        assert!(matches!(err, HandlerError::Validation(_)));

        let err = HandlerError::failed(test_error());
        assert!(matches!(err, HandlerError::Failed(_)));

        let err = HandlerError::reported("Problem trying to remove cache", test_error());
        assert!(matches!(err, HandlerError::Reported { ref notice, .. } if notice == "Problem trying to remove cache"));
    }
}
