//! Error taxonomy shared by every probe.
//!
//! Adapters translate driver errors (`sqlx`, `redis`, `rdkafka`) into a
//! [`ProbeError`] at the edge, so the probes themselves only ever reason about
//! *what kind* of thing went wrong. A [`ProbeError`] never leaves a probe: it is
//! turned into a [`ProbeOutcome`](crate::probe::ProbeOutcome) carrying only the
//! error's message.

use std::time::Duration;

/// Why a single dependency call did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// The dependency could not be reached at all.
    #[error("connection error: {0}")]
    Connection(String),

    /// The dependency was reachable but an individual call failed.
    #[error("{0}")]
    Operation(String),

    /// An expected confirmation did not arrive in time.
    #[error("{what} timed out after {}ms", .after.as_millis())]
    Timeout { what: &'static str, after: Duration },

    /// A preparation step failed; callers may continue without it.
    #[error("setup error: {0}")]
    Setup(String),
}

impl ProbeError {
    pub fn connection(e: impl std::fmt::Display) -> Self {
        Self::Connection(e.to_string())
    }

    pub fn operation(e: impl std::fmt::Display) -> Self {
        Self::Operation(e.to_string())
    }

    pub fn setup(e: impl std::fmt::Display) -> Self {
        Self::Setup(e.to_string())
    }
}

impl From<sqlx::Error> for ProbeError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Configuration(_) => Self::connection(e),
            other => Self::operation(other),
        }
    }
}

impl From<redis::RedisError> for ProbeError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_connection_refusal() || e.is_connection_dropped() || e.is_io_error() {
            Self::connection(e)
        } else if e.is_timeout() {
            Self::connection(format!("cache timed out: {e}"))
        } else {
            Self::operation(e)
        }
    }
}

impl From<rdkafka::error::KafkaError> for ProbeError {
    fn from(e: rdkafka::error::KafkaError) -> Self {
        use rdkafka::error::KafkaError;
        match e {
            KafkaError::ClientCreation(_) | KafkaError::ClientConfig(..) => Self::connection(e),
            KafkaError::AdminOp(_) | KafkaError::AdminOpCreation(_) => Self::setup(e),
            other => Self::operation(other),
        }
    }
}
