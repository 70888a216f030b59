use crate::consumer::PartitionOffset;
use std::time::Duration;
use thiserror::Error;

/// A single call to the authentication endpoint failed.
#[derive(Debug, Clone, Error)]
pub enum AuthRequestError {
    #[error("auth request could not be sent: {0}")]
    Transport(String),
    #[error("auth endpoint answered with status {status}")]
    Status { status: u16 },
    #[error("auth response body could not be parsed: {0}")]
    InvalidBody(String),
    #[error("auth response has no access_token")]
    MissingToken,
    #[error("auth response expiry is not after the issue time")]
    InvalidExpiry,
}

#[derive(Debug, Clone, Error)]
pub enum CredentialRefreshFailed {
    #[error("credential refresh gave up after {attempts} attempt(s): {last_error}")]
    RetriesExhausted {
        attempts: u32,
        last_error: AuthRequestError,
    },
    #[error("credential refresh did not finish within {0:?}")]
    DeadlineElapsed(Duration),
    #[error("credential refresher is shut down")]
    Shutdown,
}

/// A single pull from the broker failed.
#[derive(Debug, Clone, Error)]
pub enum PullError {
    #[error("transient broker error: {0}")]
    Transient(String),
    #[error("message at {partition_offset:?} could not be decoded: {reason}")]
    Deserialization {
        partition_offset: PartitionOffset,
        reason: String,
    },
    #[error("broker rejected the credential: {0}")]
    Authentication(String),
    #[error("fatal broker error: {0}")]
    Fatal(String),
}

#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    #[error("broker client could not be created: {0}")]
    ClientCreation(String),
    #[error(transparent)]
    CredentialRefresh(#[from] CredentialRefreshFailed),
    #[error("subscription to topic '{topic}' failed: {reason}")]
    Subscription { topic: String, reason: String },
    #[error("broker client failed: {0}")]
    Fatal(String),
    #[error("operation '{operation}' is not allowed in state {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },
}

impl BrokerError {
    /// Whether recreating the consumer may get past this error.
    pub fn is_restartable(&self) -> bool {
        matches!(
            self,
            BrokerError::CredentialRefresh(_)
                | BrokerError::Subscription { .. }
                | BrokerError::Fatal(_)
        )
    }
}

/// Failure reported by a [`crate::consumption::MessageHandler`].
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("{0:#}")]
    Transient(anyhow::Error),
    #[error("{0:#}")]
    Fatal(anyhow::Error),
}

impl From<anyhow::Error> for ProcessingError {
    fn from(value: anyhow::Error) -> Self {
        ProcessingError::Transient(value)
    }
}

#[derive(Debug, Error)]
pub enum ConsumptionError {
    #[error("message handler failed fatally at {partition_offset:?}: {source:#}")]
    HandlerFatal {
        partition_offset: PartitionOffset,
        source: anyhow::Error,
    },
    #[error("consumer could not be restarted after {attempts} attempt(s): {last_error}")]
    RestartsExhausted { attempts: u32, last_error: BrokerError },
    #[error(transparent)]
    Broker(BrokerError),
    #[error("pull worker stopped abnormally: {0}")]
    Worker(String),
}
