use crate::result::ProduceResult;

/// Error code strings carried by [`Attempt`](crate::result::Attempt)s and
/// [`ProduceResult`]s.
///
/// The producer synthesizes the first two itself; the rest are returned by
/// the log service and matched verbatim when classifying failures.
pub mod codes {
    pub const PROJECT_CONFIG_NOT_EXIST: &str = "ProjectConfigNotExist";
    pub const PRODUCER_EXCEPTION: &str = "ProducerException";

    pub const REQUEST_ERROR: &str = "RequestError";
    pub const UNAUTHORIZED: &str = "Unauthorized";
    pub const WRITE_QUOTA_EXCEED: &str = "WriteQuotaExceed";
    pub const READ_QUOTA_EXCEED: &str = "ReadQuotaExceed";
    pub const INTERNAL_SERVER_ERROR: &str = "InternalServerError";
    pub const SERVER_BUSY: &str = "ServerBusy";
    pub const SERVICE_UNAVAILABLE: &str = "ServiceUnavailable";
    pub const SIGNATURE_NOT_MATCH: &str = "SignatureNotMatch";
    pub const PROJECT_NOT_EXIST: &str = "ProjectNotExist";
}

/// Errors surfaced by the producer API.
///
/// Argument, admission and state errors are returned synchronously from
/// `send`; dispatch failures arrive through the returned
/// [`ResultFuture`](crate::future::ResultFuture) as
/// [`ProducerError::ResultFailed`].
#[derive(thiserror::Error, Debug)]
pub enum ProducerError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("failed to acquire memory within the configured max blocking time {max_block_ms} ms")]
    Timeout { max_block_ms: i64 },

    #[error("the producer has already been closed")]
    ProducerClosed,

    #[error(transparent)]
    ResultFailed(#[from] ResultFailed),

    #[error("the producer could not be closed within {timeout_ms} ms")]
    CloseTimeout { timeout_ms: u64 },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("the producer must be created inside a Tokio runtime")]
    NoRuntime,
}

impl ProducerError {
    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
        ProducerError::InvalidArgument(msg.into())
    }

    /// The failed result, when this error came from a terminally failed batch.
    pub fn result(&self) -> Option<&ProduceResult> {
        match self {
            ProducerError::ResultFailed(failed) => Some(failed.result()),
            _ => None,
        }
    }
}

/// Terminal failure of a batch, carrying the full result with its attempt
/// history.
#[derive(thiserror::Error, Debug, Clone)]
#[error("{}: {}", .0.error_code(), .0.error_message())]
pub struct ResultFailed(pub Box<ProduceResult>);

impl ResultFailed {
    pub fn new(result: ProduceResult) -> Self {
        ResultFailed(Box::new(result))
    }

    pub fn result(&self) -> &ProduceResult {
        &self.0
    }

    pub fn into_result(self) -> ProduceResult {
        *self.0
    }
}

/// Failure reported by a [`LogClient`](crate::client::LogClient) for a single
/// `put_logs` call.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct ServiceError {
    pub code: String,
    pub message: String,
}

impl ServiceError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        ServiceError {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Transport-level failure: the request never produced a service answer.
    pub fn request_error(detail: impl std::fmt::Display) -> Self {
        ServiceError::new(codes::REQUEST_ERROR, format!("Web request failed: {}", detail))
    }
}

/// Error type returned when validating or loading a
/// [`ProducerConfig`](crate::config::ProducerConfig).
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("{field} must be {expected}, got {actual}")]
    OutOfRange {
        field: &'static str,
        expected: &'static str,
        actual: i64,
    },

    #[error("invalid producer config document: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ConfigError {
    pub(crate) fn out_of_range(field: &'static str, expected: &'static str, actual: i64) -> Self {
        ConfigError::OutOfRange {
            field,
            expected,
            actual,
        }
    }
}
