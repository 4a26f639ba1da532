use serde::Serialize;

/// Immutable record of one `put_logs` call for a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attempt {
    pub success: bool,
    /// Empty on success.
    pub error_code: String,
    pub error_message: String,
    /// Wall-clock time the attempt finished, in unix milliseconds.
    pub timestamp_ms: i64,
    pub latency_ms: i64,
}

impl Attempt {
    pub fn success(timestamp_ms: i64, latency_ms: i64) -> Self {
        Attempt {
            success: true,
            error_code: String::new(),
            error_message: String::new(),
            timestamp_ms,
            latency_ms,
        }
    }

    pub fn failure(
        error_code: impl Into<String>,
        error_message: impl Into<String>,
        timestamp_ms: i64,
        latency_ms: i64,
    ) -> Self {
        Attempt {
            success: false,
            error_code: error_code.into(),
            error_message: error_message.into(),
            timestamp_ms,
            latency_ms,
        }
    }
}

/// Final outcome of a batch, delivered to every callback and future of the
/// records it carried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProduceResult {
    project: String,
    log_store: String,
    successful: bool,
    error_code: String,
    error_message: String,
    attempts: Vec<Attempt>,
}

impl ProduceResult {
    /// Builds the result from the attempt history; the last attempt decides
    /// the outcome.
    pub(crate) fn from_attempts(project: &str, log_store: &str, attempts: Vec<Attempt>) -> Self {
        let (successful, error_code, error_message) = match attempts.last() {
            Some(last) => (
                last.success,
                last.error_code.clone(),
                last.error_message.clone(),
            ),
            None => (false, String::new(), String::new()),
        };
        ProduceResult {
            project: project.to_string(),
            log_store: log_store.to_string(),
            successful,
            error_code,
            error_message,
            attempts,
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn log_store(&self) -> &str {
        &self.log_store
    }

    pub fn is_successful(&self) -> bool {
        self.successful
    }

    pub fn error_code(&self) -> &str {
        &self.error_code
    }

    pub fn error_message(&self) -> &str {
        &self.error_message
    }

    pub fn attempts(&self) -> &[Attempt] {
        &self.attempts
    }
}

/// User hook invoked once per `send` when its batch terminates.
///
/// Runs on a sender worker. Panics are caught and logged; they never affect
/// the batch or the worker.
pub trait Callback: Send + Sync {
    fn on_completion(&self, result: &ProduceResult);
}

impl<F> Callback for F
where
    F: Fn(&ProduceResult) + Send + Sync,
{
    fn on_completion(&self, result: &ProduceResult) {
        self(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_follows_last_attempt() {
        let attempts = vec![
            Attempt::failure("ServerBusy", "busy", 1, 3),
            Attempt::success(10, 2),
        ];
        let result = ProduceResult::from_attempts("p", "ls", attempts);
        assert!(result.is_successful());
        assert_eq!(result.error_code(), "");
        assert_eq!(result.attempts().len(), 2);

        let attempts = vec![Attempt::failure("RequestError", "down", 1, 3)];
        let result = ProduceResult::from_attempts("p", "ls", attempts);
        assert!(!result.is_successful());
        assert_eq!(result.error_code(), "RequestError");
        assert_eq!(result.error_message(), "down");
    }
}
