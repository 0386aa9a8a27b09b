use core::time::Duration;

/// Why a work item did not produce a value.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum JobFailure {
    /// The item returned an error.
    #[error("Job failed: {message}")]
    Failed { message: String },

    /// The item panicked. The panic was caught and the worker kept running.
    #[error("Job panicked: {message}")]
    Panicked { message: String },
}

impl JobFailure {
    pub fn message(&self) -> &str {
        match self {
            Self::Failed { message } | Self::Panicked { message } => message,
        }
    }
}

/// The result of executing one work item, as published by a worker.
///
/// Exactly one of success value or failure is present. Once published the
/// pool holds no reference to it: the consumer owns it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outcome<T> {
    /// Index of the worker that executed the item.
    pub worker_id: usize,
    /// Wall-clock time spent inside `execute`.
    pub elapsed: Duration,
    pub result: Result<T, JobFailure>,
}

impl<T> Outcome<T> {
    pub const fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub const fn is_failure(&self) -> bool {
        self.result.is_err()
    }

    pub fn into_result(self) -> Result<T, JobFailure> {
        self.result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_message_is_shared_across_variants() {
        let failed = JobFailure::Failed {
            message: "name cannot be empty".to_string(),
        };
        let panicked = JobFailure::Panicked {
            message: "boom".to_string(),
        };

        assert_eq!(failed.message(), "name cannot be empty");
        assert_eq!(panicked.message(), "boom");
        assert_eq!(failed.to_string(), "Job failed: name cannot be empty");
        assert_eq!(panicked.to_string(), "Job panicked: boom");
    }

    #[test]
    fn outcome_reports_state() {
        let ok = Outcome {
            worker_id: 0,
            elapsed: Duration::ZERO,
            result: Ok::<_, JobFailure>(7),
        };
        assert!(ok.is_success());
        assert!(!ok.is_failure());
        assert_eq!(ok.into_result(), Ok(7));

        let err = Outcome::<u8> {
            worker_id: 1,
            elapsed: Duration::ZERO,
            result: Err(JobFailure::Failed {
                message: "nope".to_string(),
            }),
        };
        assert!(err.is_failure());
    }
}
