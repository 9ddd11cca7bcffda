use std::collections::BTreeSet;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, HarnessError>;

#[derive(Debug, Error)]
pub enum HarnessError {
    /// A wait loop ran out of its time budget.
    #[error("wait time ({waited:?}) exceeded for {operation}{}", last_error_suffix(.last_error))]
    TimeoutExceeded {
        operation: String,
        waited: Duration,
        last_error: Option<String>,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("{what} mismatch: expected {expected:?}, got {actual:?}")]
    AssertionMismatch {
        what: String,
        expected: BTreeSet<String>,
        actual: BTreeSet<String>,
    },

    #[error("unexpected HTTP status for {endpoint}: expected {expected}, got {actual}")]
    UnexpectedStatus {
        endpoint: String,
        expected: u16,
        actual: u16,
    },

    #[error("configuration review of daemon {daemon_id} is still in progress")]
    ReviewInProgress { daemon_id: i64 },

    /// A state the caller polls for has not been reached yet.
    #[error("not ready: {0}")]
    NotReady(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("command {command:?} in service {service} exited with {exit_code}: {stderr}")]
    ExecFailed {
        service: String,
        command: Vec<String>,
        exit_code: i32,
        stderr: String,
    },

    #[error("lease file error: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn last_error_suffix(last_error: &Option<String>) -> String {
    match last_error {
        Some(e) => format!(" (last error: {})", e),
        None => String::new(),
    }
}

impl HarnessError {
    /// Errors worth another attempt within a wait budget. Everything else is
    /// surfaced to the caller immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            HarnessError::ReviewInProgress { .. } | HarnessError::NotReady(_) => true,
            HarnessError::UnexpectedStatus { actual, .. } => *actual >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for HarnessError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            HarnessError::Malformed(e.to_string())
        } else if e.is_connect() || e.is_timeout() {
            // Connection refused and timeouts are retried by the wait loops.
            HarnessError::NotReady(format!("server unreachable: {}", e))
        } else {
            HarnessError::Transport(e.to_string())
        }
    }
}
