use thiserror::Error;

/// Failures talking to the study-plan backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} returned HTTP {status}: {body}")]
    Status {
        endpoint: &'static str,
        status: u16,
        body: String,
    },

    #[error("{endpoint} returned an unexpected payload: {detail}")]
    Decode {
        endpoint: &'static str,
        detail: String,
    },

    #[error("{endpoint} returned an empty result")]
    Empty { endpoint: &'static str },
}

impl BackendError {
    pub fn endpoint(&self) -> &'static str {
        match self {
            BackendError::Transport { endpoint, .. }
            | BackendError::Status { endpoint, .. }
            | BackendError::Decode { endpoint, .. }
            | BackendError::Empty { endpoint } => endpoint,
        }
    }
}

/// An edit that points at a week or day the plan does not have.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("no week labelled {0:?}")]
    UnknownWeek(String),

    #[error("{week} has {len} days, index {index} is out of range")]
    DayOutOfRange {
        week: String,
        index: usize,
        len: usize,
    },
}

/// Failures in the participant counters document store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("counter store unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
