use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("network link unavailable: {0}")]
    Unavailable(String),
    #[error("network driver error: {0}")]
    Driver(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RetryError {
    #[error("link still down after {attempts} reconnect attempts")]
    Exhausted { attempts: u32 },
}

#[derive(Debug, Error)]
pub enum TimeSyncError {
    #[error("time server `{server}` did not answer: {reason}")]
    NoResponse { server: String, reason: String },
    #[error("invalid time server response: {0}")]
    InvalidResponse(String),
    #[error("clock not set after sync (epoch {0})")]
    ClockNotSet(i64),
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("response body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed weather json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("weather api returned code {code}: {message}")]
    Api { code: String, message: String },
    #[error("weather payload is missing `{0}`")]
    MissingField(&'static str),
    #[error("timestamp {0} is out of range")]
    Timestamp(i64),
}

#[derive(Debug, Error)]
pub enum DisplayError {
    #[error("display bus error: {0}")]
    Bus(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TzError {
    #[error("timezone rule is empty")]
    Empty,
    #[error("invalid timezone name at byte {0}")]
    Name(usize),
    #[error("invalid UTC offset at byte {0}")]
    Offset(usize),
    #[error("invalid transition rule at byte {0}")]
    Rule(usize),
    #[error("unexpected trailing input at byte {0}")]
    Trailing(usize),
}

/// The only unrecoverable outcome; the supervisor restarts the station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FatalError {
    #[error("network connectivity lost after {attempts} reconnect attempts")]
    ConnectivityLost { attempts: u32 },
}

impl From<RetryError> for FatalError {
    fn from(err: RetryError) -> Self {
        match err {
            RetryError::Exhausted { attempts } => Self::ConnectivityLost { attempts },
        }
    }
}
