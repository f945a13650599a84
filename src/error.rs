use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Corrupt payload for reading {id}: {source}")]
    CorruptPayload {
        id: i64,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid timestamp for reading {id}: {millis}")]
    InvalidTimestamp { id: i64, millis: i64 },
}

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Unknown device: {0}")]
    DeviceNotFound(String),

    #[error("Unknown timezone {timezone:?} for device {device}")]
    InvalidTimezone { device: String, timezone: String },

    #[error("Unknown reference timezone: {0}")]
    InvalidReferenceTimezone(String),

    #[error("Time window of {0} hours is out of range")]
    WindowOutOfRange(i64),

    #[error("Query cannot be executed by the engine: {0}")]
    Unsupported(&'static str),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Message of {len} bytes exceeds the limit of {max} bytes")]
    TooLong { len: usize, max: usize },

    #[error("Message is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// Recoverable errors leave the stream positioned at the next frame.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FrameError::TooLong { .. } | FrameError::InvalidUtf8(_))
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Framing error: {0}")]
    Frame(#[from] FrameError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
