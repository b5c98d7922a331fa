use std::fmt::Display;

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Settings Error: {0}")]
    Error(String),
}

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Logging Error: {0}")]
    Error(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("invalid format: {0}")]
    InvalidFormat(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("input must be a struct with named fields, got {0}")]
    InvalidInputKind(String),

    #[error("failed to serialize filter value: {0}")]
    SerializationError(String),
}

// Lets FilterError act as the error type of the record serializer
impl serde::ser::Error for FilterError {
    fn custom<T: Display>(msg: T) -> Self {
        FilterError::SerializationError(msg.to_string())
    }
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("request cancelled")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum CardError {
    #[error(transparent)]
    InvalidFormat(#[from] FormatError),

    #[error("marshal filters: {0}")]
    SerializationError(#[source] serde_json::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("metabase error: {status}\n{body}")]
    UpstreamError { status: StatusCode, body: String },
}

impl CardError {
    /// True when the call was aborted through its cancellation token
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CardError::Transport(TransportError::Cancelled))
    }
}

impl From<reqwest::Error> for CardError {
    fn from(err: reqwest::Error) -> Self {
        CardError::Transport(TransportError::Request(err))
    }
}

#[derive(Error, Debug)]
pub enum JsonError {
    #[error("unknown fields in payload: {}", fields.join(", "))]
    SchemaMismatch { fields: Vec<String> },

    #[error("json unmarshal: {0}")]
    ParseError(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum RetryError<E> {
    #[error("invalid retry attempts: {0}")]
    InvalidArgument(String),

    #[error("operation cancelled while waiting to retry")]
    Cancelled,

    #[error("after {attempts} attempts, last error: {source}")]
    RetryExhausted {
        attempts: usize,
        #[source]
        source: E,
    },
}

impl<E> RetryError<E> {
    /// The error of the final attempt, if every attempt was used up
    pub fn last_error(&self) -> Option<&E> {
        match self {
            RetryError::RetryExhausted { source, .. } => Some(source),
            _ => None,
        }
    }
}
