use thiserror::Error;

/// Raised when a server payload cannot be turned into engine state.
///
/// A decode failure never degrades into a default value: a sync check body
/// without its fields is not "no new data", and a malformed key is not an
/// empty key.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("sync check body does not contain `{0}`")]
    MissingField(&'static str),
    #[error("sync check field `{field}` has non-numeric value '{value}'")]
    InvalidField { field: &'static str, value: String },
    #[error("malformed sync key segment '{0}'")]
    MalformedSyncKey(String),
    #[error("duplicate sync key id {0}")]
    DuplicateKey(i64),
    #[error("sync key declares {declared} entries but carries {actual}")]
    CountMismatch { declared: usize, actual: usize },
    #[error("invalid JSON payload: {0}")]
    Json(String),
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        DecodeError::Json(err.to_string())
    }
}
