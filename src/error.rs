use std::time::Duration;
use thiserror::Error;
use wxcore::DecodeError;

/// Every way a sync session can end or a single step can fail.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("decode failure: {0}")]
    Decode(#[from] DecodeError),
    #[error("failed to encode request body: {0}")]
    Encode(String),
    #[error("server rejected request: ret={ret}, msg='{msg}'")]
    Server { ret: i64, msg: String },
    #[error("session invalidated by server (retcode={retcode}), re-login required")]
    SessionInvalidated { retcode: String },
    #[error("no sync host answered successfully ({tried} probed), re-login required")]
    NoHostAvailable { tried: usize },
    #[error("dispatch queue is closed")]
    DispatchClosed,
}

impl SyncError {
    /// Failures the poll loop may retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Transport(_) | SyncError::Timeout(_))
    }

    /// Outcomes that end the session and need a fresh login upstream.
    pub fn requires_login(&self) -> bool {
        matches!(
            self,
            SyncError::SessionInvalidated { .. } | SyncError::NoHostAvailable { .. }
        )
    }
}
