//! The long-poll "sync check" endpoint.
//!
//! The response is not JSON but a JavaScript assignment such as
//! `window.synccheck={retcode:"0",selector:"2"}`; the two fields are pulled
//! out by literal delimiter search.

use crate::error::DecodeError;
use crate::session::BaseRequest;
use crate::synckey::SyncKey;

pub const SYNC_CHECK_PATH: &str = "/cgi-bin/mmwebwx-bin/synccheck";

/// `retcode` value for a healthy session.
pub const RETCODE_SUCCESS: &str = "0";
/// `selector` value when nothing is waiting on the server.
pub const SELECTOR_IDLE: &str = "0";

const MARKER: &str = "window.synccheck=";
const RETCODE_OPEN: &str = "retcode:\"";
const SELECTOR_OPEN: &str = "selector:\"";
const VALUE_CLOSE: char = '"';

/// Outcome of one sync check call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollResult {
    pub retcode: String,
    pub selector: String,
}

impl PollResult {
    pub fn is_success(&self) -> bool {
        self.retcode == RETCODE_SUCCESS
    }

    pub fn has_new_data(&self) -> bool {
        self.selector != SELECTOR_IDLE
    }
}

/// Extracts `retcode` and `selector` from a sync check body.
pub fn parse_sync_check(body: &str) -> Result<PollResult, DecodeError> {
    let start = body.find(MARKER).ok_or(DecodeError::MissingField(MARKER))?;
    let payload = &body[start + MARKER.len()..];

    Ok(PollResult {
        retcode: extract_numeric(payload, RETCODE_OPEN, "retcode")?,
        selector: extract_numeric(payload, SELECTOR_OPEN, "selector")?,
    })
}

fn extract_numeric(
    payload: &str,
    open: &'static str,
    field: &'static str,
) -> Result<String, DecodeError> {
    let start = payload.find(open).ok_or(DecodeError::MissingField(field))?;
    let rest = &payload[start + open.len()..];
    let end = rest.find(VALUE_CLOSE).ok_or(DecodeError::MissingField(field))?;
    let value = &rest[..end];

    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DecodeError::InvalidField {
            field,
            value: value.to_string(),
        });
    }
    Ok(value.to_string())
}

/// Query for one sync check call against `host`.
#[derive(Debug, Clone)]
pub struct SyncCheckRequest<'a> {
    pub host: &'a str,
    pub base_request: &'a BaseRequest,
    pub sync_key: &'a SyncKey,
    pub timestamp_ms: i64,
}

impl SyncCheckRequest<'_> {
    /// Builds the request URL. The millisecond timestamp is sent twice, as
    /// `r` and as `_`; the backend requires both.
    pub fn url(&self) -> String {
        let ts = self.timestamp_ms.to_string();
        let uin = self.base_request.uin.to_string();
        let synckey = self.sync_key.encode_for_poll();
        let params = [
            ("r", ts.as_str()),
            ("sid", self.base_request.sid.as_str()),
            ("uin", uin.as_str()),
            ("deviceid", self.base_request.device_id.as_str()),
            ("synckey", synckey.as_str()),
            ("_", ts.as_str()),
        ];

        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        format!("https://{}{}?{}", self.host, SYNC_CHECK_PATH, query)
    }
}
