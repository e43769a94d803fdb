use crate::error::SyncError;
use crate::session::Session;
use chrono::Utc;
use log::debug;
use std::sync::Arc;
use std::time::Duration;
use wxcore::net::{HttpClient, HttpRequest};
use wxcore::synccheck::{PollResult, SyncCheckRequest, parse_sync_check};

/// Issues one sync check against `host` and decodes its status fields.
///
/// The server holds the request open until something changes or its own
/// timeout passes, so `timeout` must exceed that hold time. Cookies returned
/// by the server are folded into `session` even if the body turns out to be
/// undecodable.
pub async fn check_once(
    http_client: &Arc<dyn HttpClient>,
    session: &mut Session,
    host: &str,
    timeout: Duration,
) -> Result<PollResult, SyncError> {
    let url = SyncCheckRequest {
        host,
        base_request: &session.base_request,
        sync_key: session.sync_key(),
        timestamp_ms: Utc::now().timestamp_millis(),
    }
    .url();

    let response = session
        .send(http_client, HttpRequest::get(url), timeout)
        .await?;

    let body = String::from_utf8_lossy(&response.body);
    debug!(target: "Sync/Poll", "{host} answered: {}", body.trim());

    Ok(parse_sync_check(&body)?)
}
