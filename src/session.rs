//! The per-login session context.
//!
//! One `Session` value carries everything the sync loop needs between
//! iterations: identity, cookies, the committed host and the sync key. It is
//! passed by `&mut` into each step instead of living in shared globals; the
//! sync key is only ever replaced through [`Session::replace_sync_key`].

use crate::error::SyncError;
use anyhow::{Context, Result};
use log::{debug, trace};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use wxcore::DecodeError;
use wxcore::net::{HttpClient, HttpRequest, HttpResponse};
use wxcore::session::{BaseRequest, CookieCache};
use wxcore::synckey::SyncKey;

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Prefix for structured API calls, e.g. `https://wx.qq.com/cgi-bin/mmwebwx-bin`.
    pub base_url: String,
    #[serde(default)]
    pub pass_ticket: String,
    pub base_request: BaseRequest,
    #[serde(default)]
    pub cookies: CookieCache,
    #[serde(default)]
    pub sync_host: Option<String>,
    #[serde(default)]
    sync_key: SyncKey,
    #[serde(skip)]
    sync_key_revision: u64,
}

impl Session {
    pub fn new(
        base_url: impl Into<String>,
        pass_ticket: impl Into<String>,
        base_request: BaseRequest,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            pass_ticket: pass_ticket.into(),
            base_request,
            cookies: CookieCache::new(),
            sync_host: None,
            sync_key: SyncKey::new(),
            sync_key_revision: 0,
        }
    }

    /// Starts from a key carried over from a previous run.
    pub fn with_sync_key(mut self, sync_key: SyncKey) -> Self {
        self.sync_key = sync_key;
        self
    }

    /// Loads a session written by the login step (or by [`Session::save`]).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read(path)
            .with_context(|| format!("failed to read session file {}", path.display()))?;
        serde_json::from_slice(&raw)
            .with_context(|| format!("failed to parse session file {}", path.display()))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let raw = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, raw)
            .with_context(|| format!("failed to write session file {}", path.display()))
    }

    pub fn sync_key(&self) -> &SyncKey {
        &self.sync_key
    }

    /// Number of times the sync key has been replaced since this value was created.
    pub fn sync_key_revision(&self) -> u64 {
        self.sync_key_revision
    }

    pub fn replace_sync_key(&mut self, sync_key: SyncKey) {
        debug!(target: "Sync/Session", "Sync key -> {}", sync_key);
        self.sync_key.replace(sync_key);
        self.sync_key_revision += 1;
    }

    pub fn refresh_cookies(&mut self, set_cookies: &[String]) {
        if set_cookies.is_empty() {
            return;
        }
        let touched = self.cookies.refresh(set_cookies);
        trace!(target: "Sync/Session", "Refreshed {touched} cookies");
    }

    pub fn refresh_base_request(&mut self) {
        if self.base_request.refresh_from_cookies(&self.cookies) {
            debug!(target: "Sync/Session", "Base request updated from cookies");
        }
    }

    fn decorate(&self, mut request: HttpRequest) -> HttpRequest {
        request = request.with_header("user-agent", USER_AGENT);
        if let Some(cookie) = self.cookies.header_value() {
            request = request.with_header("cookie", cookie);
        }
        request
    }

    /// Sends `request` with the session's cookies, bounded by `timeout`.
    ///
    /// Cookies and base request metadata are refreshed from every response
    /// that arrives, before its status is looked at.
    pub async fn send(
        &mut self,
        http_client: &Arc<dyn HttpClient>,
        request: HttpRequest,
        timeout: Duration,
    ) -> Result<HttpResponse, SyncError> {
        let request = self.decorate(request.with_timeout(timeout));
        let url = request.url.clone();

        let response = tokio::time::timeout(timeout, http_client.execute(request))
            .await
            .map_err(|_| SyncError::Timeout(timeout))?
            .map_err(|e| SyncError::Transport(format!("{url}: {e}")))?;

        self.refresh_cookies(&response.set_cookies);
        self.refresh_base_request();

        if !response.is_success() {
            return Err(SyncError::Transport(format!(
                "{url}: HTTP status {}",
                response.status_code
            )));
        }
        Ok(response)
    }

    /// POSTs an already encoded JSON body and decodes the JSON reply.
    pub async fn post_json<T: DeserializeOwned>(
        &mut self,
        http_client: &Arc<dyn HttpClient>,
        url: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<T, SyncError> {
        let request = HttpRequest::post(url)
            .with_header("content-type", "application/json;charset=UTF-8")
            .with_body(payload);
        let response = self.send(http_client, request, timeout).await?;
        serde_json::from_slice(&response.body).map_err(|e| SyncError::Decode(DecodeError::from(e)))
    }
}

/// Serializes a request body, mapping failures to [`SyncError::Encode`].
pub fn encode_json<T: Serialize + ?Sized>(body: &T) -> Result<Vec<u8>, SyncError> {
    serde_json::to_vec(body).map_err(|e| SyncError::Encode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{ScriptedHttpClient, test_session};
    use serde_json::json;

    #[test]
    fn test_replace_sync_key_counts_revisions() {
        let mut session = test_session();
        assert_eq!(session.sync_key_revision(), 0);
        session.replace_sync_key("1_2".parse().unwrap());
        session.replace_sync_key("1_3".parse().unwrap());
        assert_eq!(session.sync_key_revision(), 2);
        assert_eq!(session.sync_key().encode_for_poll(), "1_3");
    }

    #[test]
    fn test_save_and_load_keeps_sync_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        let mut session = test_session();
        session.replace_sync_key("1_100|2_200|1000_1697000000".parse().unwrap());
        session.cookies.insert("wxsid", "sid-1");
        session.save(&path).unwrap();

        let loaded = Session::load(&path).unwrap();
        assert_eq!(loaded.sync_key(), session.sync_key());
        assert_eq!(loaded.cookies.get("wxsid"), Some("sid-1"));
        assert_eq!(loaded.sync_key_revision(), 0);
    }

    #[test]
    fn test_load_rejects_malformed_sync_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(
            &path,
            json!({
                "base_url": "https://wx.qq.com/cgi-bin/mmwebwx-bin",
                "base_request": {"Uin": 1, "Sid": "s", "Skey": "k", "DeviceID": "e1"},
                "sync_key": {"Count": 5, "List": []}
            })
            .to_string(),
        )
        .unwrap();

        assert!(Session::load(&path).is_err());
    }

    #[tokio::test]
    async fn test_send_refreshes_cookies_and_sends_them_back() {
        let scripted = Arc::new(ScriptedHttpClient::new());
        scripted.respond(
            wxcore::net::HttpResponse::new(200, "ok")
                .with_cookie("wxsid=rotated; Path=/")
                .with_cookie("wxuin=777; Path=/"),
        );
        scripted.respond(wxcore::net::HttpResponse::new(200, "ok"));
        let http_client: Arc<dyn HttpClient> = scripted.clone();

        let mut session = test_session();
        let timeout = Duration::from_secs(1);
        session
            .send(&http_client, HttpRequest::get("https://a/1"), timeout)
            .await
            .unwrap();
        assert_eq!(session.base_request.sid, "rotated");
        assert_eq!(session.base_request.uin, 777);

        session
            .send(&http_client, HttpRequest::get("https://a/2"), timeout)
            .await
            .unwrap();
        let requests = scripted.requests();
        assert_eq!(requests[0].headers.get("cookie"), None);
        assert_eq!(
            requests[1].headers.get("cookie").map(String::as_str),
            Some("wxsid=rotated; wxuin=777")
        );
        assert_eq!(requests[1].timeout, Some(timeout));
    }

    #[tokio::test]
    async fn test_send_maps_failures() {
        let scripted = Arc::new(ScriptedHttpClient::new());
        scripted.respond(wxcore::net::HttpResponse::new(502, "bad gateway"));
        scripted.fail("connection reset");
        scripted.hang();
        let http_client: Arc<dyn HttpClient> = scripted;

        let mut session = test_session();
        let timeout = Duration::from_millis(50);
        for _ in 0..2 {
            let err = session
                .send(&http_client, HttpRequest::get("https://a"), timeout)
                .await
                .unwrap_err();
            assert!(matches!(err, SyncError::Transport(_)), "{err:?}");
        }
        let err = session
            .send(&http_client, HttpRequest::get("https://a"), timeout)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Timeout(d) if d == timeout));
    }
}
