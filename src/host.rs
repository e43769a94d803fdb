use crate::error::SyncError;
use crate::poll::check_once;
use crate::session::Session;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use wxcore::net::HttpClient;

/// Known push hosts in precedence order. The order (including the repeated
/// entry) is the backend's mirror precedence and is probed as-is.
pub const DEFAULT_SYNC_HOSTS: &[&str] = &[
    "webpush.wx.qq.com",
    "wx2.qq.com",
    "webpush.wx2.qq.com",
    "wx8.qq.com",
    "webpush.wx8.qq.com",
    "qq.com",
    "webpush.wx.qq.com",
    "web2.wechat.com",
    "webpush.web2.wechat.com",
    "wechat.com",
    "webpush.web.wechat.com",
    "webpush.weixin.qq.com",
    "webpush.wechat.com",
    "webpush1.wechat.com",
    "webpush2.wechat.com",
    "webpush2.wx.qq.com",
];

/// Probes `candidates` one at a time and commits to the first host whose
/// sync check succeeds. Later candidates are never contacted once a host is
/// accepted. Probes are sequential because each one also touches server-side
/// session state.
pub async fn select_host(
    http_client: &Arc<dyn HttpClient>,
    session: &mut Session,
    candidates: &[String],
    timeout: Duration,
) -> Result<String, SyncError> {
    for (index, host) in candidates.iter().enumerate() {
        debug!(
            target: "Sync/Host",
            "Probing sync host {host} ({}/{})",
            index + 1,
            candidates.len()
        );

        match check_once(http_client, session, host, timeout).await {
            Ok(result) if result.is_success() => {
                info!(target: "Sync/Host", "Committed to sync host [{host}]");
                session.sync_host = Some(host.clone());
                return Ok(host.clone());
            }
            Ok(result) => {
                warn!(target: "Sync/Host", "{host} rejected probe, retcode={}", result.retcode)
            }
            Err(e) => warn!(target: "Sync/Host", "{host} connect failed: {e}"),
        }
    }

    Err(SyncError::NoHostAvailable {
        tried: candidates.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{ScriptedHttpClient, test_session};
    use wxcore::net::HttpResponse;

    const TIMEOUT: Duration = Duration::from_millis(200);

    fn hosts(names: &[&str]) -> Vec<String> {
        names.iter().map(|h| h.to_string()).collect()
    }

    fn probed_hosts(scripted: &ScriptedHttpClient) -> Vec<String> {
        scripted
            .urls()
            .iter()
            .map(|u| {
                u.trim_start_matches("https://")
                    .split('/')
                    .next()
                    .unwrap()
                    .to_string()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_commits_to_first_successful_host() {
        let scripted = Arc::new(ScriptedHttpClient::new());
        scripted.fail("connection refused");
        scripted.respond_sync_check("1100", "0");
        scripted.respond_sync_check("0", "0");
        let http_client: Arc<dyn HttpClient> = scripted.clone();
        let mut session = test_session();

        let host = select_host(
            &http_client,
            &mut session,
            &hosts(&["a.example", "b.example", "c.example", "d.example"]),
            TIMEOUT,
        )
        .await
        .unwrap();

        assert_eq!(host, "c.example");
        assert_eq!(session.sync_host.as_deref(), Some("c.example"));
        assert_eq!(probed_hosts(&scripted), hosts(&["a.example", "b.example", "c.example"]));
    }

    #[tokio::test]
    async fn test_undecodable_and_hanging_hosts_are_skipped() {
        let scripted = Arc::new(ScriptedHttpClient::new());
        scripted.respond(HttpResponse::new(200, "<html></html>"));
        scripted.hang();
        scripted.respond_sync_check("0", "1");
        let http_client: Arc<dyn HttpClient> = scripted.clone();
        let mut session = test_session();

        let host = select_host(&http_client, &mut session, &hosts(&["a", "b", "c"]), TIMEOUT)
            .await
            .unwrap();
        assert_eq!(host, "c");
    }

    #[tokio::test]
    async fn test_all_candidates_failing_is_no_host_available() {
        let scripted = Arc::new(ScriptedHttpClient::new());
        scripted.respond_sync_check("1101", "0");
        scripted.fail("timeout");
        let http_client: Arc<dyn HttpClient> = scripted.clone();
        let mut session = test_session();

        let err = select_host(&http_client, &mut session, &hosts(&["a", "b"]), TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NoHostAvailable { tried: 2 }));
        assert!(err.requires_login());
        assert!(session.sync_host.is_none());
    }

    #[test]
    fn test_default_hosts_keep_precedence() {
        assert_eq!(DEFAULT_SYNC_HOSTS.len(), 16);
        assert_eq!(DEFAULT_SYNC_HOSTS[0], "webpush.wx.qq.com");
        assert_eq!(DEFAULT_SYNC_HOSTS[15], "webpush2.wx.qq.com");
    }
}
