use crate::config::SyncConfig;
use crate::dispatch::{Dispatcher, SyncEventHandler};
use crate::drain::BatchDrainer;
use crate::error::SyncError;
use crate::host::select_host;
use crate::poll::check_once;
use crate::session::Session;
use crate::shutdown::ShutdownSignal;
use log::{debug, error, info, warn};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use wxcore::net::HttpClient;

/// Drives one session's long-poll loop: host selection, sync checks and
/// batch drains, until the server ends the session or shutdown is requested.
pub struct SyncClient {
    http_client: Arc<dyn HttpClient>,
    config: SyncConfig,
    dispatcher: Dispatcher,
    shutdown: Arc<ShutdownSignal>,
    is_running: AtomicBool,
}

impl SyncClient {
    /// Must be called inside a Tokio runtime; the dispatch worker is spawned here.
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        handler: Arc<dyn SyncEventHandler>,
        config: SyncConfig,
    ) -> Self {
        let dispatcher = Dispatcher::spawn(handler, config.dispatch_queue_capacity);
        Self {
            http_client,
            config,
            dispatcher,
            shutdown: Arc::new(ShutdownSignal::new()),
            is_running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Handle that stops `run` from another task.
    pub fn shutdown_handle(&self) -> Arc<ShutdownSignal> {
        self.shutdown.clone()
    }

    pub fn disconnect(&self) {
        info!(target: "Sync/Client", "Stopping sync loop intentionally.");
        self.shutdown.trigger();
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }

    /// Runs until the session ends.
    ///
    /// Returns `Ok(())` only after a requested shutdown. Every other exit is
    /// an error; [`SyncError::requires_login`] tells the caller whether a new
    /// login is needed before trying again.
    pub async fn run(&self, session: &mut Session) -> Result<(), SyncError> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            warn!(target: "Sync/Client", "Sync `run` called while already running.");
            return Ok(());
        }
        let _guard = scopeguard::guard((), |_| {
            self.is_running.store(false, Ordering::Relaxed);
        });

        info!(target: "Sync/Client", "Looking up sync host, messages arrive once one is found.");
        let host = match self
            .guarded(select_host(
                &self.http_client,
                session,
                &self.config.hosts,
                self.config.poll_timeout,
            ))
            .await
        {
            Some(result) => result?,
            None => return Ok(()),
        };
        info!(target: "Sync/Client", "Discovered sync host [{host}], begin sync.");

        let mut consecutive_failures = 0u32;
        loop {
            if self.shutdown.is_triggered() {
                info!(target: "Sync/Client", "Shutdown signaled, leaving sync loop.");
                return Ok(());
            }

            let checked = self
                .guarded(check_once(
                    &self.http_client,
                    session,
                    &host,
                    self.config.poll_timeout,
                ))
                .await;

            let poll = match checked {
                None => continue,
                Some(Ok(poll)) => {
                    consecutive_failures = 0;
                    poll
                }
                Some(Err(e))
                    if e.is_retryable() && consecutive_failures < self.config.max_poll_retries =>
                {
                    consecutive_failures += 1;
                    let delay = self.config.backoff_delay(consecutive_failures);
                    warn!(
                        target: "Sync/Client",
                        "Sync check failed ({e}), retry {}/{} in {:?}",
                        consecutive_failures,
                        self.config.max_poll_retries,
                        delay
                    );
                    self.pause(delay).await;
                    continue;
                }
                Some(Err(e)) => {
                    error!(target: "Sync/Client", "Sync check failed: {e}");
                    return Err(e);
                }
            };

            if !poll.is_success() {
                error!(
                    target: "Sync/Client",
                    "Syncing failed, please re-login (retcode={})",
                    poll.retcode
                );
                return Err(SyncError::SessionInvalidated {
                    retcode: poll.retcode,
                });
            }

            if !poll.has_new_data() {
                debug!(target: "Sync/Client", "Server is silent.");
                self.pause(self.config.idle_delay).await;
                continue;
            }

            let report = BatchDrainer::new(
                &self.http_client,
                &self.dispatcher,
                self.config.fetch_timeout,
            )
            .drain(session, &self.shutdown)
            .await?;
            debug!(
                target: "Sync/Client",
                "Drained {} batches (selector={}), key updated {} times",
                report.fetches,
                poll.selector,
                report.key_updates
            );
        }
    }

    /// Waits for in-flight dispatches and stops the worker.
    pub async fn close(self) {
        self.dispatcher.close().await;
    }

    /// Races `fut` against shutdown; `None` means shutdown won.
    async fn guarded<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.shutdown.wait() => None,
            output = fut => Some(output),
        }
    }

    /// Sleeps for `delay` unless shutdown arrives first.
    async fn pause(&self, delay: Duration) {
        self.guarded(tokio::time::sleep(delay)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{RecordingHandler, ScriptedHttpClient, sync_response, test_session};

    fn fast_config(hosts: &[&str]) -> SyncConfig {
        SyncConfig {
            hosts: hosts.iter().map(|h| h.to_string()).collect(),
            poll_timeout: Duration::from_millis(100),
            fetch_timeout: Duration::from_millis(100),
            idle_delay: Duration::from_millis(1),
            retry_base_delay: Duration::from_millis(1),
            retry_max_delay: Duration::from_millis(4),
            max_poll_retries: 2,
            dispatch_queue_capacity: 4,
        }
    }

    fn client(scripted: &Arc<ScriptedHttpClient>, config: SyncConfig) -> SyncClient {
        SyncClient::new(scripted.clone(), Arc::new(RecordingHandler::new()), config)
    }

    #[tokio::test]
    async fn test_non_success_retcode_ends_session() {
        let scripted = Arc::new(ScriptedHttpClient::new());
        scripted.respond_sync_check("0", "0");
        scripted.respond_sync_check("1", "0");
        scripted.respond_sync_check("0", "0");
        let client = client(&scripted, fast_config(&["h"]));
        let mut session = test_session();

        let err = client.run(&mut session).await.unwrap_err();
        assert!(matches!(err, SyncError::SessionInvalidated { ref retcode } if retcode == "1"));
        assert!(err.requires_login());
        assert_eq!(scripted.remaining(), 1);
        assert!(!client.is_running());
    }

    #[tokio::test]
    async fn test_idle_polls_keep_polling() {
        let scripted = Arc::new(ScriptedHttpClient::new());
        scripted.respond_sync_check("0", "0");
        for _ in 0..3 {
            scripted.respond_sync_check("0", "0");
        }
        scripted.respond_sync_check("1101", "0");
        let client = client(&scripted, fast_config(&["h"]));
        let mut session = test_session();

        let err = client.run(&mut session).await.unwrap_err();
        assert!(matches!(err, SyncError::SessionInvalidated { .. }));
        assert_eq!(scripted.requests().len(), 5);
        assert_eq!(session.sync_key_revision(), 0);
    }

    #[tokio::test]
    async fn test_transient_poll_failures_are_retried() {
        let scripted = Arc::new(ScriptedHttpClient::new());
        scripted.respond_sync_check("0", "0");
        scripted.fail("connection reset");
        scripted.hang();
        scripted.respond_sync_check("1101", "0");
        let client = client(&scripted, fast_config(&["h"]));
        let mut session = test_session();

        let err = client.run(&mut session).await.unwrap_err();
        assert!(matches!(err, SyncError::SessionInvalidated { .. }));
    }

    #[tokio::test]
    async fn test_poll_failures_past_retry_budget_surface() {
        let scripted = Arc::new(ScriptedHttpClient::new());
        scripted.respond_sync_check("0", "0");
        for _ in 0..3 {
            scripted.fail("network unreachable");
        }
        let client = client(&scripted, fast_config(&["h"]));
        let mut session = test_session();

        let err = client.run(&mut session).await.unwrap_err();
        assert!(matches!(err, SyncError::Transport(_)));
        assert!(!err.requires_login());
    }

    #[tokio::test]
    async fn test_drain_failure_ends_loop() {
        let scripted = Arc::new(ScriptedHttpClient::new());
        scripted.respond_sync_check("0", "0");
        scripted.respond_sync_check("0", "2");
        scripted.respond_json(sync_response(1, &[(1, 101)]));
        scripted.respond(wxcore::net::HttpResponse::new(200, "not json"));
        scripted.respond_sync_check("0", "0");
        let client = client(&scripted, fast_config(&["h"]));
        let mut session = test_session();

        let err = client.run(&mut session).await.unwrap_err();
        assert!(matches!(err, SyncError::Decode(_)));
        assert_eq!(scripted.remaining(), 1);
        assert_eq!(session.sync_key().encode_for_poll(), "1_101");
    }

    #[tokio::test]
    async fn test_no_host_available_ends_startup() {
        let scripted = Arc::new(ScriptedHttpClient::new());
        scripted.respond_sync_check("1100", "0");
        scripted.fail("refused");
        let client = client(&scripted, fast_config(&["a", "b"]));
        let mut session = test_session();

        let err = client.run(&mut session).await.unwrap_err();
        assert!(matches!(err, SyncError::NoHostAvailable { tried: 2 }));
    }

    #[tokio::test]
    async fn test_disconnect_stops_hanging_poll() {
        let scripted = Arc::new(ScriptedHttpClient::new());
        scripted.respond_sync_check("0", "0");
        scripted.hang();
        let mut config = fast_config(&["h"]);
        config.poll_timeout = Duration::from_secs(30);
        let client = Arc::new(client(&scripted, config));

        let stopper = {
            let shutdown = client.shutdown_handle();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                shutdown.trigger();
            })
        };

        let mut session = test_session();
        tokio::time::timeout(Duration::from_secs(5), client.run(&mut session))
            .await
            .expect("run should stop promptly")
            .unwrap();
        stopper.await.unwrap();
    }
}
