//! The batch drainer: fetches update pages until the server says there is
//! nothing more, moving the session's sync key forward after every page.

use crate::dispatch::Dispatcher;
use crate::error::SyncError;
use crate::session::{Session, encode_json};
use crate::shutdown::ShutdownSignal;
use chrono::Utc;
use log::{debug, error, trace};
use std::sync::Arc;
use std::time::Duration;
use wxcore::net::HttpClient;
use wxcore::sync::{SyncBatch, SyncRequest, SyncResponse, sync_url};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainState {
    Idle,
    Fetching,
    Draining,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub fetches: usize,
    /// How many times the sync key was replaced during this drain.
    pub key_updates: u64,
    pub state: DrainState,
    /// Set when shutdown stopped the drain before the server ran dry.
    pub interrupted: bool,
}

/// Fetches one batch and applies its key to the session.
///
/// The check key wins over the sync key; a response with neither leaves the
/// stored key untouched. A malformed key fails the whole call before anything
/// is stored.
pub async fn fetch_batch(
    http_client: &Arc<dyn HttpClient>,
    session: &mut Session,
    timeout: Duration,
) -> Result<SyncBatch, SyncError> {
    let url = sync_url(&session.base_url, &session.base_request, &session.pass_ticket);
    let payload = encode_json(&SyncRequest::new(
        &session.base_request,
        session.sync_key(),
        Utc::now().timestamp(),
    ))?;

    let response: SyncResponse = session
        .post_json(http_client, &url, payload, timeout)
        .await?;

    if response.base_response.ret != 0 {
        return Err(SyncError::Server {
            ret: response.base_response.ret,
            msg: response.base_response.err_msg,
        });
    }

    let batch = response.into_batch();
    if let Some(key) = &batch.sync_key {
        session.replace_sync_key(key.clone());
    }
    if let Some(skey) = &batch.skey {
        session.base_request.skey = skey.clone();
    }
    Ok(batch)
}

pub struct BatchDrainer<'a> {
    http_client: &'a Arc<dyn HttpClient>,
    dispatcher: &'a Dispatcher,
    fetch_timeout: Duration,
    state: DrainState,
}

impl<'a> BatchDrainer<'a> {
    pub fn new(
        http_client: &'a Arc<dyn HttpClient>,
        dispatcher: &'a Dispatcher,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            http_client,
            dispatcher,
            fetch_timeout,
            state: DrainState::Idle,
        }
    }

    pub fn state(&self) -> DrainState {
        self.state
    }

    fn transition(&mut self, next: DrainState) {
        trace!(target: "Sync/Drain", "{:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Runs the drain to `Done`. Any error moves the drainer to `Failed` and
    /// is returned; the caller is expected to end the session.
    ///
    /// Shutdown is honoured before and during each fetch, never between
    /// storing a batch's key and queueing the batch.
    pub async fn drain(
        &mut self,
        session: &mut Session,
        shutdown: &ShutdownSignal,
    ) -> Result<DrainReport, SyncError> {
        let start_revision = session.sync_key_revision();
        let mut fetches = 0;
        self.transition(DrainState::Fetching);

        loop {
            if self.state == DrainState::Draining {
                self.transition(DrainState::Fetching);
            }

            let fetched = tokio::select! {
                biased;
                _ = shutdown.wait() => None,
                result = fetch_batch(self.http_client, session, self.fetch_timeout) => Some(result),
            };

            let batch = match fetched {
                None => {
                    debug!(target: "Sync/Drain", "Shutdown signaled, leaving drain after {fetches} fetches");
                    return Ok(DrainReport {
                        fetches,
                        key_updates: session.sync_key_revision() - start_revision,
                        state: self.state,
                        interrupted: true,
                    });
                }
                Some(Ok(batch)) => Arc::new(batch),
                Some(Err(e)) => {
                    error!(target: "Sync/Drain", "Sync message failed: {e}");
                    self.transition(DrainState::Failed);
                    return Err(e);
                }
            };
            fetches += 1;

            self.dispatcher.apply_changes(&batch).await;
            debug!(
                target: "Sync/Drain",
                "Server sync summary: AddMsg={} ModContact={} DelContact={} ModChatRoomMember={} Continue={}",
                batch.add_msg.count,
                batch.mod_contact.count,
                batch.del_contact.count,
                batch.mod_chat_room_member.count,
                batch.continue_flag
            );

            let has_more = batch.has_more();
            if let Err(e) = self.dispatcher.enqueue(batch).await {
                self.transition(DrainState::Failed);
                return Err(e);
            }

            if has_more {
                self.transition(DrainState::Draining);
            } else {
                self.transition(DrainState::Done);
                return Ok(DrainReport {
                    fetches,
                    key_updates: session.sync_key_revision() - start_revision,
                    state: self.state,
                    interrupted: false,
                });
            }
        }
    }
}
