//! Scripted collaborators for exercising the sync engine without a network.

use crate::dispatch::{ContactChange, SyncEventHandler};
use crate::session::Session;
use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use wxcore::net::{HttpClient, HttpRequest, HttpResponse};
use wxcore::session::BaseRequest;
use wxcore::sync::{Record, SyncBatch};

/// What a [`ScriptedHttpClient`] does with the next request.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Respond(HttpResponse),
    Fail(String),
    /// Never answers; the caller's timeout has to fire.
    Hang,
}

/// Answers requests from a FIFO script and records every request it sees.
#[derive(Debug, Default)]
pub struct ScriptedHttpClient {
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, reply: ScriptedReply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn respond(&self, response: HttpResponse) {
        self.push(ScriptedReply::Respond(response));
    }

    pub fn respond_sync_check(&self, retcode: &str, selector: &str) {
        self.respond(HttpResponse::new(200, sync_check_body(retcode, selector)));
    }

    pub fn respond_json(&self, body: Value) {
        self.respond(HttpResponse::new(200, body.to_string()));
    }

    pub fn fail(&self, message: &str) {
        self.push(ScriptedReply::Fail(message.to_string()));
    }

    pub fn hang(&self) {
        self.push(ScriptedReply::Hang);
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn urls(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.url).collect()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().unwrap().len()
    }
}

#[async_trait]
impl HttpClient for ScriptedHttpClient {
    async fn execute(&self, request: HttpRequest) -> anyhow::Result<HttpResponse> {
        let url = request.url.clone();
        self.requests.lock().unwrap().push(request);
        let next = self.replies.lock().unwrap().pop_front();

        match next {
            Some(ScriptedReply::Respond(response)) => Ok(response),
            Some(ScriptedReply::Fail(message)) => Err(anyhow!(message)),
            Some(ScriptedReply::Hang) => std::future::pending().await,
            None => Err(anyhow!("no scripted reply left for {url}")),
        }
    }
}

pub fn sync_check_body(retcode: &str, selector: &str) -> String {
    format!(r#"window.synccheck={{retcode:"{retcode}",selector:"{selector}"}}"#)
}

/// A minimal fetch response carrying `sync_key` as both keys' fallback.
pub fn sync_response(continue_flag: i64, sync_key: &[(i64, i64)]) -> Value {
    json!({
        "BaseResponse": {"Ret": 0, "ErrMsg": ""},
        "SyncKey": wire_key(sync_key),
        "ContinueFlag": continue_flag,
        "AddMsgCount": 0,
        "AddMsgList": [],
        "ModContactCount": 0,
        "ModContactList": [],
        "DelContactCount": 0,
        "DelContactList": [],
        "ModChatRoomMemberCount": 0,
        "ModChatRoomMemberList": []
    })
}

pub fn wire_key(pairs: &[(i64, i64)]) -> Value {
    json!({
        "Count": pairs.len(),
        "List": pairs.iter().map(|(k, v)| json!({"Key": k, "Val": v})).collect::<Vec<_>>()
    })
}

pub fn test_session() -> Session {
    Session::new(
        "https://wx.qq.com/cgi-bin/mmwebwx-bin",
        "ticket",
        BaseRequest {
            uin: 2_100_000_001,
            sid: "sid-0".to_string(),
            skey: "@crypt_0".to_string(),
            device_id: "e123456789012345".to_string(),
        },
    )
    .with_sync_key("1_100|2_200".parse().expect("static key parses"))
}

/// One observed handler call.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerCall {
    Contacts(ContactChange, Vec<Record>),
    GroupMembers(Vec<Record>),
    ServerEvent(Arc<SyncBatch>),
}

/// Records every call in order. Optionally fails server events to exercise
/// error isolation.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    calls: Mutex<Vec<HandlerCall>>,
    fail_server_events: bool,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_server_events() -> Self {
        Self {
            fail_server_events: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<HandlerCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn server_events(&self) -> Vec<Arc<SyncBatch>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                HandlerCall::ServerEvent(batch) => Some(batch),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl SyncEventHandler for RecordingHandler {
    async fn on_contacts_changed(
        &self,
        records: &[Record],
        change: ContactChange,
    ) -> anyhow::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(HandlerCall::Contacts(change, records.to_vec()));
        Ok(())
    }

    async fn on_group_members_changed(&self, records: &[Record]) -> anyhow::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(HandlerCall::GroupMembers(records.to_vec()));
        Ok(())
    }

    async fn on_server_event(&self, batch: Arc<SyncBatch>) -> anyhow::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(HandlerCall::ServerEvent(batch));
        if self.fail_server_events {
            return Err(anyhow!("handler rejected batch"));
        }
        Ok(())
    }
}
