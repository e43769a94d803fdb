//! Wire types for the batch fetch (`webwxsync`) endpoint.

use crate::session::BaseRequest;
use crate::synckey::{SyncKey, WireSyncKey};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const WEBWXSYNC_PATH: &str = "/webwxsync";

/// A loosely-typed change record. Its schema belongs to whoever consumes it.
pub type Record = Map<String, Value>;

/// Anti-cache token for the `rr` field: the bitwise complement of the unix
/// time in seconds. It changes every second and is always negative for
/// present-day clocks, so it cannot be mistaken for a counter.
pub fn anti_cache_token(unix_secs: i64) -> i64 {
    !unix_secs
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRequest<'a> {
    #[serde(rename = "BaseRequest")]
    pub base_request: &'a BaseRequest,
    #[serde(rename = "SyncKey")]
    pub sync_key: WireSyncKey,
    #[serde(rename = "rr")]
    pub rr: i64,
}

impl<'a> SyncRequest<'a> {
    pub fn new(base_request: &'a BaseRequest, sync_key: &SyncKey, unix_secs: i64) -> Self {
        Self {
            base_request,
            sync_key: sync_key.encode_for_fetch(),
            rr: anti_cache_token(unix_secs),
        }
    }
}

/// Builds the fetch URL. The skey is derived session state and rides in the
/// query string next to the sid.
pub fn sync_url(base_url: &str, base_request: &BaseRequest, pass_ticket: &str) -> String {
    format!(
        "{}{}?sid={}&skey={}&lang=en_US&pass_ticket={}",
        base_url.trim_end_matches('/'),
        WEBWXSYNC_PATH,
        urlencoding::encode(&base_request.sid),
        urlencoding::encode(&base_request.skey),
        urlencoding::encode(pass_ticket),
    )
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BaseResponse {
    pub ret: i64,
    #[serde(default)]
    pub err_msg: String,
}

/// Body of a fetch reply. `BaseResponse` is mandatory so that a page of the
/// wrong shape fails decoding instead of reading as an empty final batch.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SyncResponse {
    pub base_response: BaseResponse,
    #[serde(default)]
    pub sync_key: Option<SyncKey>,
    #[serde(default)]
    pub sync_check_key: Option<SyncKey>,
    #[serde(rename = "SKey", default)]
    pub skey: String,
    #[serde(default)]
    pub continue_flag: i64,

    #[serde(default)]
    pub add_msg_count: usize,
    #[serde(default)]
    pub add_msg_list: Vec<Record>,
    #[serde(default)]
    pub mod_contact_count: usize,
    #[serde(default)]
    pub mod_contact_list: Vec<Record>,
    #[serde(default)]
    pub del_contact_count: usize,
    #[serde(default)]
    pub del_contact_list: Vec<Record>,
    #[serde(default)]
    pub mod_chat_room_member_count: usize,
    #[serde(default)]
    pub mod_chat_room_member_list: Vec<Record>,
}

impl SyncResponse {
    /// Key the store should move to after this batch.
    ///
    /// The dedicated check key wins over the general sync key. An absent or
    /// empty key is "no key": the store keeps what it has rather than
    /// collapsing to empty and forcing a full resync.
    pub fn next_sync_key(&self) -> Option<&SyncKey> {
        self.sync_check_key
            .as_ref()
            .filter(|k| !k.is_empty())
            .or_else(|| self.sync_key.as_ref().filter(|k| !k.is_empty()))
    }

    pub fn into_batch(self) -> SyncBatch {
        let sync_key = self.next_sync_key().cloned();
        SyncBatch {
            continue_flag: self.continue_flag,
            sync_key,
            skey: Some(self.skey).filter(|s| !s.is_empty()),
            add_msg: CountedRecords::new(self.add_msg_count, self.add_msg_list),
            mod_contact: CountedRecords::new(self.mod_contact_count, self.mod_contact_list),
            del_contact: CountedRecords::new(self.del_contact_count, self.del_contact_list),
            mod_chat_room_member: CountedRecords::new(
                self.mod_chat_room_member_count,
                self.mod_chat_room_member_list,
            ),
        }
    }
}

/// Server-declared count plus the records that came with it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CountedRecords {
    pub count: usize,
    pub records: Vec<Record>,
}

impl CountedRecords {
    pub fn new(count: usize, records: Vec<Record>) -> Self {
        Self { count, records }
    }

    pub fn has_changes(&self) -> bool {
        self.count > 0
    }
}

/// One page of updates. Immutable once built; the dispatcher gets its own
/// handle while the engine moves on to the next fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncBatch {
    pub continue_flag: i64,
    pub sync_key: Option<SyncKey>,
    pub skey: Option<String>,
    pub add_msg: CountedRecords,
    pub mod_contact: CountedRecords,
    pub del_contact: CountedRecords,
    pub mod_chat_room_member: CountedRecords,
}

impl SyncBatch {
    pub fn has_more(&self) -> bool {
        self.continue_flag != 0
    }
}
