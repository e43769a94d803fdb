use crate::error::DecodeError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

const PAIR_SEPARATOR: &str = "|";
const FIELD_SEPARATOR: &str = "_";

/// One `(id, counter)` entry of a sync key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SyncKeyPair {
    pub key: i64,
    pub val: i64,
}

impl SyncKeyPair {
    pub fn new(key: i64, val: i64) -> Self {
        Self { key, val }
    }
}

/// The `{Count, List}` shape the fetch endpoint sends and expects.
///
/// Counters are carried as integers end to end so values beyond 2^53 survive
/// without passing through a float.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireSyncKey {
    pub count: usize,
    #[serde(default)]
    pub list: Vec<SyncKeyPair>,
}

/// Server-issued cursor: an ordered set of counter pairs.
///
/// Ids are unique and the order is the one the server sent; the pipe encoding
/// is positional so it must be echoed back unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireSyncKey", into = "WireSyncKey")]
pub struct SyncKey {
    pairs: Vec<SyncKeyPair>,
}

impl SyncKey {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a key from pairs in the given order, rejecting duplicate ids.
    pub fn from_pairs(pairs: impl IntoIterator<Item = SyncKeyPair>) -> Result<Self, DecodeError> {
        let pairs: Vec<SyncKeyPair> = pairs.into_iter().collect();
        let mut seen = HashSet::with_capacity(pairs.len());
        for pair in &pairs {
            if !seen.insert(pair.key) {
                return Err(DecodeError::DuplicateKey(pair.key));
            }
        }
        Ok(Self { pairs })
    }

    pub fn pairs(&self) -> &[SyncKeyPair] {
        &self.pairs
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Renders the key for the sync check query string: `1_100|2_200`.
    pub fn encode_for_poll(&self) -> String {
        self.pairs
            .iter()
            .map(|p| format!("{}{}{}", p.key, FIELD_SEPARATOR, p.val))
            .collect::<Vec<_>>()
            .join(PAIR_SEPARATOR)
    }

    /// Renders the key for the fetch request body.
    pub fn encode_for_fetch(&self) -> WireSyncKey {
        WireSyncKey {
            count: self.pairs.len(),
            list: self.pairs.clone(),
        }
    }

    /// Swaps in `new` wholesale and hands back the previous key.
    pub fn replace(&mut self, new: SyncKey) -> SyncKey {
        std::mem::replace(self, new)
    }
}

impl TryFrom<WireSyncKey> for SyncKey {
    type Error = DecodeError;

    fn try_from(wire: WireSyncKey) -> Result<Self, Self::Error> {
        if wire.count != wire.list.len() {
            return Err(DecodeError::CountMismatch {
                declared: wire.count,
                actual: wire.list.len(),
            });
        }
        SyncKey::from_pairs(wire.list)
    }
}

impl From<SyncKey> for WireSyncKey {
    fn from(key: SyncKey) -> Self {
        WireSyncKey {
            count: key.pairs.len(),
            list: key.pairs,
        }
    }
}

impl FromStr for SyncKey {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(SyncKey::new());
        }

        let pairs = s
            .split(PAIR_SEPARATOR)
            .map(|segment| -> Result<SyncKeyPair, DecodeError> {
                let malformed = || DecodeError::MalformedSyncKey(segment.to_string());
                let (key, val) = segment.split_once(FIELD_SEPARATOR).ok_or_else(malformed)?;
                Ok(SyncKeyPair {
                    key: key.parse().map_err(|_| malformed())?,
                    val: val.parse().map_err(|_| malformed())?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        SyncKey::from_pairs(pairs)
    }
}

impl fmt::Display for SyncKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode_for_poll())
    }
}
