//! Protocol core for the web session sync engine.
//!
//! Everything in here is runtime-agnostic: wire types, the sync key
//! encodings and the sync check body decoder. The async engine that drives
//! them lives in the `webwx-sync` crate.

pub mod error;
pub mod net;
pub mod session;
pub mod sync;
pub mod synccheck;
pub mod synckey;

pub use error::DecodeError;
pub use synckey::{SyncKey, SyncKeyPair, WireSyncKey};
