// Re-export core modules for convenience
pub use wxcore::{net, sync, synccheck, synckey};

pub mod client;
pub mod config;
pub mod dispatch;
pub mod drain;
pub mod error;
pub mod host;
pub mod poll;
pub mod session;
pub mod shutdown;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use client::SyncClient;
pub use config::SyncConfig;
pub use dispatch::{ContactChange, SyncEventHandler};
pub use error::SyncError;
pub use session::Session;
