//! Common utilities and types shared across raftkv

pub mod config;
pub mod error;
pub mod utils;

pub use config::{Config, EngineKind, PeerConfig, RaftConfig, ServerConfig, StorageConfig, SyncPolicy};
pub use error::{Error, Result};
pub use utils::{crc32, format_bytes, is_listening, is_loopback, parse_peers};
