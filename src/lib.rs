//! # raftkv
//!
//! A replicated key-value store with:
//! - A compact binary request/response protocol over TCP
//! - Raft consensus ordering every write across the cluster
//! - A log-structured storage engine with threshold compaction
//! - Local reads and transparent forwarding of writes to the leader
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//!            client frames              RAFT frames
//!                 │                  ┌──────────────┐
//! ┌───────────────▼──────────────────▼─┐            │
//! │ Node                               │            │
//! │  Handler ──▶ Bridge ──▶ RaftHandle ├────────────┘
//! │               │   ▲        │       │   to peers
//! │        GET    │   │ commit │       │
//! │               ▼   │        ▼       │
//! │        Db (LRU) ◀── KvStateMachine │
//! │               │                    │
//! │        KvStore: <gen>.log segments │
//! └────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start a three node cluster
//! ```bash
//! raftkv-server --id 1 --addr 127.0.0.1:2317 --data-dir ./nodes/node1 \
//!   --peers 2=127.0.0.1:2318,3=127.0.0.1:2319 --bootstrap
//! raftkv-server --id 2 --addr 127.0.0.1:2318 --data-dir ./nodes/node2 \
//!   --peers 1=127.0.0.1:2317,3=127.0.0.1:2319
//! raftkv-server --id 3 --addr 127.0.0.1:2319 --data-dir ./nodes/node3 \
//!   --peers 1=127.0.0.1:2317,2=127.0.0.1:2318
//! ```
//!
//! ### Use the CLI
//! ```bash
//! raftkv set name mars
//! raftkv --address 127.0.0.1:2318 get name
//! raftkv del name
//!
//! # Membership
//! raftkv member list
//! raftkv member add 4 127.0.0.1:2320
//! raftkv member remove 4
//! ```

pub mod bridge;
pub mod client;
pub mod command;
pub mod common;
pub mod consensus;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-export commonly used types
pub use client::Client;
pub use common::{Config, Error, Result};
pub use server::{Node, NodeHandle};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
