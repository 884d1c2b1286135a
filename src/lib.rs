//! Solo RPC Miner
//!
//! A solo-mining client that talks straight to a full node's JSON-RPC
//! interface:
//! - Polls `getblocktemplate` and builds hashable block candidates
//! - Tracks the active job for attached mining backends
//! - Validates solved results and forwards them with `submitblock`
//! - Reconnects and refreshes outdated jobs on its own

pub mod block;
pub mod client;
pub mod coin;
pub mod config;
pub mod crypto;
pub mod error;
pub mod http;
pub mod job;
pub mod metrics;
pub mod rpc;
pub mod runtime;
pub mod types;
pub mod utils;

pub use client::SoloClient;
pub use config::{ClientConfig, Config};
pub use error::{Error, Result};
pub use types::*;

/// Application information
pub const APP_NAME: &str = "solo-rpc-miner";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
