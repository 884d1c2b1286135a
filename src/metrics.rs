//! Reward metrics
//!
//! Each new job reports the reward its coinbase pays to the miner. The sink
//! is injected into the client so embedders can route it wherever they keep
//! their counters.

use crate::utils::format_amount;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::info;

/// Receives the miner reward of every new job
pub trait MetricsSink: Send + Sync {
    fn record_reward(&self, coin: &str, value: u64);
}

/// Logs rewards through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn record_reward(&self, coin: &str, value: u64) {
        info!(
            target: "solo_rpc_miner::metrics",
            coin,
            value,
            amount = %format_amount(value),
            "block reward"
        );
    }
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_reward(&self, _coin: &str, _value: u64) {}
}

/// Keeps the latest reward per coin in memory
#[derive(Debug, Default)]
pub struct RewardGauge {
    latest: Mutex<HashMap<String, u64>>,
}

impl RewardGauge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest reward recorded for `coin`
    pub fn get(&self, coin: &str) -> Option<u64> {
        self.latest.lock().get(coin).copied()
    }
}

impl MetricsSink for RewardGauge {
    fn record_reward(&self, coin: &str, value: u64) {
        self.latest.lock().insert(coin.to_string(), value);
    }
}
