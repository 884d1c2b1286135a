//! `getblocktemplate` result document

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Block template as returned by the node.
///
/// Fields the builder cannot work without are optional here so that their
/// absence surfaces as a template error naming the field, rather than a
/// generic JSON error.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BlockTemplate {
    #[serde(default = "default_version")]
    pub version: i32,
    #[serde(rename = "previousblockhash")]
    pub previous_block_hash: Option<String>,
    pub height: Option<u64>,
    pub bits: Option<String>,
    #[serde(rename = "curtime", default)]
    pub current_time: u32,
    #[serde(rename = "coinbasevalue")]
    pub coinbase_value: Option<u64>,
    pub target: Option<String>,
    #[serde(default)]
    pub transactions: Vec<TemplateTransaction>,
    #[serde(default)]
    pub founder: Option<Payment>,
    #[serde(default)]
    pub founder_payments_started: bool,
    #[serde(default, alias = "masternode")]
    pub smartnode: Vec<Payment>,
    #[serde(default, alias = "masternode_payments_started")]
    pub smartnode_payments_started: bool,
    #[serde(default)]
    pub coinbase_payload: Option<String>,
    /// Witness commitment output script, hex (segwit chains)
    #[serde(default)]
    pub default_witness_commitment: Option<String>,
}

/// Transaction proposed by the node for inclusion
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TemplateTransaction {
    /// Raw transaction, hex
    pub data: String,
    /// Display-order txid; computed from `data` when absent
    #[serde(default)]
    pub txid: Option<String>,
}

/// Founder or smartnode payment descriptor
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Payment {
    #[serde(default)]
    pub payee: Option<String>,
    /// Locking script, hex
    pub script: String,
    pub amount: u64,
}

fn default_version() -> i32 {
    1
}

fn required<'a, T>(field: &'a Option<T>, name: &str) -> Result<&'a T> {
    field
        .as_ref()
        .ok_or_else(|| Error::template(format!("missing {}", name)))
}

impl BlockTemplate {
    /// Parse a template from the `result` member of an RPC reply
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| Error::template(format!("malformed template: {}", e)))
    }

    pub fn height(&self) -> Result<u64> {
        required(&self.height, "height").copied()
    }

    pub fn coinbase_value(&self) -> Result<u64> {
        required(&self.coinbase_value, "coinbasevalue").copied()
    }

    pub fn previous_block_hash(&self) -> Result<&str> {
        required(&self.previous_block_hash, "previousblockhash").map(String::as_str)
    }

    pub fn target(&self) -> Result<&str> {
        required(&self.target, "target").map(String::as_str)
    }

    /// Compact difficulty bits
    pub fn bits(&self) -> Result<u32> {
        let bits = required(&self.bits, "bits")?;
        u32::from_str_radix(bits, 16)
            .map_err(|e| Error::template(format!("invalid bits {:?}: {}", bits, e)))
    }

    /// Founder payment, when the template declares it active
    pub fn active_founder(&self) -> Option<&Payment> {
        self.founder.as_ref().filter(|_| self.founder_payments_started)
    }

    /// Smartnode payments, when the template declares them active
    pub fn active_smartnodes(&self) -> &[Payment] {
        if self.smartnode_payments_started {
            &self.smartnode
        } else {
            &[]
        }
    }
}
