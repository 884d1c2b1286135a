//! Coinbase transaction assembly

use super::template::Payment;
use crate::utils::decode_hex;
use crate::{crypto::sha256d, Error, Result};
use bitcoin::absolute::LockTime;
use bitcoin::consensus::{self, encode::VarInt};
use bitcoin::hashes::Hash;
use bitcoin::{
    script::Builder, transaction, Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn,
    TxOut, Witness,
};

/// One coinbase output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payout {
    pub script: ScriptBuf,
    pub amount: u64,
}

impl Payout {
    /// Decode a node-supplied payment descriptor
    pub fn from_payment(payment: &Payment) -> Result<Self> {
        let script = decode_hex("payment script", &payment.script)?;
        Ok(Self {
            script: ScriptBuf::from_bytes(script),
            amount: payment.amount,
        })
    }
}

/// Serialized coinbase transaction and its payouts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coinbase {
    /// Outputs in serialization order
    pub payouts: Vec<Payout>,
    /// Amount left to the miner after founder and smartnode payments
    pub miner_reward: u64,
    pub bytes: Vec<u8>,
    /// Internal byte order
    pub txid: [u8; 32],
}

/// Builds the coinbase transaction for a template
#[derive(Debug, Clone)]
pub struct CoinbaseBuilder {
    height: u64,
    value: u64,
    miner_script: ScriptBuf,
    founder: Option<Payout>,
    smartnodes: Vec<Payout>,
    payload: Option<Vec<u8>>,
    witness_commitment: Option<ScriptBuf>,
    tag: Vec<u8>,
}

impl CoinbaseBuilder {
    const MAX_SCRIPT_SIG_SIZE: usize = 100;

    /// Special transaction version carrying a coinbase payload
    const SPECIAL_TX_VERSION: i32 = 3 | (5 << 16);

    /// Coinbase witness the commitment output commits to
    const WITNESS_RESERVED_VALUE: [u8; 32] = [0; 32];

    pub fn new(height: u64, value: u64, miner_script: ScriptBuf) -> Self {
        Self {
            height,
            value,
            miner_script,
            founder: None,
            smartnodes: Vec::new(),
            payload: None,
            witness_commitment: None,
            tag: Vec::new(),
        }
    }

    pub fn with_founder(mut self, founder: Payout) -> Self {
        self.founder = Some(founder);
        self
    }

    pub fn with_smartnodes(mut self, smartnodes: Vec<Payout>) -> Self {
        self.smartnodes = smartnodes;
        self
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Zero-value output carrying the template's witness commitment
    pub fn with_witness_commitment(mut self, script: ScriptBuf) -> Self {
        self.witness_commitment = Some(script);
        self
    }

    pub fn with_tag(mut self, tag: &[u8]) -> Self {
        self.tag = tag.to_vec();
        self
    }

    /// Split the coinbase value and serialize the transaction
    pub fn build(self) -> Result<Coinbase> {
        if self.payload.is_some() && self.witness_commitment.is_some() {
            return Err(Error::template(
                "coinbase payload and witness commitment cannot be combined",
            ));
        }

        let script_sig = ScriptBuf::from_bytes(self.script_sig()?);

        let mut payouts = Vec::with_capacity(self.smartnodes.len() + 2);
        let mut remaining = self.value;

        for payout in self.founder.into_iter().chain(self.smartnodes) {
            remaining = remaining.checked_sub(payout.amount).ok_or_else(|| {
                Error::template(format!(
                    "payments exceed coinbase value {}",
                    self.value
                ))
            })?;
            payouts.push(payout);
        }

        payouts.push(Payout {
            script: self.miner_script,
            amount: remaining,
        });

        let mut output: Vec<TxOut> = payouts
            .iter()
            .map(|payout| TxOut {
                value: Amount::from_sat(payout.amount),
                script_pubkey: payout.script.clone(),
            })
            .collect();

        let mut witness = Witness::new();
        if let Some(commitment) = self.witness_commitment {
            output.push(TxOut {
                value: Amount::ZERO,
                script_pubkey: commitment,
            });
            witness.push(Self::WITNESS_RESERVED_VALUE);
        }

        let version = if self.payload.is_some() {
            transaction::Version(Self::SPECIAL_TX_VERSION)
        } else {
            transaction::Version::ONE
        };

        let coinbase = Transaction {
            version,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig,
                sequence: Sequence::MAX,
                witness,
            }],
            output,
        };

        let mut bytes = consensus::serialize(&coinbase);

        // the extra payload is outside what `Transaction` encodes
        let txid = match &self.payload {
            Some(payload) => {
                bytes.extend(consensus::serialize(&VarInt(payload.len() as u64)));
                bytes.extend_from_slice(payload);
                sha256d(&bytes)
            }
            None => coinbase.compute_txid().to_byte_array(),
        };

        Ok(Coinbase {
            payouts,
            miner_reward: remaining,
            bytes,
            txid,
        })
    }

    /// BIP34 height push followed by the tag push
    fn script_sig(&self) -> Result<Vec<u8>> {
        let height = i64::try_from(self.height)
            .map_err(|_| Error::template(format!("height {} out of range", self.height)))?;
        let mut script = Builder::new().push_int(height).into_script().into_bytes();

        if !self.tag.is_empty() {
            if self.tag.len() > 75 {
                return Err(Error::config("coinbase tag longer than 75 bytes"));
            }
            script.push(self.tag.len() as u8);
            script.extend_from_slice(&self.tag);
        }

        // consensus requires at least two bytes
        if script.len() < 2 {
            script.push(0);
        }

        if script.len() > Self::MAX_SCRIPT_SIG_SIZE {
            return Err(Error::template(format!(
                "coinbase script sig too large: {} bytes",
                script.len()
            )));
        }

        Ok(script)
    }
}
