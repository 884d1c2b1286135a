//! Block candidate construction
//!
//! Turns a node's block template into a hashable candidate: coinbase with
//! founder, smartnode and miner payouts, template transactions, merkle root
//! and the 80-byte header the mining backends hash.

use crate::coin::Payee;
use crate::crypto::{hash_from_display_hex, merkle_root, sha256d};
use crate::utils::decode_hex;
use crate::{derive_partial_target, Error, Nonce, Result, Target};
use bitcoin::consensus::{self, encode::VarInt};
use bitcoin::ScriptBuf;
use byteorder::{LittleEndian, WriteBytesExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

pub mod coinbase;
pub mod template;

pub use coinbase::{Coinbase, CoinbaseBuilder, Payout};
pub use template::{BlockTemplate, Payment, TemplateTransaction};

/// Share of jobs, in percent, whose miner output goes to the dev address
pub const DEV_FEE_PERCENT: u8 = 1;

/// Tag appended to the coinbase script sig
pub const COINBASE_TAG: &[u8] = b"/solo-rpc-miner/";

/// Block header fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: i32,
    /// Internal byte order
    pub prev_hash: [u8; 32],
    /// Internal byte order
    pub merkle_root: [u8; 32],
    pub time: u32,
    pub bits: u32,
    pub nonce: Nonce,
}

impl Header {
    /// Serialized header size in bytes
    pub const SIZE: usize = 80;

    /// Byte offset of the nonce in the serialized header
    pub const NONCE_OFFSET: usize = 76;

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(Self::SIZE);
        bytes.write_i32::<LittleEndian>(self.version)?;
        bytes.extend_from_slice(&self.prev_hash);
        bytes.extend_from_slice(&self.merkle_root);
        bytes.write_u32::<LittleEndian>(self.time)?;
        bytes.write_u32::<LittleEndian>(self.bits)?;
        bytes.extend_from_slice(&self.nonce.to_bytes());
        Ok(bytes)
    }
}

/// Reward reported to the metrics sink for each new candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardMetric {
    pub coin: &'static str,
    pub value: u64,
}

/// A fully assembled, hashable block candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockCandidate {
    pub header: Header,
    pub height: u64,
    pub coinbase: Coinbase,
    /// Raw template transactions, in template order
    pub transactions: Vec<Vec<u8>>,
    /// Block target, little-endian
    pub target: Target,
    /// Share threshold for backends, little-endian hex
    pub partial_target: String,
    /// Whether the miner output pays the dev address
    pub dev_round: bool,
    pub reward: RewardMetric,
    hashing_blob: Vec<u8>,
}

impl BlockCandidate {
    /// Header bytes with the merkle root and a zero nonce
    pub fn hashing_blob(&self) -> &[u8] {
        &self.hashing_blob
    }

    pub fn hashing_blob_hex(&self) -> String {
        hex::encode(&self.hashing_blob)
    }

    /// Full serialized block with `nonce` set, for `submitblock`
    pub fn block_bytes(&self, nonce: Nonce) -> Vec<u8> {
        let mut bytes = self.hashing_blob.clone();
        bytes[Header::NONCE_OFFSET..Header::SIZE].copy_from_slice(&nonce.to_bytes());

        bytes.extend(consensus::serialize(&VarInt(1 + self.transactions.len() as u64)));
        bytes.extend_from_slice(&self.coinbase.bytes);
        for tx in &self.transactions {
            bytes.extend_from_slice(tx);
        }
        bytes
    }

    pub fn block_hex(&self, nonce: Nonce) -> String {
        hex::encode(self.block_bytes(nonce))
    }
}

/// Builds block candidates for one payee.
///
/// Owns the dev-round draw so a decision is made exactly once per candidate.
#[derive(Debug)]
pub struct BlockBuilder {
    payee: Payee,
    dev_fee_percent: u8,
    rng: StdRng,
}

impl BlockBuilder {
    pub fn new(payee: Payee) -> Self {
        Self {
            payee,
            dev_fee_percent: DEV_FEE_PERCENT,
            rng: StdRng::from_os_rng(),
        }
    }

    /// Override the dev fee percentage (0 disables dev rounds)
    pub fn with_dev_fee_percent(mut self, percent: u8) -> Self {
        self.dev_fee_percent = percent.min(100);
        self
    }

    /// Use a deterministic dev-round draw
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn payee(&self) -> &Payee {
        &self.payee
    }

    fn draw_dev_round(&mut self) -> bool {
        self.payee.dev.is_some() && self.rng.random_range(0..100u8) < self.dev_fee_percent
    }

    /// Assemble a candidate from a template.
    ///
    /// Any missing or malformed field fails the whole build; nothing is
    /// drawn or published in that case.
    pub fn build(&mut self, template: &BlockTemplate) -> Result<BlockCandidate> {
        let height = template.height()?;
        let coinbase_value = template.coinbase_value()?;
        let prev_hash = hash_from_display_hex(template.previous_block_hash()?)?;
        let bits = template.bits()?;
        let (target, partial_target) = derive_partial_target(template.target()?)?;

        let founder = template.active_founder().map(Payout::from_payment).transpose()?;
        let smartnodes = template
            .active_smartnodes()
            .iter()
            .map(Payout::from_payment)
            .collect::<Result<Vec<_>>>()?;
        let payload = template
            .coinbase_payload
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(|p| decode_hex("coinbase_payload", p))
            .transpose()?;
        let witness_commitment = template
            .default_witness_commitment
            .as_deref()
            .filter(|c| !c.is_empty())
            .map(|c| decode_hex("default_witness_commitment", c).map(ScriptBuf::from_bytes))
            .transpose()?;

        let mut transactions = Vec::with_capacity(template.transactions.len());
        let mut txids = Vec::with_capacity(template.transactions.len() + 1);
        for tx in &template.transactions {
            let data = decode_hex("transaction data", &tx.data)?;
            let txid = match &tx.txid {
                Some(txid) => hash_from_display_hex(txid)?,
                None => sha256d(&data),
            };
            txids.push(txid);
            transactions.push(data);
        }

        let dev_round = self.draw_dev_round();

        let mut builder =
            CoinbaseBuilder::new(height, coinbase_value, self.payee.script(dev_round).clone())
                .with_smartnodes(smartnodes)
                .with_tag(COINBASE_TAG);
        if let Some(founder) = founder {
            builder = builder.with_founder(founder);
        }
        if let Some(payload) = payload {
            builder = builder.with_payload(payload);
        }
        if let Some(commitment) = witness_commitment {
            builder = builder.with_witness_commitment(commitment);
        }
        let coinbase = builder.build()?;

        txids.insert(0, coinbase.txid);
        let merkle_root = merkle_root(&txids)
            .ok_or_else(|| Error::invalid_state("empty transaction set"))?;

        let header = Header {
            version: template.version,
            prev_hash,
            merkle_root,
            time: template.current_time,
            bits,
            nonce: Nonce::new(0),
        };
        let hashing_blob = header.serialize()?;

        debug!(
            "Built candidate at height {} with {} transactions (dev round: {})",
            height,
            txids.len(),
            dev_round
        );

        let reward = RewardMetric {
            coin: self.payee.coin.name,
            value: coinbase.miner_reward,
        };

        Ok(BlockCandidate {
            header,
            height,
            coinbase,
            transactions,
            target,
            partial_target,
            dev_round,
            reward,
            hashing_blob,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coin::{Coin, MiningAddress};
    use serde_json::json;

    const MINER: &str = "R9NXAVJezHiBnT3ijTpg3JUZre7PxhJWti";
    const DEV: &str = "RQqbQFkUjwn9wxnvV7sfkcBPrGdZSfmdWU";
    const TARGET: &str = "00000000ffff0000000000000000000000000000000000000000000000000000";

    fn payee(with_dev: bool) -> Payee {
        let arg = if with_dev {
            format!("{}:{}", DEV, MINER)
        } else {
            MINER.to_string()
        };
        let address: MiningAddress = arg.parse().unwrap();
        Payee::resolve(&address, Coin::RAPTOREUM).unwrap()
    }

    fn template(extra: serde_json::Value) -> BlockTemplate {
        let mut base = json!({
            "version": 536870912,
            "previousblockhash": "aa".repeat(32),
            "height": 100,
            "bits": "1d00ffff",
            "curtime": 1700000000,
            "coinbasevalue": 5000000000u64,
            "target": TARGET,
            "transactions": [{"data": "0100000000000000000000"}],
        });
        if let (Some(base), Some(extra)) = (base.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                base.insert(k.clone(), v.clone());
            }
        }
        BlockTemplate::from_value(base).unwrap()
    }

    #[test]
    fn test_single_payout_and_merkle_root() {
        let mut builder = BlockBuilder::new(payee(false));
        let candidate = builder.build(&template(json!({}))).unwrap();

        assert_eq!(candidate.height, 100);
        assert_eq!(candidate.coinbase.payouts.len(), 1);
        assert_eq!(candidate.coinbase.payouts[0].amount, 5_000_000_000);
        assert_eq!(candidate.coinbase.payouts[0].script, builder.payee().mining);

        let tx_id = sha256d(&hex::decode("0100000000000000000000").unwrap());
        let mut pair = candidate.coinbase.txid.to_vec();
        pair.extend_from_slice(&tx_id);
        assert_eq!(candidate.header.merkle_root, sha256d(&pair));
        assert_eq!(&candidate.hashing_blob()[36..68], &sha256d(&pair));
    }

    #[test]
    fn test_hashing_blob_layout() {
        let mut builder = BlockBuilder::new(payee(false));
        let candidate = builder.build(&template(json!({}))).unwrap();
        let blob = candidate.hashing_blob();

        assert_eq!(blob.len(), Header::SIZE);
        assert_eq!(&blob[0..4], &536870912i32.to_le_bytes());
        assert_eq!(&blob[4..36], &[0xaa; 32]);
        assert_eq!(&blob[68..72], &1700000000u32.to_le_bytes());
        assert_eq!(&blob[72..76], &0x1d00ffffu32.to_le_bytes());
        assert_eq!(&blob[76..80], &[0, 0, 0, 0]);
        assert_eq!(candidate.hashing_blob_hex(), hex::encode(blob));
    }

    #[test]
    fn test_founder_and_smartnode_split() {
        let mut builder = BlockBuilder::new(payee(false));
        let candidate = builder
            .build(&template(json!({
                "founder": {"script": "a914".to_string() + &"01".repeat(20) + "87", "amount": 500000000},
                "founder_payments_started": true,
                "smartnode": [
                    {"script": "76a914".to_string() + &"02".repeat(20) + "88ac", "amount": 1000000000},
                    {"script": "76a914".to_string() + &"03".repeat(20) + "88ac", "amount": 750000000},
                ],
                "smartnode_payments_started": true,
            })))
            .unwrap();

        let amounts: Vec<u64> = candidate.coinbase.payouts.iter().map(|p| p.amount).collect();
        assert_eq!(amounts, vec![500_000_000, 1_000_000_000, 750_000_000, 2_750_000_000]);
        assert_eq!(candidate.reward.value, 5_000_000_000 - 500_000_000 - 1_750_000_000);
        assert_eq!(candidate.reward.coin, "raptoreum");
    }

    #[test]
    fn test_inactive_payments_ignored() {
        let mut builder = BlockBuilder::new(payee(false));
        let candidate = builder
            .build(&template(json!({
                "founder": {"script": "51", "amount": 500000000},
                "founder_payments_started": false,
            })))
            .unwrap();
        assert_eq!(candidate.coinbase.payouts.len(), 1);
        assert_eq!(candidate.reward.value, 5_000_000_000);
    }

    #[test]
    fn test_dev_round_pays_dev_address() {
        let mut builder = BlockBuilder::new(payee(true)).with_dev_fee_percent(100);
        let candidate = builder.build(&template(json!({}))).unwrap();
        assert!(candidate.dev_round);
        assert_eq!(candidate.coinbase.payouts[0].script, *builder.payee().dev.as_ref().unwrap());

        let mut builder = BlockBuilder::new(payee(true)).with_dev_fee_percent(0);
        assert!(!builder.build(&template(json!({}))).unwrap().dev_round);

        let mut builder = BlockBuilder::new(payee(false)).with_dev_fee_percent(100);
        assert!(!builder.build(&template(json!({}))).unwrap().dev_round);
    }

    #[test]
    fn test_missing_field_aborts_build() {
        let mut builder = BlockBuilder::new(payee(false));
        let mut broken = template(json!({}));
        broken.coinbase_value = None;
        let err = builder.build(&broken).unwrap_err();
        assert_eq!(err.to_string(), "Invalid block template: missing coinbasevalue");
    }

    #[test]
    fn test_malformed_target_aborts_build() {
        let mut builder = BlockBuilder::new(payee(false));
        let broken = template(json!({ "target": &TARGET[..61] }));
        assert_eq!(builder.build(&broken).unwrap_err().category(), "target");
    }

    #[test]
    fn test_witness_commitment_from_template() {
        let mut builder = BlockBuilder::new(payee(false));
        let commitment = format!("6a24aa21a9ed{}", "22".repeat(32));
        let candidate = builder
            .build(&template(json!({ "default_witness_commitment": commitment })))
            .unwrap();

        let coinbase: bitcoin::Transaction =
            consensus::deserialize(&candidate.coinbase.bytes).unwrap();
        assert_eq!(coinbase.output.len(), 2);
        assert_eq!(coinbase.output[1].script_pubkey.as_bytes(), hex::decode(&commitment).unwrap());
        assert_eq!(candidate.coinbase.payouts.len(), 1);
        assert_eq!(candidate.reward.value, 5_000_000_000);

        let broken = template(json!({ "default_witness_commitment": "zz" }));
        assert_eq!(builder.build(&broken).unwrap_err().category(), "template");
    }

    #[test]
    fn test_block_bytes() {
        let mut builder = BlockBuilder::new(payee(false));
        let candidate = builder.build(&template(json!({}))).unwrap();
        let block = candidate.block_bytes(Nonce::new(0xdeadbeef));

        assert_eq!(&block[76..80], &0xdeadbeefu32.to_le_bytes());
        assert_eq!(block[80], 2);
        assert_eq!(&block[81..81 + candidate.coinbase.bytes.len()], candidate.coinbase.bytes.as_slice());
        assert!(block.ends_with(&hex::decode("0100000000000000000000").unwrap()));
        // blob itself is untouched
        assert_eq!(&candidate.hashing_blob()[76..80], &[0, 0, 0, 0]);
    }
}
