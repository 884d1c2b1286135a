//! Coin parameters and payout address resolution
//!
//! The address argument has the shape `[coin/][devAddress:]miningAddress`.
//! Addresses are base58check encoded and resolved to their locking scripts
//! once, when the client configuration is built.

use crate::{Algorithm, Error, Result};
use bitcoin::hashes::Hash;
use bitcoin::{PubkeyHash, ScriptBuf, ScriptHash};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Static parameters of a supported coin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coin {
    /// Name used as the metrics key
    pub name: &'static str,
    /// Short prefix accepted in the address argument
    pub ticker: &'static str,
    /// Default proof-of-work algorithm tag
    pub algorithm: &'static str,
    /// Version bytes of pay-to-pubkey-hash addresses (mainnet, testnet)
    pub p2pkh_prefixes: &'static [u8],
    /// Version bytes of pay-to-script-hash addresses (mainnet, testnet)
    pub p2sh_prefixes: &'static [u8],
}

impl Coin {
    pub const RAPTOREUM: Coin = Coin {
        name: "raptoreum",
        ticker: "rtm",
        algorithm: "ghostrider",
        p2pkh_prefixes: &[60, 123],
        p2sh_prefixes: &[16, 19],
    };

    /// Bitcoin-style chains, mostly useful against a regtest node
    pub const BITCOIN: Coin = Coin {
        name: "bitcoin",
        ticker: "btc",
        algorithm: "sha256d",
        p2pkh_prefixes: &[0, 111],
        p2sh_prefixes: &[5, 196],
    };

    const ALL: &'static [Coin] = &[Coin::RAPTOREUM, Coin::BITCOIN];

    /// Look a coin up by name or ticker, case-insensitively
    pub fn from_name(name: &str) -> Result<Coin> {
        Self::ALL
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name) || c.ticker.eq_ignore_ascii_case(name))
            .copied()
            .ok_or_else(|| Error::config(format!("Unsupported coin: {}", name)))
    }

    /// Default algorithm tag for jobs of this coin
    pub fn default_algorithm(&self) -> Algorithm {
        Algorithm::new(self.algorithm)
    }

    /// Decode a base58check address into its locking script
    pub fn script_for_address(&self, address: &str) -> Result<ScriptBuf> {
        let payload = bitcoin::base58::decode_check(address)
            .map_err(|e| Error::address(format!("{}: {}", address, e)))?;

        if payload.len() != 21 {
            return Err(Error::address(format!(
                "{}: expected 21 byte payload, got {}",
                address,
                payload.len()
            )));
        }

        let version = payload[0];
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&payload[1..]);

        if self.p2pkh_prefixes.contains(&version) {
            Ok(ScriptBuf::new_p2pkh(&PubkeyHash::from_byte_array(hash)))
        } else if self.p2sh_prefixes.contains(&version) {
            Ok(ScriptBuf::new_p2sh(&ScriptHash::from_byte_array(hash)))
        } else {
            Err(Error::address(format!(
                "{}: version byte {} is not a {} address",
                address, version, self.name
            )))
        }
    }
}

impl fmt::Display for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Parsed `[coin/][devAddress:]miningAddress` argument
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiningAddress {
    pub coin: Option<String>,
    pub dev: Option<String>,
    pub mining: String,
}

impl FromStr for MiningAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (coin, rest) = match s.split_once('/') {
            Some((coin, rest)) => (Some(coin.to_string()), rest),
            None => (None, s),
        };

        let (dev, mining) = match rest.split_once(':') {
            Some((dev, mining)) => (Some(dev.to_string()), mining),
            None => (None, rest),
        };

        if mining.is_empty() {
            return Err(Error::config(format!("No mining address in {:?}", s)));
        }
        if matches!(&coin, Some(c) if c.is_empty()) || matches!(&dev, Some(d) if d.is_empty()) {
            return Err(Error::config(format!("Malformed address argument {:?}", s)));
        }

        Ok(Self {
            coin,
            dev,
            mining: mining.to_string(),
        })
    }
}

/// Locking scripts the coinbase can pay to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payee {
    pub coin: Coin,
    pub mining: ScriptBuf,
    /// Recipient on dev rounds; no dev rounds without it
    pub dev: Option<ScriptBuf>,
}

impl Payee {
    /// Resolve an address argument, falling back to `default_coin` when the
    /// argument carries no coin prefix
    pub fn resolve(address: &MiningAddress, default_coin: Coin) -> Result<Self> {
        let coin = match &address.coin {
            Some(name) => Coin::from_name(name)?,
            None => default_coin,
        };

        let mining = coin.script_for_address(&address.mining)?;
        let dev = address
            .dev
            .as_deref()
            .map(|dev| coin.script_for_address(dev))
            .transpose()?;

        Ok(Self { coin, mining, dev })
    }

    /// Script receiving the miner output for a job
    pub fn script(&self, dev_round: bool) -> &ScriptBuf {
        match (&self.dev, dev_round) {
            (Some(dev), true) => dev,
            _ => &self.mining,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RTM_ADDRESS: &str = "R9NXAVJezHiBnT3ijTpg3JUZre7PxhJWti";
    const RTM_DEV: &str = "RQqbQFkUjwn9wxnvV7sfkcBPrGdZSfmdWU";
    const RTM_P2SH: &str = "7Txtgp4EGu7Ug2mro1RFj1qhymjtZGGYoM";
    const BTC_ADDRESS: &str = "15fioDrrk36NmHdRCtGTu2TMj6rPXzG3sn";

    #[test]
    fn test_address_argument_forms() {
        let plain: MiningAddress = RTM_ADDRESS.parse().unwrap();
        assert_eq!(plain.coin, None);
        assert_eq!(plain.dev, None);
        assert_eq!(plain.mining, RTM_ADDRESS);

        let full: MiningAddress = format!("rtm/{}:{}", RTM_DEV, RTM_ADDRESS).parse().unwrap();
        assert_eq!(full.coin.as_deref(), Some("rtm"));
        assert_eq!(full.dev.as_deref(), Some(RTM_DEV));
        assert_eq!(full.mining, RTM_ADDRESS);

        let dev_only: MiningAddress = format!("{}:{}", RTM_DEV, RTM_ADDRESS).parse().unwrap();
        assert_eq!(dev_only.coin, None);
        assert_eq!(dev_only.dev.as_deref(), Some(RTM_DEV));

        assert!("rtm/".parse::<MiningAddress>().is_err());
        assert!(format!("/{}", RTM_ADDRESS).parse::<MiningAddress>().is_err());
        assert!(format!(":{}", RTM_ADDRESS).parse::<MiningAddress>().is_err());
    }

    #[test]
    fn test_p2pkh_script() {
        let script = Coin::RAPTOREUM.script_for_address(RTM_ADDRESS).unwrap();
        let mut expected = vec![0x76, 0xa9, 0x14];
        expected.extend(1u8..=20);
        expected.extend([0x88, 0xac]);
        assert_eq!(script.as_bytes(), expected.as_slice());
    }

    #[test]
    fn test_p2sh_script() {
        let script = Coin::RAPTOREUM.script_for_address(RTM_P2SH).unwrap();
        assert_eq!(script.as_bytes()[0], 0xa9);
        assert_eq!(script.as_bytes()[22], 0x87);
    }

    #[test]
    fn test_wrong_network_rejected() {
        let err = Coin::RAPTOREUM.script_for_address(BTC_ADDRESS).unwrap_err();
        assert_eq!(err.category(), "address");
        assert!(Coin::BITCOIN.script_for_address(BTC_ADDRESS).is_ok());
        assert!(Coin::RAPTOREUM.script_for_address("not-an-address").is_err());
    }

    #[test]
    fn test_payee_resolution() {
        let address: MiningAddress = format!("{}:{}", RTM_DEV, RTM_ADDRESS).parse().unwrap();
        let payee = Payee::resolve(&address, Coin::RAPTOREUM).unwrap();
        assert_ne!(payee.script(true), payee.script(false));
        assert_eq!(payee.script(false), &payee.mining);

        let no_dev: MiningAddress = RTM_ADDRESS.parse().unwrap();
        let payee = Payee::resolve(&no_dev, Coin::RAPTOREUM).unwrap();
        assert_eq!(payee.script(true), &payee.mining);

        let btc: MiningAddress = format!("btc/{}", BTC_ADDRESS).parse().unwrap();
        assert_eq!(Payee::resolve(&btc, Coin::RAPTOREUM).unwrap().coin, Coin::BITCOIN);

        let unknown: MiningAddress = format!("doge/{}", RTM_ADDRESS).parse().unwrap();
        assert!(Payee::resolve(&unknown, Coin::RAPTOREUM).is_err());
    }
}
