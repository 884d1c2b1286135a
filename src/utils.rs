//! Utility functions and helpers
//!
//! Common utilities used throughout the mining client.

use crate::{Error, Result};
use std::time::Duration;

/// Base units per coin
pub const COIN: u64 = 100_000_000;

/// Format an amount in base units as a decimal coin value
pub fn format_amount(amount: u64) -> String {
    format!("{}.{:08}", amount / COIN, amount % COIN)
}

/// Format duration as a human-readable string
pub fn format_duration(duration: Duration) -> String {
    let seconds = duration.as_secs();
    if seconds == 0 {
        format!("{}ms", duration.as_millis())
    } else if seconds < 60 {
        format!("{}.{:03}s", seconds, duration.subsec_millis())
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        let hours = seconds / 3600;
        let minutes = (seconds % 3600) / 60;
        format!("{}h {}m {}s", hours, minutes, seconds % 60)
    }
}

/// Decode a hex field of a block template
pub fn decode_hex(field: &str, s: &str) -> Result<Vec<u8>> {
    hex::decode(s).map_err(|e| Error::template(format!("invalid {}: {}", field, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(0), "0.00000000");
        assert_eq!(format_amount(1), "0.00000001");
        assert_eq!(format_amount(5_000_000_000), "50.00000000");
        assert_eq!(format_amount(123_456_789), "1.23456789");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(42)), "42ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.500s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1h 1m 1s");
    }

    #[test]
    fn test_decode_hex() {
        assert_eq!(decode_hex("data", "deadbeef").unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);

        let err = decode_hex("coinbase_payload", "0g").unwrap_err();
        assert_eq!(err.category(), "template");
        assert!(err.to_string().contains("invalid coinbase_payload"));
    }
}
