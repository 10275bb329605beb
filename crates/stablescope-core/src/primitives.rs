// Stablescope — Ethereum Primitives
// Hex, keccak, address and fixed-point amount conversion utilities.

use crate::atoms::error::{EngineError, EngineResult};

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    use tiny_keccak::{Hasher, Keccak};
    let mut digest = [0u8; 32];
    let mut keccak = Keccak::v256();
    keccak.update(data);
    keccak.finalize(&mut digest);
    digest
}

fn lower_hex(data: &[u8]) -> String {
    use std::fmt::Write;
    data.iter().fold(String::with_capacity(data.len() * 2), |mut out, b| {
        let _ = write!(out, "{:02x}", b);
        out
    })
}

pub fn hex_encode(data: &[u8]) -> String {
    format!("0x{}", lower_hex(data))
}

fn nibble(c: u8) -> Option<u8> {
    (c as char).to_digit(16).map(|d| d as u8)
}

/// Decode hex with or without `0x`. RPC quantities are minimally encoded
/// ("0x0", "0x1a3"), so an odd digit count gets an implied leading zero.
pub fn hex_decode(s: &str) -> EngineResult<Vec<u8>> {
    let digits = s.strip_prefix("0x").unwrap_or(s).as_bytes();
    if digits.is_empty() {
        return Ok(vec![0]);
    }
    let (head, rest) = digits.split_at(digits.len() % 2);
    let bad = |c: u8| EngineError::decode("hex", format!("invalid digit '{}' in '{}'", c as char, s));
    let mut out = Vec::with_capacity(digits.len() / 2 + 1);
    if let Some(&c) = head.first() {
        out.push(nibble(c).ok_or_else(|| bad(c))?);
    }
    for pair in rest.chunks_exact(2) {
        let hi = nibble(pair[0]).ok_or_else(|| bad(pair[0]))?;
        let lo = nibble(pair[1]).ok_or_else(|| bad(pair[1]))?;
        out.push((hi << 4) | lo);
    }
    Ok(out)
}

/// Parse an RPC quantity ("0x1b4") into a u64.
pub fn parse_hex_u64(s: &str) -> EngineResult<u64> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    if digits.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(digits, 16).map_err(|e| EngineError::decode("quantity", format!("'{}': {}", s, e)))
}

/// Parse a hex quantity or a 32-byte ABI word into a u128.
/// Leading zero bytes are accepted; anything wider than 128 bits is rejected.
pub fn parse_hex_u128(s: &str) -> EngineResult<u128> {
    let bytes = hex_decode(s)?;
    let significant: Vec<u8> = bytes.iter().copied().skip_while(|&b| b == 0).collect();
    if significant.len() > 16 {
        return Err(EngineError::decode("quantity", format!("'{}' overflows 128 bits", s)));
    }
    Ok(significant.iter().fold(0u128, |acc, &b| (acc << 8) | b as u128))
}

/// EIP-55 mixed-case rendering: a letter is uppercased when the matching
/// nibble of keccak(lowercase hex) is 8 or more.
pub fn eip55_checksum(addr_bytes: &[u8]) -> String {
    let lower = lower_hex(addr_bytes);
    let hash = keccak256(lower.as_bytes());
    let cased: String = lower
        .char_indices()
        .map(|(i, c)| {
            let shift = if i % 2 == 0 { 4 } else { 0 };
            if ((hash[i / 2] >> shift) & 0x0f) >= 8 { c.to_ascii_uppercase() } else { c }
        })
        .collect();
    format!("0x{}", cased)
}

pub fn parse_address(addr: &str) -> EngineResult<[u8; 20]> {
    let trimmed = addr.trim();
    let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    if digits.len() != 40 {
        return Err(EngineError::Validation(format!("Invalid address: expected 40 hex digits, got {}", digits.len())));
    }
    hex_decode(digits)
        .ok()
        .and_then(|bytes| <[u8; 20]>::try_from(bytes).ok())
        .ok_or_else(|| EngineError::Validation(format!("Invalid address: '{}'", trimmed)))
}

/// An address is valid when it is 0x + 40 hex digits and, if mixed-case,
/// its casing matches the EIP-55 checksum.
pub fn is_valid_address(addr: &str) -> bool {
    let Some(digits) = addr.strip_prefix("0x") else { return false };
    let Ok(bytes) = parse_address(addr) else { return false };
    let all_lower = digits.chars().all(|c| !c.is_ascii_uppercase());
    let all_upper = digits.chars().all(|c| !c.is_ascii_lowercase());
    all_lower || all_upper || eip55_checksum(&bytes) == addr
}

/// Lowercase 0x address, the form used as the warehouse join key.
pub fn normalize_address(addr: &str) -> EngineResult<String> {
    if !is_valid_address(addr.trim()) {
        return Err(EngineError::Validation(format!("Invalid Ethereum address: '{}'", addr)));
    }
    Ok(addr.trim().to_ascii_lowercase())
}

/// Extract the address held in the low 20 bytes of an indexed log topic.
pub fn topic_to_address(topic: &str) -> EngineResult<String> {
    let digits = topic.strip_prefix("0x").unwrap_or(topic);
    if digits.len() != 64 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(EngineError::decode("topic", format!("not a 32-byte word: '{}'", topic)));
    }
    Ok(format!("0x{}", digits[24..].to_ascii_lowercase()))
}

// ── Fixed-point amounts ────────────────────────────────────────────────────

/// Big-endian bytes to a decimal digit string, without width limits.
/// Digits are kept little-endian while accumulating: digits = digits * 256 + byte.
fn bytes_to_decimal(raw_bytes: &[u8]) -> String {
    let mut digits_le: Vec<u32> = vec![0];
    for &byte in raw_bytes {
        let mut carry = u32::from(byte);
        for d in digits_le.iter_mut() {
            let acc = *d * 256 + carry;
            *d = acc % 10;
            carry = acc / 10;
        }
        while carry > 0 {
            digits_le.push(carry % 10);
            carry /= 10;
        }
    }
    while digits_le.len() > 1 && digits_le.last() == Some(&0) {
        digits_le.pop();
    }
    digits_le.iter().rev().filter_map(|&d| char::from_digit(d, 10)).collect()
}

/// Render a decimal digit string of minor units with exactly `decimals`
/// fractional digits ("1500000", 6 → "1.500000").
pub fn format_decimal_digits(digits: &str, decimals: u8) -> String {
    let digits = digits.trim_start_matches('0');
    let digits = if digits.is_empty() { "0" } else { digits };
    let scale = usize::from(decimals);
    if scale == 0 {
        return digits.to_string();
    }
    let padded = format!("{:0>width$}", digits, width = scale + 1);
    let (whole, fraction) = padded.split_at(padded.len() - scale);
    format!("{}.{}", whole, fraction)
}

/// Decode a hex-encoded uint (e.g. Transfer log data) into a fixed-point string.
/// Every fractional digit is kept so the rendering is exact.
pub fn format_units(raw_hex: &str, decimals: u8) -> EngineResult<String> {
    Ok(format_decimal_digits(&bytes_to_decimal(&hex_decode(raw_hex)?), decimals))
}

/// Decode a hex-encoded uint into its decimal digits (minor units).
pub fn hex_to_decimal(raw_hex: &str) -> EngineResult<String> {
    Ok(bytes_to_decimal(&hex_decode(raw_hex)?))
}

/// Minor units to whole tokens as a float, for aggregate presentation only.
pub fn minor_to_tokens(minor: f64, decimals: u8) -> f64 {
    minor / 10f64.powi(decimals as i32)
}

/// Round to two decimals (presentation boundary).
pub fn round2(value: f64) -> f64 {
    round_to(value, 2)
}

pub fn round_to(value: f64, places: i32) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Wei to a gwei string with up to 9 fractional digits, trailing zeros trimmed.
pub fn wei_to_gwei(wei: u128) -> String {
    let full = format_decimal_digits(&wei.to_string(), 9);
    let trimmed = full.trim_end_matches('0').trim_end_matches('.');
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keccak_transfer_topic() {
        let hash = keccak256(b"Transfer(address,address,uint256)");
        assert_eq!(hex_encode(&hash), crate::atoms::constants::TRANSFER_TOPIC);
    }

    #[test]
    fn hex_decode_odd_length() {
        assert_eq!(hex_decode("0x1a3").unwrap(), vec![0x01, 0xa3]);
        assert_eq!(hex_decode("0x").unwrap(), vec![0]);
        assert!(hex_decode("0xzz").is_err());
    }

    #[test]
    fn parse_quantities() {
        assert_eq!(parse_hex_u64("0x10").unwrap(), 16);
        assert_eq!(parse_hex_u64("0x0").unwrap(), 0);
        let word = format!("0x{}{}", "0".repeat(56), "000f4240");
        assert_eq!(parse_hex_u128(&word).unwrap(), 1_000_000);
        let too_wide = format!("0x01{}", "0".repeat(62));
        assert!(parse_hex_u128(&too_wide).is_err());
    }

    #[test]
    fn checksum_and_validation() {
        let addr = crate::atoms::constants::DEFAULT_TOKEN_ADDRESS;
        let bytes = parse_address(addr).unwrap();
        assert_eq!(eip55_checksum(&bytes), addr);
        assert!(is_valid_address(addr));
        assert!(is_valid_address(&addr.to_ascii_lowercase()));
        // Wrong casing on a mixed-case address fails the checksum.
        assert!(!is_valid_address("0x6C3ea9036406852006290770BEdFcAbA0e23A0e8"));
        assert!(!is_valid_address("0x1234"));
        assert!(!is_valid_address("6c3ea9036406852006290770bedfcaba0e23a0e8"));
        assert!(!is_valid_address("0xgc3ea9036406852006290770bedfcaba0e23a0e8"));
    }

    #[test]
    fn topic_address_extraction() {
        let topic = format!("0x{}{}", "0".repeat(24), "AbCdEf0000000000000000000000000000000001");
        assert_eq!(topic_to_address(&topic).unwrap(), "0xabcdef0000000000000000000000000000000001");
        assert!(topic_to_address("0x1234").is_err());
    }

    #[test]
    fn units_keep_six_fraction_digits() {
        assert_eq!(format_units("0x16e360", 6).unwrap(), "1.500000");
        assert_eq!(format_units("0x0", 6).unwrap(), "0.000000");
        assert_eq!(format_units("0x01", 6).unwrap(), "0.000001");
        assert_eq!(hex_to_decimal("0x16e360").unwrap(), "1500000");
        assert_eq!(hex_to_decimal("0x0000").unwrap(), "0");
        assert_eq!(hex_to_decimal(&format!("0x{}", "f".repeat(32))).unwrap(), u128::MAX.to_string());
        assert_eq!(format_decimal_digits("123456789012345678901234567890", 6), "123456789012345678901234.567890");
        assert_eq!(format_decimal_digits("42", 0), "42");
    }

    #[test]
    fn rounding_and_gwei() {
        assert_eq!(round2(1.005_1), 1.01);
        assert_eq!(round2(f64::NAN), 0.0);
        assert_eq!(round_to(12.345, 1), 12.3);
        assert_eq!(wei_to_gwei(1_500_000_000), "1.5");
        assert_eq!(wei_to_gwei(30_000_000_000), "30");
        assert_eq!(minor_to_tokens(2_500_000.0, 6), 2.5);
    }
}
