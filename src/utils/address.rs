//! TRON address handling.
//!
//! Wallet addresses reach the backend in two shapes: base58check strings
//! (`T...`) from the browser, and 20-byte hex from contract event payloads
//! (`0x...` or `41...`). Everything is stored and compared in base58check.

use crate::utils::error::{NoticeError, Result};
use sha2::{Digest, Sha256};

const ALPHABET: &[u8; 58] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Mainnet address prefix byte.
pub const ADDRESS_PREFIX: u8 = 0x41;

fn checksum(payload: &[u8]) -> [u8; 4] {
    let first = Sha256::digest(payload);
    let second = Sha256::digest(first);
    [second[0], second[1], second[2], second[3]]
}

fn base58_encode(input: &[u8]) -> String {
    let zeros = input.iter().take_while(|&&b| b == 0).count();
    let mut digits: Vec<u8> = Vec::with_capacity(input.len() * 138 / 100 + 1);

    for &byte in input {
        let mut carry = byte as u32;
        for digit in digits.iter_mut() {
            carry += (*digit as u32) << 8;
            *digit = (carry % 58) as u8;
            carry /= 58;
        }
        while carry > 0 {
            digits.push((carry % 58) as u8);
            carry /= 58;
        }
    }

    let mut out = String::with_capacity(zeros + digits.len());
    out.extend(std::iter::repeat('1').take(zeros));
    out.extend(digits.iter().rev().map(|&d| ALPHABET[d as usize] as char));
    out
}

fn base58_decode(input: &str) -> Option<Vec<u8>> {
    let zeros = input.bytes().take_while(|&b| b == b'1').count();
    let mut bytes: Vec<u8> = Vec::with_capacity(input.len());

    for c in input.bytes() {
        let mut carry = ALPHABET.iter().position(|&a| a == c)? as u32;
        for byte in bytes.iter_mut() {
            carry += (*byte as u32) * 58;
            *byte = (carry & 0xff) as u8;
            carry >>= 8;
        }
        while carry > 0 {
            bytes.push((carry & 0xff) as u8);
            carry >>= 8;
        }
    }

    let mut out = vec![0u8; zeros];
    out.extend(bytes.iter().rev());
    Some(out)
}

fn invalid(value: &str, reason: &str) -> NoticeError {
    NoticeError::ValidationError {
        field: "address".to_string(),
        message: format!("{} ({})", reason, value),
    }
}

/// Decodes a base58check address into its 21-byte payload.
pub fn decode_base58(address: &str) -> Result<[u8; 21]> {
    let raw = base58_decode(address).ok_or_else(|| invalid(address, "not base58"))?;
    if raw.len() != 25 {
        return Err(invalid(address, "wrong decoded length"));
    }
    let (payload, check) = raw.split_at(21);
    if checksum(payload) != check {
        return Err(invalid(address, "checksum mismatch"));
    }
    if payload[0] != ADDRESS_PREFIX {
        return Err(invalid(address, "not a TRON mainnet address"));
    }
    let mut out = [0u8; 21];
    out.copy_from_slice(payload);
    Ok(out)
}

pub fn encode_base58(payload: &[u8; 21]) -> String {
    let mut buf = Vec::with_capacity(25);
    buf.extend_from_slice(payload);
    buf.extend_from_slice(&checksum(payload));
    base58_encode(&buf)
}

/// Converts a hex address (`0x` + 40 hex, or `41` + 40 hex) to base58check.
pub fn hex_to_base58(hex_address: &str) -> Result<String> {
    let trimmed = hex_address.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    let bytes = hex::decode(body).map_err(|_| invalid(hex_address, "not hex"))?;
    let payload: Vec<u8> = match bytes.len() {
        20 => std::iter::once(ADDRESS_PREFIX).chain(bytes).collect(),
        21 if bytes[0] == ADDRESS_PREFIX => bytes,
        _ => return Err(invalid(hex_address, "expected 20 or 21 bytes")),
    };

    let mut out = [0u8; 21];
    out.copy_from_slice(&payload);
    Ok(encode_base58(&out))
}

pub fn base58_to_hex(address: &str) -> Result<String> {
    decode_base58(address).map(hex::encode)
}

/// Accepts either shape and returns the canonical base58check form.
pub fn normalize_address(address: &str) -> Result<String> {
    let trimmed = address.trim();
    if trimmed.starts_with('T') && trimmed.len() == 34 {
        decode_base58(trimmed)?;
        return Ok(trimmed.to_string());
    }
    hex_to_base58(trimmed)
}

pub fn is_valid_address(address: &str) -> bool {
    address.len() == 34 && decode_base58(address).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const USDT_BASE58: &str = "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t";
    const USDT_HEX: &str = "41a614f803b6fd780986a42c78ec9c7f77e6ded13c";

    #[test]
    fn test_hex_to_base58_known_contract() {
        assert_eq!(hex_to_base58(USDT_HEX).unwrap(), USDT_BASE58);
        assert_eq!(
            hex_to_base58("0xa614f803b6fd780986a42c78ec9c7f77e6ded13c").unwrap(),
            USDT_BASE58
        );
    }

    #[test]
    fn test_base58_to_hex_known_contract() {
        assert_eq!(base58_to_hex(USDT_BASE58).unwrap(), USDT_HEX);
    }

    #[test]
    fn test_zero_address() {
        let zero = format!("41{}", "0".repeat(40));
        assert_eq!(
            hex_to_base58(&zero).unwrap(),
            "T9yD14Nj9j7xAB4dbGeiX9h8unkKHxuWwb"
        );
    }

    #[test]
    fn test_checksum_rejected() {
        // last character altered
        assert!(decode_base58("TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6u").is_err());
        assert!(!is_valid_address("TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6u"));
        assert!(!is_valid_address("not-an-address"));
    }

    #[test]
    fn test_normalize_accepts_both_shapes() {
        assert_eq!(normalize_address(USDT_BASE58).unwrap(), USDT_BASE58);
        assert_eq!(normalize_address(&format!(" {} ", USDT_HEX)).unwrap(), USDT_BASE58);
        assert!(normalize_address("0x1234").is_err());
    }
}
