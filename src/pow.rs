//! Independent proof-of-work recomputation for scrypt chains.
//!
//! The node's claim that a block is valid is not consulted: the 80-byte
//! header is rebuilt from the fields the node reports and hashed with
//! scrypt(N=1024, r=1, p=1), header as both password and salt.

use crate::error::{ReorgError, Result};
use serde::{Deserialize, Serialize};

/// log2(N) for the chain's scrypt parameters.
const SCRYPT_LOG_N: u8 = 10;
const SCRYPT_R: u32 = 1;
const SCRYPT_P: u32 = 1;
const SCRYPT_OUTPUT_LEN: usize = 32;

pub const HEADER_LEN: usize = 80;

/// Block header fields in the node's big-endian display form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderFields {
    pub version: u32,
    /// `None` for the genesis block.
    pub previous_block_hash: Option<String>,
    pub merkle_root: String,
    pub time: u32,
    /// Compact target, 8 hex characters.
    pub bits: String,
    pub nonce: u32,
}

/// Reverse the byte order of a hex string by swapping 2-character groups end to end.
///
/// Odd-length or non-hex input is rejected.
pub fn reverse_hex(hex_str: &str) -> Result<String> {
    if hex_str.len() % 2 != 0 {
        return Err(ReorgError::Validation(format!(
            "Hex string has odd length {}",
            hex_str.len()
        )));
    }
    if !hex_str.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ReorgError::Validation(format!(
            "Not a hex string: {}",
            hex_str
        )));
    }

    let bytes = hex_str.as_bytes();
    let mut reversed = String::with_capacity(hex_str.len());
    for pair in bytes.chunks(2).rev() {
        reversed.push(pair[0] as char);
        reversed.push(pair[1] as char);
    }
    Ok(reversed)
}

fn fixed_hex(field: &str, value: &str, len: usize) -> Result<String> {
    if value.len() != len {
        return Err(ReorgError::Validation(format!(
            "{} must be {} hex characters, got {}",
            field,
            len,
            value.len()
        )));
    }
    reverse_hex(value)
}

/// Canonical 80-byte little-endian header serialization.
pub fn serialize_header(header: &HeaderFields) -> Result<[u8; HEADER_LEN]> {
    let zero_hash = "0".repeat(64);
    let previous = header.previous_block_hash.as_deref().unwrap_or(&zero_hash);

    let mut wire = String::with_capacity(HEADER_LEN * 2);
    wire.push_str(&reverse_hex(&format!("{:08x}", header.version))?);
    wire.push_str(&fixed_hex("previous block hash", previous, 64)?);
    wire.push_str(&fixed_hex("merkle root", &header.merkle_root, 64)?);
    wire.push_str(&reverse_hex(&format!("{:08x}", header.time))?);
    wire.push_str(&fixed_hex("bits", &header.bits, 8)?);
    wire.push_str(&reverse_hex(&format!("{:08x}", header.nonce))?);

    let mut out = [0u8; HEADER_LEN];
    hex::decode_to_slice(&wire, &mut out)
        .map_err(|e| ReorgError::Validation(format!("Header encoding failed: {}", e)))?;
    Ok(out)
}

/// Raw scrypt digest of a serialized header, in hash byte order.
pub fn scrypt_digest(header: &[u8; HEADER_LEN]) -> Result<[u8; SCRYPT_OUTPUT_LEN]> {
    let params = scrypt::Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, SCRYPT_OUTPUT_LEN)
        .map_err(|e| ReorgError::Validation(format!("Invalid scrypt parameters: {}", e)))?;

    let mut digest = [0u8; SCRYPT_OUTPUT_LEN];
    scrypt::scrypt(header, header, &params, &mut digest)
        .map_err(|e| ReorgError::Validation(format!("Scrypt derivation failed: {}", e)))?;
    Ok(digest)
}

/// Proof-of-work hash in display order (byte-reversed, hex encoded).
pub fn scrypt_hash(header: &HeaderFields) -> Result<String> {
    let mut digest = scrypt_digest(&serialize_header(header)?)?;
    digest.reverse();
    Ok(hex::encode(digest))
}

/// log2 of a node-reported cumulative chainwork hex value.
///
/// Only the leading 52 bits are kept, which is all an `f64` can carry.
/// Zero work maps to 0.0.
pub fn chainwork_log2(chainwork_hex: &str) -> Result<f64> {
    let digits = chainwork_hex.trim_start_matches("0x");
    if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ReorgError::Validation(format!(
            "Chainwork is not hex: {}",
            chainwork_hex
        )));
    }

    let significant = digits.trim_start_matches('0');
    if significant.is_empty() {
        return Ok(0.0);
    }

    let head_len = significant.len().min(13);
    let head = u64::from_str_radix(&significant[..head_len], 16)
        .map_err(|e| ReorgError::Validation(format!("Chainwork parse failed: {}", e)))?;
    let tail_nibbles = (significant.len() - head_len) as f64;

    Ok((head as f64).log2() + 4.0 * tail_nibbles)
}

/// Expand a compact `bits` value into a 32-byte big-endian target.
pub fn target_from_bits(bits: &str) -> Result<[u8; 32]> {
    let compact = u32::from_str_radix(bits, 16)
        .map_err(|e| ReorgError::Validation(format!("Invalid bits '{}': {}", bits, e)))?;
    let exponent = (compact >> 24) as usize;
    let mantissa = compact & 0x007f_ffff;

    if compact & 0x0080_0000 != 0 {
        return Err(ReorgError::Validation(format!("Negative target in bits {}", bits)));
    }
    if exponent > 32 {
        return Err(ReorgError::Validation(format!("Target overflow in bits {}", bits)));
    }

    let mut target = [0u8; 32];
    if exponent <= 3 {
        let value = mantissa >> (8 * (3 - exponent));
        target[29..].copy_from_slice(&value.to_be_bytes()[1..]);
    } else {
        let start = 32 - exponent;
        let mantissa_bytes = &mantissa.to_be_bytes()[1..];
        for (i, byte) in mantissa_bytes.iter().enumerate() {
            if start + i < 32 {
                target[start + i] = *byte;
            }
        }
    }
    Ok(target)
}

/// True when a display-order hash is at or below the target encoded by `bits`.
pub fn meets_target(hash_hex: &str, bits: &str) -> Result<bool> {
    let mut hash = [0u8; 32];
    hex::decode_to_slice(hash_hex, &mut hash)
        .map_err(|e| ReorgError::Validation(format!("Invalid hash '{}': {}", hash_hex, e)))?;
    Ok(hash <= target_from_bits(bits)?)
}
