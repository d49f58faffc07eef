// Steptrace - EVM Execution Trace Reconstruction
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Fixed-width hex and byte helpers
//!
//! Trace producers do not agree on a single hex dialect: stack words may be
//! `0x`-prefixed minimal quantities (`"0x1"`) or unprefixed 64-character words,
//! and memory words usually come without a prefix. Everything in this module
//! accepts both and normalizes to the lowercase `0x`-prefixed form.

use alloy_primitives::{hex, Address, B256, U256};
use thiserror::Error;

/// Size of an EVM word in bytes
pub const WORD_SIZE: usize = 32;

/// Size of an address in bytes
pub const ADDRESS_SIZE: usize = 20;

/// Largest memory region the engine will materialize from a single read (64 MiB)
pub const MAX_MEMORY_READ: usize = 1 << 26;

/// Errors raised while decoding hex words, stack slots and memory regions
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ByteError {
    /// The input was not valid hexadecimal
    #[error("invalid hex `{input}`: {reason}")]
    InvalidHex {
        /// Offending input
        input: String,
        /// Decoder message
        reason: String,
    },
    /// A value is wider than the fixed width it must fit into
    #[error("value of {len} bytes does not fit in {width} bytes")]
    TooWide {
        /// Actual length in bytes
        len: usize,
        /// Target width in bytes
        width: usize,
    },
    /// A 256-bit word does not fit into a machine integer
    #[error("integer {value} does not fit in {target}")]
    IntegerOverflow {
        /// The word that was converted
        value: U256,
        /// Target integer type
        target: &'static str,
    },
    /// A stack peek went below the bottom of the recorded stack
    #[error("stack underflow: requested word {index} from top, stack holds {len}")]
    StackUnderflow {
        /// Position requested, counted from the top (0 = top)
        index: usize,
        /// Number of words on the stack
        len: usize,
    },
    /// A memory read is larger than the engine is willing to materialize
    #[error("memory range out of bounds: offset {offset}, length {len}")]
    MemoryRange {
        /// Start offset of the read
        offset: U256,
        /// Length of the read
        len: U256,
    },
}

/// Strip an optional `0x`/`0X` prefix.
pub fn strip_hex_prefix(input: &str) -> &str {
    input.strip_prefix("0x").or_else(|| input.strip_prefix("0X")).unwrap_or(input)
}

/// Normalize a hex string to lowercase, `0x`-prefixed, even length.
///
/// The empty string (with or without prefix) normalizes to `"0x"`.
pub fn normalize_hex(input: &str) -> String {
    let digits = strip_hex_prefix(input.trim()).to_ascii_lowercase();
    if digits.len() % 2 == 1 {
        format!("0x0{digits}")
    } else {
        format!("0x{digits}")
    }
}

/// Decode a hex string into bytes, tolerating a missing prefix and odd length.
pub fn decode_hex(input: &str) -> Result<Vec<u8>, ByteError> {
    let digits = strip_hex_prefix(input.trim());
    let decoded = if digits.len() % 2 == 1 {
        hex::decode(format!("0{digits}"))
    } else {
        hex::decode(digits)
    };
    decoded.map_err(|e| ByteError::InvalidHex { input: input.to_string(), reason: e.to_string() })
}

/// Left-pad `bytes` with zeros to exactly `width` bytes.
pub fn pad_left(bytes: &[u8], width: usize) -> Result<Vec<u8>, ByteError> {
    if bytes.len() > width {
        return Err(ByteError::TooWide { len: bytes.len(), width });
    }
    let mut out = vec![0u8; width - bytes.len()];
    out.extend_from_slice(bytes);
    Ok(out)
}

/// Right-pad `bytes` with zeros to exactly `width` bytes.
pub fn pad_right(bytes: &[u8], width: usize) -> Result<Vec<u8>, ByteError> {
    if bytes.len() > width {
        return Err(ByteError::TooWide { len: bytes.len(), width });
    }
    let mut out = bytes.to_vec();
    out.resize(width, 0);
    Ok(out)
}

/// Copy `len` bytes starting at `offset`, zero-filling whatever lies past the end
/// of `bytes`. This matches how EVM memory reads behave on untouched memory.
pub fn slice_padded(bytes: &[u8], offset: usize, len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    if offset < bytes.len() {
        let available = (bytes.len() - offset).min(len);
        out[..available].copy_from_slice(&bytes[offset..offset + available]);
    }
    out
}

/// Decode a hex quantity or word into a 256-bit integer.
pub fn u256_from_hex(input: &str) -> Result<U256, ByteError> {
    let bytes = decode_hex(input)?;
    let padded = pad_left(&bytes, WORD_SIZE)?;
    Ok(U256::from_be_slice(&padded))
}

/// Decode a hex quantity or word into a left-padded 32-byte word.
pub fn word_from_hex(input: &str) -> Result<B256, ByteError> {
    let bytes = decode_hex(input)?;
    Ok(B256::from_slice(&pad_left(&bytes, WORD_SIZE)?))
}

/// Convert a 32-byte word into a 256-bit integer.
pub fn word_to_u256(word: &B256) -> U256 {
    U256::from_be_bytes(word.0)
}

/// Convert a 256-bit integer into a 32-byte big-endian word.
pub fn u256_to_word(value: U256) -> B256 {
    B256::from(value.to_be_bytes::<WORD_SIZE>())
}

/// Convert a word to `u64`, failing if it does not fit.
pub fn to_u64(value: U256) -> Result<u64, ByteError> {
    u64::try_from(value).map_err(|_| ByteError::IntegerOverflow { value, target: "u64" })
}

/// Convert a word to `usize`, failing if it does not fit.
pub fn to_usize(value: U256) -> Result<usize, ByteError> {
    usize::try_from(value).map_err(|_| ByteError::IntegerOverflow { value, target: "usize" })
}

/// Take the low 20 bytes of a stack word as an address.
pub fn address_from_word(value: U256) -> Address {
    Address::from_word(u256_to_word(value))
}

/// Take the low 20 bytes of an arbitrary byte string as an address.
///
/// Shorter inputs are left-padded, so `0x01` becomes the address `0x00..01`.
pub fn address_from_bytes(bytes: &[u8]) -> Address {
    if bytes.len() >= ADDRESS_SIZE {
        Address::from_slice(&bytes[bytes.len() - ADDRESS_SIZE..])
    } else {
        let mut raw = [0u8; ADDRESS_SIZE];
        raw[ADDRESS_SIZE - bytes.len()..].copy_from_slice(bytes);
        Address::from(raw)
    }
}

/// Compare two hex strings by value, ignoring prefix, case and leading zeros.
pub fn hex_eq(a: &str, b: &str) -> bool {
    let a = strip_hex_prefix(a.trim()).trim_start_matches('0');
    let b = strip_hex_prefix(b.trim()).trim_start_matches('0');
    a.eq_ignore_ascii_case(b)
}
