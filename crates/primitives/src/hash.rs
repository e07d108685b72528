use ripemd::{Digest as RipemdDigest, Ripemd160};
use sha2::Sha256;

pub type Hash256 = [u8; 32];
pub type Hash160 = [u8; 20];

pub const NULL_HASH: Hash256 = [0u8; 32];

pub fn sha256(data: &[u8]) -> Hash256 {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(data));
    out
}

pub fn sha256d(data: &[u8]) -> Hash256 {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(Sha256::digest(data)));
    out
}

pub fn ripemd160(data: &[u8]) -> Hash160 {
    let mut out = [0u8; 20];
    out.copy_from_slice(&Ripemd160::digest(data));
    out
}

pub fn hash160(data: &[u8]) -> Hash160 {
    ripemd160(&sha256(data))
}

/// Renders a hash in the byte-reversed order block explorers print.
pub fn hash_to_hex(hash: &Hash256) -> String {
    let mut out = String::with_capacity(64);
    for byte in hash.iter().rev() {
        out.push(nibble(byte >> 4));
        out.push(nibble(byte & 0x0f));
    }
    out
}

/// Inverse of [`hash_to_hex`].
pub fn hash_from_hex(hex: &str) -> Option<Hash256> {
    let bytes = hex.as_bytes();
    if bytes.len() != 64 {
        return None;
    }
    let mut out = [0u8; 32];
    for (idx, pair) in bytes.chunks_exact(2).enumerate() {
        let hi = unhex(pair[0])?;
        let lo = unhex(pair[1])?;
        out[31 - idx] = (hi << 4) | lo;
    }
    Some(out)
}

fn nibble(value: u8) -> char {
    match value {
        0..=9 => (b'0' + value) as char,
        _ => (b'a' + (value - 10)) as char,
    }
}

fn unhex(ch: u8) -> Option<u8> {
    match ch {
        b'0'..=b'9' => Some(ch - b'0'),
        b'a'..=b'f' => Some(ch - b'a' + 10),
        b'A'..=b'F' => Some(ch - b'A' + 10),
        _ => None,
    }
}
