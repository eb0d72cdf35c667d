//! Bleichenbacher's adaptive chosen-ciphertext attack against RSA with
//! PKCS#1 v1.5 encryption padding.
//!
//! The attack only ever sees a public key, a ciphertext, and a
//! [`PaddingOracle`] that answers whether a ciphertext decrypts to a
//! conforming `00 02 ...` block.

use num_bigint::BigUint;

pub mod attack;
pub mod error;
pub mod intervals;
pub mod math;
pub mod oracles;
pub mod padding;
pub mod rsa;

pub use attack::{AttackOutcome, Bleichenbacher};
pub use error::{Error, Result};
pub use intervals::{Interval, IntervalSet};
pub use oracles::{Conformance, HttpOracle, OracleServer, PaddingOracle, Pkcs1Oracle};
pub use padding::Padding;
pub use rsa::{gen_rsa, PrivateKey, PublicKey, RsaKey};

pub fn bytes_to_int(bytes: &[u8]) -> BigUint {
    BigUint::from_bytes_be(bytes)
}

/// Minimal big-endian encoding. Zero encodes as an empty string.
pub fn int_to_bytes(value: &BigUint) -> Vec<u8> {
    if value.bits() == 0 {
        return vec![];
    }
    value.to_bytes_be()
}

/// Big-endian encoding left-padded with zero bytes to exactly `len` bytes.
pub fn int_to_bytes_padded(value: &BigUint, len: usize) -> Result<Vec<u8>> {
    let bytes = int_to_bytes(value);
    if bytes.len() > len {
        return Err(Error::InvalidPaddingLength {
            actual: bytes.len(),
            expected: len,
        });
    }
    let mut result = vec![0u8; len - bytes.len()];
    result.extend_from_slice(&bytes);
    Ok(result)
}
