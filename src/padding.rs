use rand::seq::index;
use rand::Rng;
use rand_core::OsRng;

use crate::error::{Error, Result};

/// Fixed overhead of an encryption block: `00 02`, eight padding bytes, `00`.
pub const PKCS1_OVERHEAD: usize = 11;

/// PKCS#1 v1.5 encryption padding (block type 2) for a `total_bytes` block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Padding {
    total_bytes: usize,
}

impl Padding {
    pub fn pkcs1_encryption(total_bytes: usize) -> Self {
        Self { total_bytes }
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn capacity(&self) -> usize {
        self.total_bytes.saturating_sub(PKCS1_OVERHEAD)
    }

    pub fn pad(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.pad_with_rng(data, &mut OsRng)
    }

    pub fn pad_with_rng<R: Rng + ?Sized>(&self, data: &[u8], rng: &mut R) -> Result<Vec<u8>> {
        if self.total_bytes < PKCS1_OVERHEAD || data.len() > self.capacity() {
            return Err(Error::MessageTooLarge {
                len: data.len(),
                capacity: self.capacity(),
            });
        }

        let pad_len = self.total_bytes - 3 - data.len();
        let mut result = Vec::with_capacity(self.total_bytes);
        result.push(0x00);
        result.push(0x02);
        result.extend(nonzero_padding(pad_len, rng));
        result.push(0x00);
        result.extend_from_slice(data);
        Ok(result)
    }

    /// Strips `00 02 <padding> 00`. Does not check the block type or the
    /// padding length; only the presence of a separator.
    pub fn unpad(&self, data: &[u8]) -> Result<Vec<u8>> {
        let body = data
            .get(2..)
            .ok_or(Error::MalformedPadding("block shorter than header"))?;
        let separator = body
            .iter()
            .position(|b| *b == 0)
            .ok_or(Error::MalformedPadding("no zero separator"))?;
        Ok(body[separator + 1..].to_owned())
    }
}

// Distinct bytes while they last; a block needing more than 255 padding
// bytes falls back to independent draws.
fn nonzero_padding<R: Rng + ?Sized>(pad_len: usize, rng: &mut R) -> Vec<u8> {
    if pad_len <= 255 {
        index::sample(rng, 255, pad_len)
            .into_iter()
            .map(|i| (i + 1) as u8)
            .collect()
    } else {
        (0..pad_len).map(|_| rng.gen_range(1..=255u8)).collect()
    }
}
