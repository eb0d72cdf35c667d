use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("message too large: {len} bytes, capacity is {capacity}")]
    MessageTooLarge { len: usize, capacity: usize },

    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("decrypted value is {actual} bytes, modulus is only {expected}")]
    InvalidPaddingLength { actual: usize, expected: usize },

    #[error("no modular inverse exists")]
    NoModularInverse,

    #[error("malformed padding: {0}")]
    MalformedPadding(&'static str),

    #[error("oracle failure: {0}")]
    Oracle(String),
}

pub type Result<T> = std::result::Result<T, Error>;
