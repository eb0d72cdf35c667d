use lazy_static::lazy_static;
use log::trace;
use num_bigint::BigUint;
use num_traits::One;
use rand::Rng;
use rand_core::OsRng;

use crate::error::{Error, Result};
use crate::math::{inv_mod, mod_exp, rand_prime_with_rng};
use crate::{bytes_to_int, int_to_bytes};

lazy_static! {
    pub static ref E3: BigUint = 3u32.into();
    pub static ref E65537: BigUint = 65537u32.into();
}

/// Upper bound on prime-pair draws before key generation gives up.
pub const MAX_KEYGEN_ATTEMPTS: usize = 1000;

pub trait RsaKey {
    fn modulus(&self) -> &BigUint;

    /// Modulus length in bytes, `k`.
    fn size(&self) -> usize {
        ((self.modulus().bits() + 7) / 8) as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    modulus: BigUint,
    pub_exp: BigUint,
}

#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey {
    modulus: BigUint,
    priv_exp: BigUint,
}

// Keeps the private exponent out of debug output.
impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey")
            .field("modulus", &self.modulus)
            .finish()
    }
}

impl PublicKey {
    pub fn new(modulus: BigUint, pub_exp: BigUint) -> Self {
        Self { modulus, pub_exp }
    }

    pub fn pub_exp(&self) -> &BigUint {
        &self.pub_exp
    }
}

impl PrivateKey {
    pub fn new(modulus: BigUint, priv_exp: BigUint) -> Self {
        Self { modulus, priv_exp }
    }

    pub fn priv_exp(&self) -> &BigUint {
        &self.priv_exp
    }
}

impl RsaKey for PublicKey {
    fn modulus(&self) -> &BigUint {
        &self.modulus
    }
}

impl RsaKey for PrivateKey {
    fn modulus(&self) -> &BigUint {
        &self.modulus
    }
}

pub fn gen_rsa(bit_size: u64, pub_exp: &BigUint) -> Result<(PublicKey, PrivateKey)> {
    gen_rsa_with_rng(bit_size, pub_exp, &mut OsRng)
}

pub fn gen_rsa_with_rng<R: Rng + ?Sized>(
    bit_size: u64,
    pub_exp: &BigUint,
    rng: &mut R,
) -> Result<(PublicKey, PrivateKey)> {
    if bit_size < 32 {
        return Err(Error::KeyGeneration(format!(
            "modulus of {} bits is too small",
            bit_size
        )));
    }
    let prime_size = bit_size / 2;
    for attempt in 0..MAX_KEYGEN_ATTEMPTS {
        let p = rand_prime_with_rng(prime_size, rng);
        let q = rand_prime_with_rng(bit_size - prime_size, rng);
        if p == q {
            continue;
        }
        let totient = (&p - BigUint::one()) * (&q - BigUint::one());
        let priv_exp = match inv_mod(pub_exp, &totient) {
            Ok(inverse) => inverse,
            Err(Error::NoModularInverse) => {
                trace!("exponent not invertible on attempt {}, resampling", attempt);
                continue;
            }
            Err(err) => return Err(err),
        };

        let modulus = p * q;
        if modulus.bits() != bit_size {
            trace!("modulus came out {} bits, resampling", modulus.bits());
            continue;
        }
        return Ok((
            PublicKey::new(modulus.clone(), pub_exp.clone()),
            PrivateKey::new(modulus, priv_exp),
        ));
    }
    Err(Error::KeyGeneration(format!(
        "no suitable primes after {} attempts",
        MAX_KEYGEN_ATTEMPTS
    )))
}

pub fn rsa_public_raw(key: &PublicKey, data: &BigUint) -> Result<BigUint> {
    if data >= key.modulus() {
        return Err(Error::MessageTooLarge {
            len: ((data.bits() + 7) / 8) as usize,
            capacity: key.size(),
        });
    }
    Ok(mod_exp(data, key.pub_exp(), key.modulus()))
}

pub fn rsa_private_raw(key: &PrivateKey, data: &BigUint) -> BigUint {
    mod_exp(data, key.priv_exp(), key.modulus())
}

/// Byte output is the minimal big-endian encoding, so leading zeros are lost.
pub fn rsa_public_bytes(key: &PublicKey, data: &[u8]) -> Result<Vec<u8>> {
    Ok(int_to_bytes(&rsa_public_raw(key, &bytes_to_int(data))?))
}

pub fn rsa_private_bytes(key: &PrivateKey, data: &[u8]) -> Vec<u8> {
    int_to_bytes(&rsa_private_raw(key, &bytes_to_int(data)))
}
