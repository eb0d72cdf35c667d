use num_bigint::{BigInt, BigUint, RandBigInt};
use num_traits::{One, Signed, Zero};
use rand::Rng;

use crate::error::{Error, Result};

const MILLER_RABIN_ROUNDS: usize = 40;

const SMALL_PRIMES: [u32; 25] = [
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89, 97,
];

pub fn mod_exp(base: &BigUint, exp: &BigUint, modulo: &BigUint) -> BigUint {
    base.modpow(exp, modulo)
}

/// `ceil(num / den)` on non-negative integers.
pub fn ceil_div(num: &BigUint, den: &BigUint) -> BigUint {
    let (quotient, remainder) = (num / den, num % den);
    if remainder.is_zero() {
        quotient
    } else {
        quotient + BigUint::one()
    }
}

pub fn floor_div(num: &BigUint, den: &BigUint) -> BigUint {
    num / den
}

/// Iterative extended Euclid. Returns `a^-1 mod m`.
pub fn inv_mod(a: &BigUint, m: &BigUint) -> Result<BigUint> {
    if m.is_zero() {
        return Err(Error::NoModularInverse);
    }
    let modulus = BigInt::from(m.clone());
    let (mut old_r, mut r) = (BigInt::from(a % m), modulus.clone());
    let (mut old_s, mut s) = (BigInt::one(), BigInt::zero());

    while !r.is_zero() {
        let quotient = &old_r / &r;
        let next_r = &old_r - &quotient * &r;
        old_r = std::mem::replace(&mut r, next_r);
        let next_s = &old_s - &quotient * &s;
        old_s = std::mem::replace(&mut s, next_s);
    }

    if !old_r.is_one() {
        return Err(Error::NoModularInverse);
    }
    let mut inverse = old_s % &modulus;
    if inverse.is_negative() {
        inverse += &modulus;
    }
    inverse.to_biguint().ok_or(Error::NoModularInverse)
}

pub fn is_probable_prime<R: Rng + ?Sized>(candidate: &BigUint, rng: &mut R) -> bool {
    for p in SMALL_PRIMES.iter() {
        let p = BigUint::from(*p);
        if candidate == &p {
            return true;
        }
        if (candidate % &p).is_zero() {
            return false;
        }
    }
    if candidate < &BigUint::from(2u32) {
        return false;
    }

    let one = BigUint::one();
    let two = BigUint::from(2u32);
    let n_minus_one = candidate - &one;
    let mut d = n_minus_one.clone();
    let mut r = 0u32;
    while !d.bit(0) {
        d >>= 1;
        r += 1;
    }

    'witness: for _ in 0..MILLER_RABIN_ROUNDS {
        let a = rng.gen_biguint_range(&two, &n_minus_one);
        let mut x = mod_exp(&a, &d, candidate);
        if x == one || x == n_minus_one {
            continue;
        }
        for _ in 1..r {
            x = mod_exp(&x, &two, candidate);
            if x == n_minus_one {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

/// Samples a prime with exactly `bits` bits. The top two bits are set so the
/// product of two such primes has exactly twice as many bits.
pub fn rand_prime_with_rng<R: Rng + ?Sized>(bits: u64, rng: &mut R) -> BigUint {
    assert!(bits >= 8, "prime size too small");
    let top = BigUint::from(3u32) << (bits - 2) as usize;
    loop {
        let candidate = rng.gen_biguint(bits) | &top | BigUint::one();
        if is_probable_prime(&candidate, rng) {
            return candidate;
        }
    }
}
