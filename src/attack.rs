//! Bleichenbacher's attack (CRYPTO '98, "Chosen Ciphertext Attacks Against
//! Protocols Based on the RSA Encryption Standard PKCS #1").
//!
//! Variable names follow the paper: `B = 2^(8(k-2))`, `s` is the current
//! multiplier and `r` the wrap-around count of `m * s` modulo `n`.

use std::cmp;
use std::thread;

use log::{debug, info};
use num_bigint::{BigUint, RandBigInt};
use num_traits::{One, ToPrimitive, Zero};
use rand::Rng;
use rand_core::OsRng;

use crate::error::{Error, Result};
use crate::intervals::{Interval, IntervalSet};
use crate::math::{ceil_div, floor_div, inv_mod, mod_exp};
use crate::oracles::PaddingOracle;
use crate::padding::Padding;
use crate::rsa::{PublicKey, RsaKey};
use crate::{bytes_to_int, int_to_bytes_padded};

/// Everything the attack knows between rounds.
#[derive(Debug, Clone)]
pub struct AttackState {
    pub intervals: IntervalSet,
    pub s_prev: Option<BigUint>,
    pub b: BigUint,
    pub n: BigUint,
    pub e: BigUint,
    pub k: usize,
    pub c: BigUint,
}

impl AttackState {
    fn new(public_key: &PublicKey, c: BigUint) -> Self {
        let k = public_key.size();
        let b = BigUint::one() << (8 * k.saturating_sub(2));
        let initial = Interval::new(&b * 2u32, &b * 3u32 - 1u32);
        Self {
            intervals: IntervalSet::single(initial),
            s_prev: None,
            b,
            n: public_key.modulus().clone(),
            e: public_key.pub_exp().clone(),
            k,
            c,
        }
    }

    fn two_b(&self) -> BigUint {
        &self.b * 2u32
    }

    fn three_b(&self) -> BigUint {
        &self.b * 3u32
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttackOutcome {
    pub plaintext: BigUint,
    pub queries: u64,
    pub rounds: u64,
}

pub struct Bleichenbacher<O: PaddingOracle> {
    oracle: O,
    state: AttackState,
    unblind: Option<BigUint>,
    batch_width: usize,
    rounds: u64,
    queries_at_start: u64,
}

impl<O: PaddingOracle> Bleichenbacher<O> {
    /// Starts an attack on a ciphertext whose plaintext is already known to
    /// be PKCS#1 conforming.
    pub fn new(public_key: &PublicKey, ciphertext: &[u8], oracle: O) -> Result<Self> {
        let c = bytes_to_int(ciphertext);
        if &c >= public_key.modulus() {
            return Err(Error::MessageTooLarge {
                len: ciphertext.len(),
                capacity: public_key.size(),
            });
        }
        let queries_at_start = oracle.queries();
        Ok(Self {
            oracle,
            state: AttackState::new(public_key, c),
            unblind: None,
            batch_width: 1,
            rounds: 0,
            queries_at_start,
        })
    }

    /// Starts an attack on an arbitrary ciphertext by first blinding it with
    /// a random `s0` until the result conforms.
    pub fn blinded(public_key: &PublicKey, ciphertext: &[u8], oracle: O) -> Result<Self> {
        Self::blinded_with_rng(public_key, ciphertext, oracle, &mut OsRng)
    }

    pub fn blinded_with_rng<R: Rng + ?Sized>(
        public_key: &PublicKey,
        ciphertext: &[u8],
        oracle: O,
        rng: &mut R,
    ) -> Result<Self> {
        let mut attack = Self::new(public_key, ciphertext, oracle)?;
        let c = attack.state.c.clone();
        if attack.probe(&BigUint::one())? {
            debug!("ciphertext already conforms, no blinding needed");
            return Ok(attack);
        }

        let n = attack.state.n.clone();
        loop {
            let s0 = rng.gen_biguint_range(&BigUint::from(2u32), &n);
            if !attack.probe(&s0)? {
                continue;
            }
            let s0_inv = match inv_mod(&s0, &n) {
                Ok(inverse) => inverse,
                Err(Error::NoModularInverse) => continue,
                Err(err) => return Err(err),
            };
            info!(
                "blinded ciphertext after {} queries",
                attack.oracle.queries() - attack.queries_at_start
            );
            attack.state.c = (c * mod_exp(&s0, &attack.state.e, &n)) % &n;
            attack.unblind = Some(s0_inv);
            return Ok(attack);
        }
    }

    /// Queries up to `width` multipliers concurrently during forward scans.
    /// Only the smallest conforming multiplier of a batch is ever used.
    pub fn with_batch_width(mut self, width: usize) -> Self {
        self.batch_width = cmp::max(width, 1);
        self
    }

    pub fn state(&self) -> &AttackState {
        &self.state
    }

    pub fn intervals(&self) -> &IntervalSet {
        &self.state.intervals
    }

    pub fn s_prev(&self) -> Option<&BigUint> {
        self.state.s_prev.as_ref()
    }

    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    /// Oracle queries spent by this attack, including blinding.
    pub fn queries(&self) -> u64 {
        self.oracle.queries() - self.queries_at_start
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    /// The recovered plaintext once the interval set has collapsed.
    pub fn solution(&self) -> Option<BigUint> {
        let m = self.state.intervals.solution()?;
        Some(match &self.unblind {
            Some(s0_inv) => (m * s0_inv) % &self.state.n,
            None => m % &self.state.n,
        })
    }

    /// One search step (2a, 2b or 2c) followed by refinement (step 3).
    /// Returns the plaintext once the attack is complete (step 4).
    pub fn round(&mut self) -> Result<Option<BigUint>> {
        if let Some(m) = self.solution() {
            return Ok(Some(m));
        }

        let s = match (&self.state.s_prev, self.state.intervals.len()) {
            (_, 0) => {
                return Err(Error::Oracle(
                    "no interval left; oracle answers are inconsistent".to_owned(),
                ))
            }
            (None, _) => {
                let s = self.search_first()?;
                info!("step 2a found s = {} after {} queries", s, self.queries());
                s
            }
            (Some(s_prev), 1) => {
                let s_prev = s_prev.clone();
                self.search_single(&s_prev)?
            }
            (Some(s_prev), _) => {
                let start = s_prev + 1u32;
                self.search_multiple(start)?
            }
        };

        self.state.intervals = self.refine(&s);
        self.state.s_prev = Some(s);
        self.rounds += 1;
        debug!(
            "round {}: {} interval(s), widest {} bits, {} queries",
            self.rounds,
            self.state.intervals.len(),
            self.state.intervals.max_width_bits(),
            self.queries()
        );

        Ok(self.solution())
    }

    pub fn run(mut self) -> Result<AttackOutcome> {
        loop {
            if let Some(plaintext) = self.round()? {
                info!(
                    "recovered plaintext in {} rounds, {} queries",
                    self.rounds,
                    self.queries()
                );
                return Ok(AttackOutcome {
                    plaintext,
                    queries: self.queries(),
                    rounds: self.rounds,
                });
            }
        }
    }

    /// [`run`](Self::run), then strips the PKCS#1 padding off the plaintext.
    pub fn recover_message(self) -> Result<(Vec<u8>, AttackOutcome)> {
        let k = self.state.k;
        let outcome = self.run()?;
        let block = int_to_bytes_padded(&outcome.plaintext, k)?;
        let message = Padding::pkcs1_encryption(k).unpad(&block)?;
        Ok((message, outcome))
    }

    /// Step 2a: smallest conforming `s >= n / 3B`.
    fn search_first(&self) -> Result<BigUint> {
        let start = ceil_div(&self.state.n, &self.state.three_b());
        self.search_multiple(start)
    }

    /// Step 2b: smallest conforming `s >= start`.
    fn search_multiple(&self, start: BigUint) -> Result<BigUint> {
        let mut s = start;
        loop {
            let candidates = batch(&s, self.batch_width);
            if let Some(found) = self.probe_batch(&candidates)? {
                return Ok(found);
            }
            s += BigUint::from(self.batch_width);
        }
    }

    /// Step 2c: with a single interval `[a, b]`, walk `r` upwards and scan
    /// `s` in `[(2B + rn) / b, (3B + rn) / a)`.
    fn search_single(&self, s_prev: &BigUint) -> Result<BigUint> {
        let state = &self.state;
        let interval = state
            .intervals
            .iter()
            .next()
            .ok_or_else(|| Error::Oracle("no interval left".to_owned()))?;
        let (a, b) = (&interval.lower, &interval.upper);
        let (two_b, three_b) = (state.two_b(), state.three_b());

        let mut r = ceil_div(&((b * s_prev - &two_b) * 2u32), &state.n);
        loop {
            let rn = &r * &state.n;
            let mut s = ceil_div(&(&two_b + &rn), b);
            let upper = ceil_div(&(&three_b + &rn), a);
            while s < upper {
                let width = (&upper - &s)
                    .to_usize()
                    .map_or(self.batch_width, |remaining| cmp::min(remaining, self.batch_width));
                let candidates = batch(&s, width);
                if let Some(found) = self.probe_batch(&candidates)? {
                    return Ok(found);
                }
                s += BigUint::from(width);
            }
            r += 1u32;
        }
    }

    /// Step 3: narrow every interval using the conforming multiplier `s`.
    fn refine(&self, s: &BigUint) -> IntervalSet {
        let state = &self.state;
        let n = &state.n;
        let (two_b, three_b) = (state.two_b(), state.three_b());
        let three_b_minus_one = &three_b - 1u32;

        let mut next = IntervalSet::new();
        for interval in &state.intervals {
            let (a, b) = (&interval.lower, &interval.upper);

            let low_numerator = a * s + 1u32;
            let mut r = if low_numerator > three_b {
                ceil_div(&(low_numerator - &three_b), n)
            } else {
                BigUint::zero()
            };
            let high_product = b * s;
            if high_product < two_b {
                continue;
            }
            let r_max = floor_div(&(high_product - &two_b), n);

            while r <= r_max {
                let rn = &r * n;
                let lower = cmp::max(a.clone(), ceil_div(&(&two_b + &rn), s));
                let upper = cmp::min(b.clone(), floor_div(&(&three_b_minus_one + &rn), s));
                if lower <= upper {
                    next.insert(Interval::new(lower, upper));
                }
                r += 1u32;
            }
        }
        next
    }

    /// Asks the oracle whether `c * s^e mod n` conforms.
    fn probe(&self, s: &BigUint) -> Result<bool> {
        let state = &self.state;
        let candidate = (&state.c * mod_exp(s, &state.e, &state.n)) % &state.n;
        let ciphertext = int_to_bytes_padded(&candidate, state.k)?;
        self.oracle.query(&ciphertext)
    }

    /// Smallest conforming candidate of an ascending batch. Larger hits
    /// found concurrently are discarded.
    fn probe_batch(&self, candidates: &[BigUint]) -> Result<Option<BigUint>> {
        if let [only] = candidates {
            return Ok(if self.probe(only)? {
                Some(only.clone())
            } else {
                None
            });
        }

        let answers: Vec<Result<bool>> = thread::scope(|scope| {
            let handles: Vec<_> = candidates
                .iter()
                .map(|s| scope.spawn(move || self.probe(s)))
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(Error::Oracle("oracle query panicked".to_owned())))
                })
                .collect()
        });

        for (s, answer) in candidates.iter().zip(answers) {
            if answer? {
                return Ok(Some(s.clone()));
            }
        }
        Ok(None)
    }
}

fn batch(start: &BigUint, width: usize) -> Vec<BigUint> {
    (0..width).map(|i| start + BigUint::from(i)).collect()
}

/// Runs the full attack against a conforming ciphertext and strips the
/// padding from the result.
pub fn recover_message<O: PaddingOracle>(
    public_key: &PublicKey,
    ciphertext: &[u8],
    oracle: O,
) -> Result<(Vec<u8>, AttackOutcome)> {
    Bleichenbacher::new(public_key, ciphertext, oracle)?.recover_message()
}
