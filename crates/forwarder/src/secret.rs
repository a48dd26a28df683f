//! SMTP password generation
//!
//! Secrets are drawn from an RNG seeded by the operating system CSPRNG. If the
//! OS source cannot be read, generation fails instead of falling back to a
//! weaker source.

use rand::rngs::{OsRng, StdRng};
use rand::seq::SliceRandom;
use rand::{Rng, RngCore, SeedableRng};

use crate::error::SecretError;

const LOWER_LETTERS: &str = "abcdefghijklmnopqrstuvwxyz";
const UPPER_LETTERS: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &str = "0123456789";

/// Shape of a generated secret
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecretPolicy {
    /// Total number of characters
    pub length: usize,
    /// Number of digits; the rest are ASCII letters of either case
    pub digits: usize,
    /// Whether a character may appear more than once
    pub allow_repeat: bool,
}

impl SecretPolicy {
    /// Policy used for SMTP credentials: 16 chars, 5 digits, no symbols, no repeats
    pub const SMTP: SecretPolicy = SecretPolicy {
        length: 16,
        digits: 5,
        allow_repeat: false,
    };

    fn letters(&self) -> usize {
        self.length - self.digits
    }

    fn validate(&self) -> Result<(), SecretError> {
        if self.length == 0 {
            return Err(SecretError::InvalidPolicy("length must be positive"));
        }
        if self.digits > self.length {
            return Err(SecretError::InvalidPolicy("more digits than characters"));
        }
        if !self.allow_repeat {
            if self.digits > DIGITS.len() {
                return Err(SecretError::InvalidPolicy(
                    "not enough distinct digits without repeats",
                ));
            }
            if self.letters() > LOWER_LETTERS.len() + UPPER_LETTERS.len() {
                return Err(SecretError::InvalidPolicy(
                    "not enough distinct letters without repeats",
                ));
            }
        }
        Ok(())
    }
}

impl Default for SecretPolicy {
    fn default() -> Self {
        Self::SMTP
    }
}

/// Generate a secret using the OS randomness source
pub fn generate_secret(policy: &SecretPolicy) -> Result<String, SecretError> {
    generate_secret_from(policy, &mut OsRng)
}

/// Generate a secret seeded from `source`
pub fn generate_secret_from<R: RngCore + ?Sized>(
    policy: &SecretPolicy,
    source: &mut R,
) -> Result<String, SecretError> {
    policy.validate()?;

    let mut seed = [0u8; 32];
    source
        .try_fill_bytes(&mut seed)
        .map_err(|e| SecretError::RandomnessUnavailable(e.to_string()))?;
    let mut rng = StdRng::from_seed(seed);

    let letters: Vec<char> = LOWER_LETTERS.chars().chain(UPPER_LETTERS.chars()).collect();
    let digits: Vec<char> = DIGITS.chars().collect();

    let mut chars = Vec::with_capacity(policy.length);
    chars.extend(pick(&digits, policy.digits, policy.allow_repeat, &mut rng));
    chars.extend(pick(&letters, policy.letters(), policy.allow_repeat, &mut rng));
    chars.shuffle(&mut rng);

    if chars.len() != policy.length {
        return Err(SecretError::InvalidPolicy("generated secret has wrong length"));
    }

    Ok(chars.into_iter().collect())
}

fn pick<R: Rng + ?Sized>(pool: &[char], count: usize, allow_repeat: bool, rng: &mut R) -> Vec<char> {
    if allow_repeat {
        (0..count).filter_map(|_| pool.choose(rng).copied()).collect()
    } else {
        pool.choose_multiple(rng, count).copied().collect()
    }
}
