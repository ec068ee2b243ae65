//! Seed domain: normalization and generation.
//!
//! Both peers must drive generation from the same seed, so every value
//! entering or leaving the coordinator passes through [`normalize`].

use std::fmt;

use rand::Rng;

/// Upper bound of the valid seed domain.
pub const SEED_MAX: u32 = 999_999;

/// The generation call sites a seed decision can be made for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenContext {
    /// A fresh run is starting.
    RunStart,
    /// A level is about to be generated.
    LevelGen,
}

impl fmt::Display for GenContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenContext::RunStart => write!(f, "run-start"),
            GenContext::LevelGen => write!(f, "level-gen"),
        }
    }
}

/// Map any integer into the valid seed domain `[1, SEED_MAX]`.
///
/// Deterministic regardless of the sign or magnitude of the input; zero is
/// remapped to 1 so the result is never a degenerate seed.
pub fn normalize(raw: i64) -> u32 {
    let n = (raw % SEED_MAX as i64).unsigned_abs() as u32;
    if n == 0 {
        1
    } else {
        n
    }
}

/// Uniform random seed in `[1, SEED_MAX)`.
///
/// `SEED_MAX` itself is excluded: `normalize` folds it to 1, so generating
/// it would desync a host (which keeps the raw value) from a client (which
/// normalizes what arrives on the wire). Every value drawn here survives
/// [`normalize`] unchanged.
pub fn random_seed() -> u32 {
    rand::thread_rng().gen_range(1..SEED_MAX)
}
