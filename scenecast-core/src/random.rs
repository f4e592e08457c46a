//! Random number generation provider abstraction.
//!
//! The relay's only consumer of randomness is client-id assignment, but the
//! seam keeps tests deterministic: a seeded implementation can stand in for
//! the thread-local RNG.

use std::cell::RefCell;

use rand::distr::{Distribution, StandardUniform};
use rand::prelude::*;

/// Provider trait for random number generation.
pub trait RandomProvider: Clone {
    /// Generate a random value of type T.
    fn random<T>(&self) -> T
    where
        StandardUniform: Distribution<T>;
}

/// Production random provider using the thread-local RNG.
#[derive(Clone, Default)]
pub struct TokioRandomProvider;

impl TokioRandomProvider {
    /// Create a new production random provider.
    pub fn new() -> Self {
        Self
    }
}

thread_local! {
    static RNG: RefCell<rand::rngs::ThreadRng> = RefCell::new(rand::rng());
}

impl RandomProvider for TokioRandomProvider {
    fn random<T>(&self) -> T
    where
        StandardUniform: Distribution<T>,
    {
        RNG.with(|rng| rng.borrow_mut().random())
    }
}
