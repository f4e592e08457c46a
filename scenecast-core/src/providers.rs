//! Provider bundle trait for simplified type parameters.
//!
//! Without bundling, downstream code must carry a type parameter per
//! provider; with it, a single `P: Providers` covers networking, time, and
//! randomness.

use crate::{
    NetProvider, RandomProvider, TimeProvider, TokioNetProvider, TokioRandomProvider,
    TokioTimeProvider,
};

/// Bundle of all provider types for a runtime environment.
///
/// The trait uses associated types to preserve type information at compile
/// time without runtime dispatch. Accessor methods give convenient access to
/// individual providers while maintaining the bundle.
pub trait Providers: Clone + 'static {
    /// Network provider type for listeners and streams.
    type Network: NetProvider + Clone + 'static;

    /// Time provider type for sleep and time queries.
    type Time: TimeProvider + Clone + 'static;

    /// Random provider type for deterministic or real randomness.
    type Random: RandomProvider + Clone + 'static;

    /// Get the network provider instance.
    fn network(&self) -> &Self::Network;

    /// Get the time provider instance.
    fn time(&self) -> &Self::Time;

    /// Get the random provider instance.
    fn random(&self) -> &Self::Random;
}

/// Production providers using the Tokio runtime.
#[derive(Clone)]
pub struct TokioProviders {
    network: TokioNetProvider,
    time: TokioTimeProvider,
    random: TokioRandomProvider,
}

impl TokioProviders {
    /// Create a new production providers bundle.
    pub fn new() -> Self {
        Self {
            network: TokioNetProvider::new(),
            time: TokioTimeProvider::new(),
            random: TokioRandomProvider::new(),
        }
    }
}

impl Default for TokioProviders {
    fn default() -> Self {
        Self::new()
    }
}

impl Providers for TokioProviders {
    type Network = TokioNetProvider;
    type Time = TokioTimeProvider;
    type Random = TokioRandomProvider;

    fn network(&self) -> &Self::Network {
        &self.network
    }

    fn time(&self) -> &Self::Time {
        &self.time
    }

    fn random(&self) -> &Self::Random {
        &self.random
    }
}
