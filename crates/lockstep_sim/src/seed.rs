//! Seed management for reproducible interleavings.

use fnv::FnvHasher;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::hash::Hasher;

/// Where a seed came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeedSource {
    /// A literal value
    Literal(u64),
    /// A string, hashed
    FromString(String),
}

impl SeedSource {
    /// Seed value for this source
    #[must_use]
    pub fn to_seed(&self) -> u64 {
        match self {
            Self::Literal(seed) => *seed,
            Self::FromString(s) => {
                let mut hasher = FnvHasher::default();
                hasher.write(s.as_bytes());
                hasher.finish()
            }
        }
    }
}

/// Seed of one simulation run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimSeed {
    /// Seed value
    pub seed: u64,
    /// Where the value came from
    pub source: SeedSource,
    /// Namespace mixed into derived seeds
    pub namespace: String,
}

impl SimSeed {
    /// Create a seed from a source
    #[must_use]
    pub fn new(source: SeedSource) -> Self {
        Self {
            seed: source.to_seed(),
            source,
            namespace: String::new(),
        }
    }

    /// Create a seed from a literal value
    #[must_use]
    pub fn from_literal(seed: u64) -> Self {
        Self::new(SeedSource::Literal(seed))
    }

    /// Create a seed from a string
    #[must_use]
    pub fn from_string(s: impl Into<String>) -> Self {
        Self::new(SeedSource::FromString(s.into()))
    }

    /// Set the namespace
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Derive an independent seed for `context`
    #[must_use]
    pub fn derive(&self, context: &str) -> Self {
        let mut hasher = FnvHasher::default();
        hasher.write_u64(self.seed);
        hasher.write(self.namespace.as_bytes());
        hasher.write(context.as_bytes());
        let seed = hasher.finish();

        Self {
            seed,
            source: SeedSource::Literal(seed),
            namespace: self.namespace.clone(),
        }
    }

    /// RNG seeded from this seed
    #[must_use]
    pub fn rng(&self) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.seed)
    }
}

impl Default for SimSeed {
    fn default() -> Self {
        Self::from_literal(42)
    }
}
