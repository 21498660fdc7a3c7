// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-kind mutation generations kept in the shared cache under `Gen_{kind}`.
//!
//! Anything cached from a read of kind K is tagged with K's generation at
//! the time of the read and trusted only while the generation is unchanged.
//! Sanctioned writes bump it with increment-if-present; a missing generation
//! is seeded with a random value on the next read so that a flushed or
//! evicted counter never lines up with entries tagged before it vanished.

use std::sync::Arc;

use rand::Rng;
use tracing::warn;

use crate::metrics;

use super::traits::VolatileCache;

#[derive(Clone)]
pub struct KindGenerations {
    cache: Arc<dyn VolatileCache>,
}

impl KindGenerations {
    pub fn new(cache: Arc<dyn VolatileCache>) -> Self {
        Self { cache }
    }

    pub fn cache_key(kind: &str) -> String {
        format!("Gen_{}", kind)
    }

    /// Current generation of `kind`, seeding a fresh one if absent.
    ///
    /// `None` when the cache cannot be read; callers then must not trust
    /// or fill anything generation-tagged.
    pub async fn current(&self, kind: &str) -> Option<u64> {
        let key = Self::cache_key(kind);
        match self.cache.get(&key).await {
            Ok(Some(bytes)) => return parse_generation(&bytes),
            Ok(None) => {}
            Err(e) => {
                warn!(kind, error = %e, "Failed to read generation");
                return None;
            }
        }

        let seed = random_seed();
        match self.cache.add(&key, seed.to_string().as_bytes(), None).await {
            Ok(true) => Some(seed),
            Ok(false) => match self.cache.get(&key).await {
                Ok(Some(bytes)) => parse_generation(&bytes),
                _ => None,
            },
            Err(e) => {
                warn!(kind, error = %e, "Failed to seed generation");
                None
            }
        }
    }

    /// Advance the generation of `kind`. Absent generations stay absent.
    pub async fn bump(&self, kind: &str) {
        if let Err(e) = self.cache.increment(&Self::cache_key(kind), 1).await {
            warn!(kind, error = %e, "Failed to bump generation");
            metrics::record_cache_error("generation_bump");
        }
    }
}

fn random_seed() -> u64 {
    rand::rng().random_range(1..(1u64 << 48))
}

fn parse_generation(bytes: &[u8]) -> Option<u64> {
    std::str::from_utf8(bytes).ok()?.trim().parse().ok()
}
