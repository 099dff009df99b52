//! Load balancing
//!
//! Balancers pick one instance from the routed, breaker-gated candidates.
//! Algorithm internals are private to each module; they share the hashing
//! helpers here. Every balancer declares its [`LoadBalanceType`] statically
//! so the registry can index by algorithm without building instances.

mod maglev;
mod ring_hash;
mod simple_hash;
mod weighted_random;

pub use maglev::MaglevBalancer;
pub use ring_hash::RingHashBalancer;
pub use simple_hash::SimpleHashBalancer;
pub use weighted_random::WeightedRandomBalancer;

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

/// Deterministic 64-bit hash of a placement key
pub(crate) fn hash_str(value: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// 64-bit murmur-style finaliser, used where ring placement needs stronger
/// mixing than the default hasher provides
pub(crate) fn fmix64(mut value: u64) -> u64 {
    value ^= value >> 33;
    value = value.wrapping_mul(0xff51_afd7_ed55_8ccd);
    value ^= value >> 33;
    value = value.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    value ^= value >> 33;
    value
}

/// Lock-free xorshift64 generator
///
/// Backs the random balancer and the detection sweep's healthy-instance
/// sampling. Seeded from the clock once; `next` advances the shared state
/// with a compare-exchange loop so concurrent callers stay cheap.
pub(crate) struct Xorshift64 {
    state: AtomicU64,
}

impl Xorshift64 {
    pub(crate) fn new() -> Self {
        let seed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x9e37_79b9_7f4a_7c15);
        Self {
            state: AtomicU64::new(if seed == 0 { 0x9e37_79b9_7f4a_7c15 } else { seed }),
        }
    }

    pub(crate) fn next(&self) -> u64 {
        let mut current = self.state.load(Ordering::Relaxed);
        loop {
            let mut x = current;
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            match self.state.compare_exchange_weak(
                current,
                x,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return x,
                Err(observed) => current = observed,
            }
        }
    }

    /// Uniform draw in `[0.0, 1.0)`
    pub(crate) fn next_f64(&self) -> f64 {
        (self.next() >> 11) as f64 / (1u64 << 53) as f64
    }
}
