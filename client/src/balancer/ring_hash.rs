//! Consistent-hash ring selection
//!
//! One implementation backs three registered balancers: the ketama-style
//! `ringHash`, the murmur-mixed `cMurmurHash` and the `l5cst` variant with
//! denser virtual nodes. They differ only in placement mixing and replica
//! count, so each constructor fixes those parameters and the declared
//! [`LoadBalanceType`].

use std::collections::BTreeMap;

use polaris_core::{
    Instance, LoadBalanceType, LoadBalancer, SelectionCriteria, DEFAULT_INSTANCE_WEIGHT,
};

use super::{fmix64, hash_str};

/// Ring placement with weight-proportional virtual nodes
pub struct RingHashBalancer {
    name: &'static str,
    lb_type: LoadBalanceType,
    base_replicas: u32,
    mix: fn(u64) -> u64,
}

fn no_mix(value: u64) -> u64 {
    value
}

impl RingHashBalancer {
    /// Ketama-style ring (`ringHash`)
    pub fn ketama() -> Self {
        Self {
            name: "ringHash",
            lb_type: LoadBalanceType::RingHash,
            base_replicas: 10,
            mix: no_mix,
        }
    }

    /// Murmur-mixed ring (`cMurmurHash`)
    pub fn cmurmur() -> Self {
        Self {
            name: "cMurmurHash",
            lb_type: LoadBalanceType::CMurmurHash,
            base_replicas: 10,
            mix: fmix64,
        }
    }

    /// L5-compatible consistent hash (`l5cst`)
    pub fn l5cst() -> Self {
        Self {
            name: "l5cst",
            lb_type: LoadBalanceType::L5CstHash,
            base_replicas: 20,
            mix: no_mix,
        }
    }

    fn build_ring<'a>(&self, instances: &'a [Instance]) -> BTreeMap<u64, &'a Instance> {
        // Replicas scale with weight but stay bounded so one mis-weighted
        // instance cannot blow the ring up
        const MAX_REPLICAS: u64 = 256;
        let mut ring = BTreeMap::new();
        for instance in instances {
            let replicas = (u64::from(self.base_replicas) * u64::from(instance.weight.max(1)))
                .div_ceil(u64::from(DEFAULT_INSTANCE_WEIGHT))
                .clamp(1, MAX_REPLICAS);
            for replica in 0..replicas {
                let point = (self.mix)(hash_str(&format!(
                    "{}:{}#{replica}",
                    instance.host, instance.port
                )));
                ring.insert(point, instance);
            }
        }
        ring
    }
}

impl LoadBalancer for RingHashBalancer {
    fn name(&self) -> &str {
        self.name
    }

    fn load_balance_type(&self) -> LoadBalanceType {
        self.lb_type
    }

    fn choose_instance(
        &self,
        criteria: &SelectionCriteria,
        instances: &[Instance],
    ) -> Option<Instance> {
        if instances.is_empty() {
            return None;
        }
        let ring = self.build_ring(instances);
        let key = (self.mix)(criteria.hash_key);
        ring.range(key..)
            .next()
            .or_else(|| ring.iter().next())
            .map(|(_, instance)| (*instance).clone())
    }
}
