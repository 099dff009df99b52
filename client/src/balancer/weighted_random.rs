//! Weight-proportional random selection

use polaris_core::{Instance, LoadBalanceType, LoadBalancer, SelectionCriteria};

use super::Xorshift64;

/// Default balancer: picks proportionally to instance weight
pub struct WeightedRandomBalancer {
    rng: Xorshift64,
}

impl WeightedRandomBalancer {
    pub fn new() -> Self {
        Self {
            rng: Xorshift64::new(),
        }
    }
}

impl Default for WeightedRandomBalancer {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalancer for WeightedRandomBalancer {
    fn name(&self) -> &str {
        "weightedRandom"
    }

    fn load_balance_type(&self) -> LoadBalanceType {
        LoadBalanceType::WeightedRandom
    }

    fn choose_instance(
        &self,
        _criteria: &SelectionCriteria,
        instances: &[Instance],
    ) -> Option<Instance> {
        if instances.is_empty() {
            return None;
        }
        let total: u64 = instances.iter().map(|i| u64::from(i.weight)).sum();
        if total == 0 {
            // All-zero weights: fall back to uniform
            let index = (self.rng.next() % instances.len() as u64) as usize;
            return instances.get(index).cloned();
        }
        let mut remaining = self.rng.next() % total;
        for instance in instances {
            let weight = u64::from(instance.weight);
            if remaining < weight {
                return Some(instance.clone());
            }
            remaining -= weight;
        }
        instances.last().cloned()
    }
}
