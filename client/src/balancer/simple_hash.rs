//! Modulo hash selection

use polaris_core::{Instance, LoadBalanceType, LoadBalancer, SelectionCriteria};

/// `hash_key % n` — stable while the instance count holds
pub struct SimpleHashBalancer;

impl LoadBalancer for SimpleHashBalancer {
    fn name(&self) -> &str {
        "simpleHash"
    }

    fn load_balance_type(&self) -> LoadBalanceType {
        LoadBalanceType::SimpleHash
    }

    fn choose_instance(
        &self,
        criteria: &SelectionCriteria,
        instances: &[Instance],
    ) -> Option<Instance> {
        if instances.is_empty() {
            return None;
        }
        let index = (criteria.hash_key % instances.len() as u64) as usize;
        instances.get(index).cloned()
    }
}
