//! Destination-metadata routing

use polaris_core::{Instance, RouteCriteria, ServiceRouter};

/// Keeps instances whose metadata contains every requested pair
pub struct DstMetaRouter;

impl ServiceRouter for DstMetaRouter {
    fn name(&self) -> &str {
        "dstMetaRouter"
    }

    fn route(&self, criteria: &RouteCriteria, instances: Vec<Instance>) -> Vec<Instance> {
        if criteria.source_metadata.is_empty() {
            return instances;
        }
        instances
            .into_iter()
            .filter(|instance| {
                criteria
                    .source_metadata
                    .iter()
                    .all(|(key, value)| instance.metadata.get(key) == Some(value))
            })
            .collect()
    }
}
