//! Set-division routing

use polaris_core::{Instance, RouteCriteria, ServiceRouter};

use super::metadata_keys;

/// Keeps instances in the caller's deployment set
///
/// Callers without a set name route freely. When a set is requested and no
/// instance carries it, the chain keeps the previous candidates.
pub struct SetDivisionRouter;

impl ServiceRouter for SetDivisionRouter {
    fn name(&self) -> &str {
        "setDivisionRouter"
    }

    fn route(&self, criteria: &RouteCriteria, instances: Vec<Instance>) -> Vec<Instance> {
        let Some(set_name) = &criteria.set_name else {
            return instances;
        };
        instances
            .into_iter()
            .filter(|instance| instance.metadata.get(metadata_keys::SET) == Some(set_name))
            .collect()
    }
}
