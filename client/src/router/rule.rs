//! Health and isolation filtering

use polaris_core::{HealthStatus, Instance, RouteCriteria, ServiceRouter};

/// Drops isolated and known-dead instances
///
/// Runs first in the default chain so the downstream routers and the
/// balancer only ever see instances the control plane considers usable.
/// Instances with unknown health pass: a fresh snapshot may not have
/// health data yet and dropping everything would be worse.
pub struct RuleRouter;

impl ServiceRouter for RuleRouter {
    fn name(&self) -> &str {
        "ruleRouter"
    }

    fn route(&self, _criteria: &RouteCriteria, instances: Vec<Instance>) -> Vec<Instance> {
        instances
            .into_iter()
            .filter(|instance| !instance.isolate && instance.health != HealthStatus::Down)
            .collect()
    }
}
