//! Canary routing

use polaris_core::{Instance, RouteCriteria, ServiceRouter};

use super::metadata_keys;

/// Separates canary traffic from the stable pool
///
/// Canary callers route to instances carrying their label, falling back to
/// the unlabelled pool when no canary instance is up yet. Regular callers
/// never see canary instances.
pub struct CanaryRouter;

impl ServiceRouter for CanaryRouter {
    fn name(&self) -> &str {
        "canaryRouter"
    }

    fn route(&self, criteria: &RouteCriteria, instances: Vec<Instance>) -> Vec<Instance> {
        match &criteria.canary {
            Some(label) => {
                let labelled: Vec<_> = instances
                    .iter()
                    .filter(|i| i.metadata.get(metadata_keys::CANARY) == Some(label))
                    .cloned()
                    .collect();
                if !labelled.is_empty() {
                    return labelled;
                }
                instances
                    .into_iter()
                    .filter(|i| !i.metadata.contains_key(metadata_keys::CANARY))
                    .collect()
            }
            None => instances
                .into_iter()
                .filter(|i| !i.metadata.contains_key(metadata_keys::CANARY))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance_with_canary(id: &str, canary: Option<&str>) -> Instance {
        let mut instance = Instance::new(id, "10.0.0.1", 80);
        if let Some(canary) = canary {
            instance
                .metadata
                .insert(metadata_keys::CANARY.to_string(), canary.to_string());
        }
        instance
    }

    #[test]
    fn canary_caller_gets_labelled_instances() {
        let criteria = RouteCriteria {
            canary: Some("v2".into()),
            ..Default::default()
        };
        let routed = CanaryRouter.route(
            &criteria,
            vec![
                instance_with_canary("stable", None),
                instance_with_canary("canary", Some("v2")),
            ],
        );
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].id, "canary");
    }

    #[test]
    fn canary_caller_falls_back_to_stable_pool() {
        let criteria = RouteCriteria {
            canary: Some("v3".into()),
            ..Default::default()
        };
        let routed = CanaryRouter.route(
            &criteria,
            vec![
                instance_with_canary("stable", None),
                instance_with_canary("canary", Some("v2")),
            ],
        );
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].id, "stable");
    }

    #[test]
    fn regular_caller_never_sees_canaries() {
        let routed = CanaryRouter.route(
            &RouteCriteria::default(),
            vec![
                instance_with_canary("stable", None),
                instance_with_canary("canary", Some("v2")),
            ],
        );
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].id, "stable");
    }
}
