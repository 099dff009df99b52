//! Locality preference routing

use parking_lot::RwLock;

use polaris_core::{Config, Instance, PolarisResult, RouteCriteria, ServiceRouter};

use super::metadata_keys;

#[derive(Default)]
struct CallerLocation {
    region: Option<String>,
    zone: Option<String>,
}

/// Prefers instances in the caller's zone, then region, then anywhere
///
/// The caller location comes from the per-request criteria when set, and
/// falls back to `global.api.location` from the configuration.
pub struct NearbyRouter {
    location: RwLock<CallerLocation>,
}

impl NearbyRouter {
    pub fn new() -> Self {
        Self {
            location: RwLock::new(CallerLocation::default()),
        }
    }
}

impl Default for NearbyRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceRouter for NearbyRouter {
    fn name(&self) -> &str {
        "nearbyRouter"
    }

    fn init(&self, config: &Config) -> PolarisResult<()> {
        let mut location = self.location.write();
        location.region = config.global.api.location.region.clone();
        location.zone = config.global.api.location.zone.clone();
        Ok(())
    }

    fn route(&self, criteria: &RouteCriteria, instances: Vec<Instance>) -> Vec<Instance> {
        let (region, zone) = {
            let location = self.location.read();
            (
                criteria.caller_region.clone().or_else(|| location.region.clone()),
                criteria.caller_zone.clone().or_else(|| location.zone.clone()),
            )
        };
        if let Some(zone) = &zone {
            let same_zone: Vec<_> = instances
                .iter()
                .filter(|i| i.metadata.get(metadata_keys::ZONE) == Some(zone))
                .cloned()
                .collect();
            if !same_zone.is_empty() {
                return same_zone;
            }
        }
        if let Some(region) = &region {
            let same_region: Vec<_> = instances
                .iter()
                .filter(|i| i.metadata.get(metadata_keys::REGION) == Some(region))
                .cloned()
                .collect();
            if !same_region.is_empty() {
                return same_region;
            }
        }
        instances
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn instance_at(id: &str, region: &str, zone: &str) -> Instance {
        let mut instance = Instance::new(id, "10.0.0.1", 80);
        instance
            .metadata
            .insert(metadata_keys::REGION.to_string(), region.to_string());
        instance
            .metadata
            .insert(metadata_keys::ZONE.to_string(), zone.to_string());
        instance
    }

    #[test]
    fn same_zone_wins() {
        let router = NearbyRouter::new();
        let criteria = RouteCriteria {
            caller_region: Some("south".into()),
            caller_zone: Some("south-1".into()),
            ..Default::default()
        };
        let routed = router.route(
            &criteria,
            vec![
                instance_at("a", "south", "south-1"),
                instance_at("b", "south", "south-2"),
                instance_at("c", "north", "north-1"),
            ],
        );
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].id, "a");
    }

    #[test]
    fn region_fallback_when_zone_empty() {
        let router = NearbyRouter::new();
        let criteria = RouteCriteria {
            caller_region: Some("south".into()),
            caller_zone: Some("south-9".into()),
            ..Default::default()
        };
        let routed = router.route(
            &criteria,
            vec![
                instance_at("a", "south", "south-1"),
                instance_at("c", "north", "north-1"),
            ],
        );
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].id, "a");
    }

    #[test]
    fn no_locality_passes_everything() {
        let router = NearbyRouter::new();
        let routed = router.route(
            &RouteCriteria::default(),
            vec![instance_at("a", "south", "south-1")],
        );
        assert_eq!(routed.len(), 1);
    }

    #[test]
    fn configured_location_applies_without_criteria() {
        let router = NearbyRouter::new();
        let config = Config::from_yaml(
            "global:\n  api:\n    location:\n      region: south\n      zone: south-2\n",
        )
        .unwrap();
        router.init(&config).unwrap();
        let routed = router.route(
            &RouteCriteria::default(),
            vec![
                instance_at("a", "south", "south-1"),
                instance_at("b", "south", "south-2"),
            ],
        );
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].id, "b");
    }
}
