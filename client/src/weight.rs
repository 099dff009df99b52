//! Weight adjustment

use tracing::debug;

use polaris_core::{Instance, WeightAdjuster, DEFAULT_INSTANCE_WEIGHT};

/// Default adjuster: repairs degenerate weight sets
///
/// A snapshot where every instance reports weight zero would starve the
/// weighted balancer into its uniform fallback silently; this resets such
/// sets to the base weight instead so operators see the repair in the log.
pub struct DefaultWeightAdjuster;

impl WeightAdjuster for DefaultWeightAdjuster {
    fn name(&self) -> &str {
        "defaultWeightAdjuster"
    }

    fn adjust_weights(&self, instances: &mut [Instance]) -> bool {
        if instances.is_empty() || instances.iter().any(|instance| instance.weight > 0) {
            return false;
        }
        for instance in instances.iter_mut() {
            instance.weight = DEFAULT_INSTANCE_WEIGHT;
        }
        debug!(
            count = instances.len(),
            "all-zero weights reset to the default"
        );
        true
    }
}
