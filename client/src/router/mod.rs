//! Service routing
//!
//! Routers filter the candidate instance list before load balancing. The
//! chain applies them in configured order; a router that would empty the
//! set is skipped so selection always has something to work with.

mod canary;
mod dst_meta;
mod nearby;
mod rule;
mod set_division;

pub use canary::CanaryRouter;
pub use dst_meta::DstMetaRouter;
pub use nearby::NearbyRouter;
pub use rule::RuleRouter;
pub use set_division::SetDivisionRouter;

use std::sync::Arc;

use tracing::debug;

use polaris_core::{Instance, RouteCriteria, ServiceRouter};

/// Instance metadata keys the built-in routers understand
pub mod metadata_keys {
    pub const REGION: &str = "region";
    pub const ZONE: &str = "zone";
    pub const SET: &str = "internal-set";
    pub const CANARY: &str = "canary";
}

/// Ordered router pipeline for one service
pub struct ServiceRouterChain {
    routers: Vec<Arc<dyn ServiceRouter>>,
}

impl ServiceRouterChain {
    pub fn new(routers: Vec<Arc<dyn ServiceRouter>>) -> Self {
        Self { routers }
    }

    /// Run every router over the list; a router producing an empty set is
    /// skipped and the previous candidates survive
    pub fn route(&self, criteria: &RouteCriteria, instances: Vec<Instance>) -> Vec<Instance> {
        let mut current = instances;
        for router in &self.routers {
            if current.is_empty() {
                break;
            }
            let routed = router.route(criteria, current.clone());
            if routed.is_empty() {
                debug!(
                    router = router.name(),
                    "router emptied the candidate set, keeping previous"
                );
                continue;
            }
            current = routed;
        }
        current
    }
}
