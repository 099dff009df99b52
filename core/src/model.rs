//! Data model: service keys, instances and service-data snapshots

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

/// Identifies a logical service: `(namespace, name)`
///
/// Both parts are case-sensitive, non-empty and otherwise opaque.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceKey {
    pub namespace: String,
    pub name: String,
}

impl ServiceKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// True when either part is empty (and the key therefore invalid)
    pub fn is_empty(&self) -> bool {
        self.namespace.is_empty() || self.name.is_empty()
    }
}

impl std::fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Health as reported by the control plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HealthStatus {
    Up,
    Down,
    #[default]
    Unknown,
}

/// A single service instance
///
/// `id` is assigned by the control plane at registration and stays stable
/// for the instance's lifetime.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub weight: u32,
    pub metadata: HashMap<String, String>,
    pub health: HealthStatus,
    pub isolate: bool,
}

impl Instance {
    pub fn new(id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
            weight: DEFAULT_INSTANCE_WEIGHT,
            metadata: HashMap::new(),
            health: HealthStatus::Unknown,
            isolate: false,
        }
    }
}

/// Weight assigned when the control plane reports none
pub const DEFAULT_INSTANCE_WEIGHT: u32 = 100;

/// Which flavour of service data a snapshot carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceDataKind {
    Instances,
    RouteRule,
}

impl std::fmt::Display for ServiceDataKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ServiceDataKind::Instances => "instances",
            ServiceDataKind::RouteRule => "route-rule",
        })
    }
}

/// One routing rule: a destination filter expressed as metadata to match
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteRule {
    pub metadata: HashMap<String, String>,
    pub priority: u32,
}

/// Payload of a [`ServiceData`] snapshot
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceDataValue {
    Instances(Vec<Instance>),
    RouteRule(Vec<RouteRule>),
}

/// A versioned snapshot of one service's instance list or routing rules
///
/// Immutable once published; the local registry replaces whole snapshots
/// atomically and readers hold `Arc` references to the version they saw.
/// `revision` is monotone per `(key, kind)` as far as the control plane is
/// concerned; stale pushes are rejected by the local registry.
#[derive(Debug, Clone)]
pub struct ServiceData {
    pub key: ServiceKey,
    pub kind: ServiceDataKind,
    pub revision: String,
    pub fetch_time: SystemTime,
    pub value: ServiceDataValue,
}

impl ServiceData {
    /// Instance-list snapshot
    pub fn instances(key: ServiceKey, revision: impl Into<String>, instances: Vec<Instance>) -> Self {
        Self {
            key,
            kind: ServiceDataKind::Instances,
            revision: revision.into(),
            fetch_time: SystemTime::now(),
            value: ServiceDataValue::Instances(instances),
        }
    }

    /// Routing-rule snapshot
    pub fn route_rules(key: ServiceKey, revision: impl Into<String>, rules: Vec<RouteRule>) -> Self {
        Self {
            key,
            kind: ServiceDataKind::RouteRule,
            revision: revision.into(),
            fetch_time: SystemTime::now(),
            value: ServiceDataValue::RouteRule(rules),
        }
    }

    /// The instance list, empty for rule snapshots
    pub fn instance_list(&self) -> &[Instance] {
        match &self.value {
            ServiceDataValue::Instances(list) => list,
            ServiceDataValue::RouteRule(_) => &[],
        }
    }
}

/// Whether `new` supersedes `old`
///
/// Revisions are numeric where the control plane emits counters; anything
/// non-numeric falls back to lexicographic order. Equal revisions are not
/// newer.
pub fn revision_newer(old: &str, new: &str) -> bool {
    match (old.parse::<u64>(), new.parse::<u64>()) {
        (Ok(o), Ok(n)) => n > o,
        _ => new > old,
    }
}

/// Handler invoked with each service-data push from the control plane
pub type ServiceDataHandler = Arc<dyn Fn(ServiceData) + Send + Sync>;
