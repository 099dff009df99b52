//! In-memory service data cache
//!
//! One entry per `(key, kind)`. The first reader of a key triggers a
//! connector subscription and waits — bounded by its own budget — for the
//! first snapshot to land. After that reads are cheap: clone an `Arc`
//! under a read lock. Updates are serialised: the writer checks revision
//! monotonicity, lets pre-update observers see `(old, new)` and only then
//! publishes, so a snapshot reachable by any reader is never mutated and
//! old snapshots die when their last reference drops.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, warn};

use polaris_core::{
    revision_newer, Config, LocalRegistry, PolarisError, PolarisResult, PreUpdateDispatcher,
    ServerConnector, ServiceData, ServiceDataKind, ServiceKey,
};

struct CacheEntry {
    snapshot: Option<Arc<ServiceData>>,
    /// Bumped on every publish; waiters watch it
    publish_tx: watch::Sender<u64>,
    subscribed: bool,
}

impl CacheEntry {
    fn new() -> Self {
        let (publish_tx, _) = watch::channel(0);
        Self {
            snapshot: None,
            publish_tx,
            subscribed: false,
        }
    }
}

struct RegistryInner {
    entries: RwLock<HashMap<(ServiceKey, ServiceDataKind), CacheEntry>>,
    /// Serialises the check-dispatch-publish sequence across writers
    update_lock: Mutex<()>,
    connector: RwLock<Option<Arc<dyn ServerConnector>>>,
    pre_update: RwLock<Option<PreUpdateDispatcher>>,
}

/// The built-in `inmemory` local registry
pub struct InMemoryRegistry {
    inner: Arc<RegistryInner>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                entries: RwLock::new(HashMap::new()),
                update_lock: Mutex::new(()),
                connector: RwLock::new(None),
                pre_update: RwLock::new(None),
            }),
        }
    }

    /// Subscribe upstream for `(key, kind)` unless already done
    fn ensure_subscribed(&self, key: &ServiceKey, kind: ServiceDataKind) -> PolarisResult<()> {
        {
            let entries = self.inner.entries.read();
            if entries
                .get(&(key.clone(), kind))
                .is_some_and(|entry| entry.subscribed)
            {
                return Ok(());
            }
        }
        let connector = self
            .inner
            .connector
            .read()
            .clone()
            .ok_or_else(|| PolarisError::Plugin("local registry not initialised".into()))?;

        let mut entries = self.inner.entries.write();
        let entry = entries
            .entry((key.clone(), kind))
            .or_insert_with(CacheEntry::new);
        if entry.subscribed {
            return Ok(());
        }
        let inner = Arc::clone(&self.inner);
        connector.subscribe_service_data(
            key.clone(),
            kind,
            Arc::new(move |data| apply_update(&inner, data)),
        )?;
        entry.subscribed = true;
        debug!(service = %key, kind = %kind, "subscribed for service data");
        Ok(())
    }
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_update(inner: &Arc<RegistryInner>, data: ServiceData) {
    let _update_guard = inner.update_lock.lock();

    let key = (data.key.clone(), data.kind);
    let old = {
        let entries = inner.entries.read();
        entries.get(&key).and_then(|entry| entry.snapshot.clone())
    };
    if let Some(old) = &old {
        if !revision_newer(&old.revision, &data.revision) {
            warn!(
                service = %data.key,
                kind = %data.kind,
                current = %old.revision,
                pushed = %data.revision,
                "stale service data push dropped"
            );
            return;
        }
        // Observers run before the new snapshot becomes visible and while
        // the old one is still reachable.
        if let Some(dispatch) = inner.pre_update.read().clone() {
            dispatch(old, &data);
        }
    }

    let mut entries = inner.entries.write();
    let entry = entries.entry(key).or_insert_with(CacheEntry::new);
    entry.snapshot = Some(Arc::new(data));
    let published = *entry.publish_tx.borrow() + 1;
    let _ = entry.publish_tx.send(published);
}

#[async_trait]
impl LocalRegistry for InMemoryRegistry {
    fn name(&self) -> &str {
        "inmemory"
    }

    fn init(
        &self,
        _config: &Config,
        connector: Arc<dyn ServerConnector>,
        pre_update: PreUpdateDispatcher,
    ) -> PolarisResult<()> {
        *self.inner.connector.write() = Some(connector);
        *self.inner.pre_update.write() = Some(pre_update);
        Ok(())
    }

    async fn get_service_data(
        &self,
        key: &ServiceKey,
        kind: ServiceDataKind,
        timeout: Duration,
    ) -> PolarisResult<Arc<ServiceData>> {
        if let Some(snapshot) = self.peek_service_data(key, kind) {
            return Ok(snapshot);
        }
        self.ensure_subscribed(key, kind)?;

        let mut publish_rx = {
            let entries = self.inner.entries.read();
            let entry = entries
                .get(&(key.clone(), kind))
                .ok_or_else(|| PolarisError::Unknown("cache entry vanished".into()))?;
            // A snapshot may have landed between peek and subscribe
            if let Some(snapshot) = &entry.snapshot {
                return Ok(Arc::clone(snapshot));
            }
            entry.publish_tx.subscribe()
        };

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())
                .unwrap_or(Duration::ZERO);
            if remaining.is_zero()
                || tokio::time::timeout(remaining, publish_rx.changed())
                    .await
                    .is_err()
            {
                return Err(PolarisError::NetworkFailed(format!(
                    "no service data for {key} within {}ms",
                    timeout.as_millis()
                )));
            }
            if let Some(snapshot) = self.peek_service_data(key, kind) {
                return Ok(snapshot);
            }
        }
    }

    fn peek_service_data(
        &self,
        key: &ServiceKey,
        kind: ServiceDataKind,
    ) -> Option<Arc<ServiceData>> {
        let entries = self.inner.entries.read();
        entries
            .get(&(key.clone(), kind))
            .and_then(|entry| entry.snapshot.clone())
    }

    fn update_service_data(&self, data: ServiceData) {
        apply_update(&self.inner, data);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use polaris_core::{
        Instance, InstanceDeregisterRequest, InstanceHeartbeatRequest, InstanceRegisterRequest,
        ServiceDataHandler,
    };

    /// Connector stub that records subscriptions and lets tests push data
    struct StubConnector {
        handlers: Mutex<HashMap<(ServiceKey, ServiceDataKind), ServiceDataHandler>>,
        subscribe_count: Mutex<u32>,
    }

    impl StubConnector {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                handlers: Mutex::new(HashMap::new()),
                subscribe_count: Mutex::new(0),
            })
        }

        fn push(&self, data: ServiceData) {
            let handler = self
                .handlers
                .lock()
                .get(&(data.key.clone(), data.kind))
                .cloned();
            if let Some(handler) = handler {
                handler(data);
            }
        }
    }

    #[async_trait]
    impl ServerConnector for StubConnector {
        fn name(&self) -> &str {
            "stub"
        }

        async fn register_instance(
            &self,
            _req: &InstanceRegisterRequest,
            _timeout: Duration,
        ) -> PolarisResult<String> {
            Err(PolarisError::Unknown("not wired".into()))
        }

        async fn deregister_instance(
            &self,
            _req: &InstanceDeregisterRequest,
            _timeout: Duration,
        ) -> PolarisResult<()> {
            Err(PolarisError::Unknown("not wired".into()))
        }

        async fn instance_heartbeat(
            &self,
            _req: &InstanceHeartbeatRequest,
            _timeout: Duration,
        ) -> PolarisResult<()> {
            Err(PolarisError::Unknown("not wired".into()))
        }

        fn subscribe_service_data(
            &self,
            key: ServiceKey,
            kind: ServiceDataKind,
            handler: ServiceDataHandler,
        ) -> PolarisResult<()> {
            *self.subscribe_count.lock() += 1;
            self.handlers.lock().insert((key, kind), handler);
            Ok(())
        }

        fn unsubscribe(&self, key: &ServiceKey, kind: ServiceDataKind) -> PolarisResult<()> {
            self.handlers.lock().remove(&(key.clone(), kind));
            Ok(())
        }
    }

    fn setup() -> (InMemoryRegistry, Arc<StubConnector>) {
        let registry = InMemoryRegistry::new();
        let connector = StubConnector::new();
        registry
            .init(&Config::default(), connector.clone(), Arc::new(|_, _| {}))
            .unwrap();
        (registry, connector)
    }

    fn snapshot(revision: &str, ids: &[&str]) -> ServiceData {
        ServiceData::instances(
            ServiceKey::new("Test", "echo"),
            revision,
            ids.iter()
                .map(|id| Instance::new(*id, "10.0.0.1", 80))
                .collect(),
        )
    }

    #[tokio::test]
    async fn first_read_subscribes_and_waits_for_the_snapshot() {
        let (registry, connector) = setup();
        let key = ServiceKey::new("Test", "echo");

        let registry = Arc::new(registry);
        let reader = {
            let registry = registry.clone();
            let key = key.clone();
            tokio::spawn(async move {
                registry
                    .get_service_data(&key, ServiceDataKind::Instances, Duration::from_secs(2))
                    .await
            })
        };
        // Let the reader subscribe, then push
        tokio::time::sleep(Duration::from_millis(20)).await;
        connector.push(snapshot("1", &["a", "b"]));

        let data = reader.await.unwrap().unwrap();
        assert_eq!(data.revision, "1");
        assert_eq!(data.instance_list().len(), 2);
        assert_eq!(*connector.subscribe_count.lock(), 1);
    }

    #[tokio::test]
    async fn second_read_hits_the_cache() {
        let (registry, connector) = setup();
        let key = ServiceKey::new("Test", "echo");
        registry.update_service_data(snapshot("1", &["a"]));

        let data = registry
            .get_service_data(&key, ServiceDataKind::Instances, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(data.revision, "1");
        assert_eq!(*connector.subscribe_count.lock(), 0, "no fetch needed");
    }

    #[tokio::test(start_paused = true)]
    async fn read_times_out_without_data() {
        let (registry, _connector) = setup();
        let key = ServiceKey::new("Test", "missing");
        let err = registry
            .get_service_data(&key, ServiceDataKind::Instances, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err.code(), polaris_core::ReturnCode::NetworkFailed);
    }

    #[tokio::test]
    async fn stale_revision_is_dropped() {
        let (registry, _connector) = setup();
        let key = ServiceKey::new("Test", "echo");
        registry.update_service_data(snapshot("5", &["a", "b"]));
        registry.update_service_data(snapshot("4", &["c"]));
        registry.update_service_data(snapshot("5", &["c"]));

        let data = registry
            .peek_service_data(&key, ServiceDataKind::Instances)
            .unwrap();
        assert_eq!(data.revision, "5");
        assert_eq!(data.instance_list().len(), 2, "stale pushes must not land");
    }

    #[tokio::test]
    async fn readers_keep_their_snapshot_across_updates() {
        let (registry, _connector) = setup();
        let key = ServiceKey::new("Test", "echo");
        registry.update_service_data(snapshot("1", &["a"]));
        let held = registry
            .peek_service_data(&key, ServiceDataKind::Instances)
            .unwrap();

        registry.update_service_data(snapshot("2", &["a", "b", "c"]));
        // The held reference still sees revision 1, untouched
        assert_eq!(held.revision, "1");
        assert_eq!(held.instance_list().len(), 1);
        let fresh = registry
            .peek_service_data(&key, ServiceDataKind::Instances)
            .unwrap();
        assert_eq!(fresh.revision, "2");
    }

    #[tokio::test]
    async fn observers_see_old_and_new_in_revision_order() {
        let registry = InMemoryRegistry::new();
        let connector = StubConnector::new();
        let seen: Arc<Mutex<Vec<(String, String)>>> = Arc::new(Mutex::new(Vec::new()));
        let record = seen.clone();
        registry
            .init(
                &Config::default(),
                connector,
                Arc::new(move |old: &ServiceData, new: &ServiceData| {
                    record
                        .lock()
                        .push((old.revision.clone(), new.revision.clone()));
                }),
            )
            .unwrap();

        registry.update_service_data(snapshot("1", &["a"]));
        registry.update_service_data(snapshot("2", &["b"]));
        registry.update_service_data(snapshot("3", &["c"]));

        let pairs = seen.lock().clone();
        // No observer for the first publish (nothing to compare against)
        assert_eq!(pairs, vec![("1".into(), "2".into()), ("2".into(), "3".into())]);
    }

    #[tokio::test]
    async fn kinds_are_cached_independently() {
        let (registry, _connector) = setup();
        let key = ServiceKey::new("Test", "echo");
        registry.update_service_data(snapshot("1", &["a"]));
        registry.update_service_data(ServiceData::route_rules(key.clone(), "7", Vec::new()));

        assert_eq!(
            registry
                .peek_service_data(&key, ServiceDataKind::Instances)
                .unwrap()
                .revision,
            "1"
        );
        assert_eq!(
            registry
                .peek_service_data(&key, ServiceDataKind::RouteRule)
                .unwrap()
                .revision,
            "7"
        );
    }
}
