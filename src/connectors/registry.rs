//! Connector registry: lifecycle, lookup, dispatch and cached health.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::types::{ConnectorDescriptor, ConnectorResult, ConnectorStatus, ConnectorType};
use super::Connector;
use crate::error::ConnectorError;

/// Default freshness window for cached health.
pub const DEFAULT_HEALTH_TTL: Duration = Duration::from_secs(30);

/// Default upper bound for one health probe.
pub const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy)]
struct HealthEntry {
    status: ConnectorStatus,
    checked_at: Instant,
}

/// Registry of named connectors.
///
/// Locks are never held across an `.await`: operations clone the connector
/// handles they need and release the map first. Connector lifecycle calls run
/// on their own tasks, so a panicking connector is recorded as a failure
/// instead of tearing down a batch.
pub struct ConnectorRegistry {
    connectors: RwLock<BTreeMap<String, Arc<dyn Connector>>>,
    health: Mutex<HashMap<String, HealthEntry>>,
    health_ttl: Duration,
    probe_timeout: Duration,
}

impl Default for ConnectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::with_health_settings(DEFAULT_HEALTH_TTL, DEFAULT_HEALTH_TIMEOUT)
    }

    pub fn with_health_settings(health_ttl: Duration, probe_timeout: Duration) -> Self {
        Self {
            connectors: RwLock::new(BTreeMap::new()),
            health: Mutex::new(HashMap::new()),
            health_ttl,
            probe_timeout,
        }
    }

    // ------------------------------------------------------------------
    // Registration and lookup
    // ------------------------------------------------------------------

    /// Register a connector under its own name.
    pub fn register(&self, connector: Arc<dyn Connector>) -> Result<(), ConnectorError> {
        let name = connector.name().to_string();
        let mut map = self.write_map();
        if map.contains_key(&name) {
            return Err(ConnectorError::AlreadyRegistered(name));
        }
        debug!(
            connector = %name,
            connector_type = %connector.connector_type(),
            "Registered connector"
        );
        map.insert(name, connector);
        Ok(())
    }

    /// Disconnect and remove a connector.
    pub async fn deregister(&self, name: &str) -> Result<(), ConnectorError> {
        let connector = self.lookup(name)?;
        if connector.is_connected() {
            if let Err(e) = disconnect_contained(Arc::clone(&connector)).await {
                warn!(connector = %name, error = %e, "Disconnect during deregister failed");
            }
        }
        self.write_map().remove(name);
        self.health_cache().remove(name);
        debug!(connector = %name, "Deregistered connector");
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Connector>> {
        self.read_map().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read_map().contains_key(name)
    }

    /// Descriptor of `name`; `status` is the cached health if still fresh.
    pub fn get_descriptor(&self, name: &str) -> Option<ConnectorDescriptor> {
        self.get(name).map(|c| self.describe(c.as_ref()))
    }

    /// Descriptors of every connector, sorted by name.
    pub fn descriptors(&self) -> Vec<ConnectorDescriptor> {
        self.snapshot()
            .iter()
            .map(|c| self.describe(c.as_ref()))
            .collect()
    }

    fn describe(&self, connector: &dyn Connector) -> ConnectorDescriptor {
        ConnectorDescriptor {
            status: self.cached_health(connector.name()),
            ..connector.descriptor()
        }
    }

    pub fn list_names(&self) -> Vec<String> {
        self.read_map().keys().cloned().collect()
    }

    pub fn by_type(&self, connector_type: ConnectorType) -> Vec<Arc<dyn Connector>> {
        self.snapshot()
            .into_iter()
            .filter(|c| c.connector_type() == connector_type)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read_map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_map().is_empty()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Connect one connector and probe it once.
    ///
    /// A failed connect is recorded as `Unreachable`; the connector stays
    /// registered.
    pub async fn connect(&self, name: &str) -> Result<ConnectorStatus, ConnectorError> {
        let connector = self.lookup(name)?;
        Ok(self.connect_one(connector).await)
    }

    /// Disconnect one connector. A disconnected connector is left alone.
    pub async fn disconnect(&self, name: &str) -> Result<(), ConnectorError> {
        let connector = self.lookup(name)?;
        if !connector.is_connected() {
            return Ok(());
        }
        let result = disconnect_contained(connector).await;
        self.health_cache().remove(name);
        result
    }

    /// Connect every connector concurrently.
    ///
    /// One connector's failure never aborts the batch; the returned map holds
    /// each connector's resulting status.
    pub async fn connect_all(&self) -> BTreeMap<String, ConnectorStatus> {
        let connectors = self.snapshot();
        let outcomes = join_all(connectors.into_iter().map(|c| async move {
            let name = c.name().to_string();
            let status = self.connect_one(c).await;
            (name, status)
        }))
        .await;

        let results: BTreeMap<String, ConnectorStatus> = outcomes.into_iter().collect();
        let healthy = results.values().filter(|s| s.is_healthy()).count();
        info!(
            connectors = results.len(),
            healthy, "Connected registered connectors"
        );
        results
    }

    /// Disconnect every connected connector concurrently.
    pub async fn disconnect_all(&self) -> BTreeMap<String, Result<(), ConnectorError>> {
        let connectors = self.snapshot();
        let outcomes = join_all(connectors.into_iter().map(|c| async move {
            let name = c.name().to_string();
            let result = if c.is_connected() {
                disconnect_contained(c).await
            } else {
                Ok(())
            };
            if let Err(ref e) = result {
                warn!(connector = %name, error = %e, "Connector disconnect failed");
            }
            (name, result)
        }))
        .await;
        self.health_cache().clear();
        outcomes.into_iter().collect()
    }

    async fn connect_one(&self, connector: Arc<dyn Connector>) -> ConnectorStatus {
        let name = connector.name().to_string();
        let task = {
            let c = Arc::clone(&connector);
            async move { c.connect().await }
        };
        let status = match contained(&name, task).await {
            Some(Ok(())) => self.probe(&connector).await,
            Some(Err(e)) => {
                warn!(connector = %name, error = %e, "Connector failed to connect");
                ConnectorStatus::Unreachable
            }
            None => ConnectorStatus::Unreachable,
        };
        self.record(&name, status);
        info!(connector = %name, status = %status, "Connector connected");
        status
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Run `operation` on connector `name`.
    pub async fn execute(
        &self,
        name: &str,
        operation: &str,
        params: Value,
    ) -> Result<ConnectorResult, ConnectorError> {
        let connector = self.lookup(name)?;
        if !connector.supports(operation) {
            return Err(ConnectorError::UnsupportedOperation {
                connector: name.to_string(),
                operation: operation.to_string(),
                supported: connector.capabilities().join(", "),
            });
        }
        debug!(connector = %name, operation = %operation, "Executing connector operation");
        connector.execute(operation, params).await
    }

    // ------------------------------------------------------------------
    // Health
    // ------------------------------------------------------------------

    /// Health of every connector.
    ///
    /// Entries younger than the TTL are served from cache; the rest are
    /// probed concurrently, each probe bounded by the probe timeout.
    pub async fn health_check_all(&self) -> BTreeMap<String, ConnectorStatus> {
        let mut results = BTreeMap::new();
        let mut stale = Vec::new();
        {
            let cache = self.health_cache();
            for connector in self.snapshot() {
                match cache.get(connector.name()) {
                    Some(entry) if entry.checked_at.elapsed() < self.health_ttl => {
                        results.insert(connector.name().to_string(), entry.status);
                    }
                    _ => stale.push(connector),
                }
            }
        }

        let probed = join_all(stale.iter().map(|c| async move {
            (c.name().to_string(), self.probe(c).await)
        }))
        .await;

        for (name, status) in probed {
            self.record(&name, status);
            results.insert(name, status);
        }
        results
    }

    /// Cached status for `name` without probing, if younger than the TTL.
    pub fn cached_health(&self, name: &str) -> Option<ConnectorStatus> {
        self.health_cache()
            .get(name)
            .filter(|e| e.checked_at.elapsed() < self.health_ttl)
            .map(|e| e.status)
    }

    /// Force the next health read of `name` to probe.
    pub fn invalidate_health(&self, name: &str) {
        self.health_cache().remove(name);
    }

    async fn probe(&self, connector: &Arc<dyn Connector>) -> ConnectorStatus {
        let timeout = self.probe_timeout;
        let task = {
            let c = Arc::clone(connector);
            async move { tokio::time::timeout(timeout, c.health_check()).await }
        };
        match contained(connector.name(), task).await {
            Some(Ok(status)) => status,
            Some(Err(_)) => {
                warn!(
                    connector = %connector.name(),
                    timeout_secs = timeout.as_secs_f64(),
                    "Health probe timed out"
                );
                ConnectorStatus::Unreachable
            }
            None => ConnectorStatus::Unreachable,
        }
    }

    fn record(&self, name: &str, status: ConnectorStatus) {
        self.health_cache().insert(
            name.to_string(),
            HealthEntry {
                status,
                checked_at: Instant::now(),
            },
        );
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn lookup(&self, name: &str) -> Result<Arc<dyn Connector>, ConnectorError> {
        let map = self.read_map();
        map.get(name)
            .cloned()
            .ok_or_else(|| ConnectorError::NotFound {
                name: name.to_string(),
                available: if map.is_empty() {
                    "(none)".to_string()
                } else {
                    map.keys().cloned().collect::<Vec<_>>().join(", ")
                },
            })
    }

    fn snapshot(&self) -> Vec<Arc<dyn Connector>> {
        self.read_map().values().cloned().collect()
    }

    fn read_map(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Arc<dyn Connector>>> {
        self.connectors
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_map(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Arc<dyn Connector>>> {
        self.connectors
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn health_cache(&self) -> std::sync::MutexGuard<'_, HashMap<String, HealthEntry>> {
        self.health
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Run `task` on its own tokio task. `None` means the connector panicked.
async fn contained<T>(name: &str, task: impl Future<Output = T> + Send + 'static) -> Option<T>
where
    T: Send + 'static,
{
    match tokio::spawn(task).await {
        Ok(value) => Some(value),
        Err(e) => {
            error!(connector = %name, error = %e, "Connector task panicked");
            None
        }
    }
}

async fn disconnect_contained(connector: Arc<dyn Connector>) -> Result<(), ConnectorError> {
    let name = connector.name().to_string();
    let task = async move { connector.disconnect().await };
    let outcome = contained(&name, task).await;
    outcome.unwrap_or_else(|| Err(ConnectorError::Failed(name, "disconnect panicked".into())))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Scriptable connector that counts probes.
    pub(crate) struct MockConnector {
        name: String,
        connected: AtomicBool,
        pub probes: AtomicUsize,
        pub connects: AtomicUsize,
        fail_connect: bool,
        panics: bool,
        probe_delay: Option<Duration>,
        status: ConnectorStatus,
    }

    impl MockConnector {
        pub(crate) fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                connected: AtomicBool::new(false),
                probes: AtomicUsize::new(0),
                connects: AtomicUsize::new(0),
                fail_connect: false,
                panics: false,
                probe_delay: None,
                status: ConnectorStatus::Healthy,
            }
        }

        pub(crate) fn failing(name: &str) -> Self {
            Self {
                fail_connect: true,
                ..Self::new(name)
            }
        }

        /// Panics in `connect` and `health_check`.
        pub(crate) fn panicking(name: &str) -> Self {
            Self {
                panics: true,
                ..Self::new(name)
            }
        }

        pub(crate) fn slow(name: &str, delay: Duration) -> Self {
            Self {
                probe_delay: Some(delay),
                ..Self::new(name)
            }
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        fn name(&self) -> &str {
            &self.name
        }

        fn connector_type(&self) -> ConnectorType {
            ConnectorType::Sql
        }

        fn capabilities(&self) -> Vec<String> {
            vec!["query".into(), "echo".into()]
        }

        async fn connect(&self) -> Result<(), ConnectorError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.panics {
                panic!("driver crashed while connecting");
            }
            if self.fail_connect {
                return Err(ConnectorError::Unreachable(
                    self.name.clone(),
                    "connection refused".into(),
                ));
            }
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), ConnectorError> {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn health_check(&self) -> ConnectorStatus {
            self.probes.fetch_add(1, Ordering::SeqCst);
            if self.panics {
                panic!("driver crashed while probing");
            }
            if let Some(delay) = self.probe_delay {
                tokio::time::sleep(delay).await;
            }
            self.status
        }

        async fn execute(
            &self,
            operation: &str,
            params: Value,
        ) -> Result<ConnectorResult, ConnectorError> {
            match operation {
                "echo" => Ok(ConnectorResult::data(params)),
                _ => Ok(ConnectorResult::table(
                    vec!["n".into()],
                    vec![vec![json!(1)]],
                )),
            }
        }
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let registry = ConnectorRegistry::new();
        registry.register(Arc::new(MockConnector::new("wh"))).unwrap();
        let err = registry
            .register(Arc::new(MockConnector::new("wh")))
            .unwrap_err();
        assert_eq!(err, ConnectorError::AlreadyRegistered("wh".into()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_lookup_helpers() {
        let registry = ConnectorRegistry::new();
        registry.register(Arc::new(MockConnector::new("b"))).unwrap();
        registry.register(Arc::new(MockConnector::new("a"))).unwrap();
        assert_eq!(registry.list_names(), vec!["a", "b"]);
        assert_eq!(registry.by_type(ConnectorType::Sql).len(), 2);
        assert!(registry.by_type(ConnectorType::Catalog).is_empty());
        let d = registry.get_descriptor("a").unwrap();
        assert!(!d.connected);
        assert_eq!(d.status, None);
        assert_eq!(d.capabilities, vec!["query", "echo"]);
        assert!(registry.get_descriptor("zz").is_none());
    }

    #[tokio::test]
    async fn test_descriptor_status_follows_fresh_health() {
        let registry =
            ConnectorRegistry::with_health_settings(Duration::from_millis(30), DEFAULT_HEALTH_TIMEOUT);
        registry.register(Arc::new(MockConnector::new("wh"))).unwrap();
        registry
            .register(Arc::new(MockConnector::failing("down")))
            .unwrap();
        registry.connect_all().await;

        let descriptors = registry.descriptors();
        assert_eq!(descriptors[0].name, "down");
        assert_eq!(descriptors[0].status, Some(ConnectorStatus::Unreachable));
        assert_eq!(descriptors[1].status, Some(ConnectorStatus::Healthy));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(registry.get_descriptor("wh").unwrap().status, None);
    }

    #[tokio::test]
    async fn test_execute_not_found_lists_available() {
        let registry = ConnectorRegistry::new();
        registry.register(Arc::new(MockConnector::new("wh"))).unwrap();
        let err = registry.execute("nope", "query", json!({})).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Connector 'nope' not found. Available: wh"
        );
    }

    #[tokio::test]
    async fn test_execute_unsupported_operation() {
        let registry = ConnectorRegistry::new();
        registry.register(Arc::new(MockConnector::new("wh"))).unwrap();
        let err = registry.execute("wh", "drop", json!({})).await.unwrap_err();
        assert!(matches!(err, ConnectorError::UnsupportedOperation { .. }));
        assert!(err.to_string().contains("Supported: query, echo"));
    }

    #[tokio::test]
    async fn test_execute_dispatches() {
        let registry = ConnectorRegistry::new();
        registry.register(Arc::new(MockConnector::new("wh"))).unwrap();
        let result = registry
            .execute("wh", "echo", json!({"x": 1}))
            .await
            .unwrap();
        assert_eq!(result.data, Some(json!({"x": 1})));
    }

    #[tokio::test]
    async fn test_connect_all_isolates_failures() {
        let registry = ConnectorRegistry::new();
        registry.register(Arc::new(MockConnector::new("ok"))).unwrap();
        registry
            .register(Arc::new(MockConnector::failing("down")))
            .unwrap();

        let results = registry.connect_all().await;
        assert_eq!(results["ok"], ConnectorStatus::Healthy);
        assert_eq!(results["down"], ConnectorStatus::Unreachable);
        assert!(registry.contains("down"));
        assert_eq!(
            registry.cached_health("down"),
            Some(ConnectorStatus::Unreachable)
        );
    }

    #[tokio::test]
    async fn test_disconnect_is_noop_when_disconnected() {
        let registry = ConnectorRegistry::new();
        registry.register(Arc::new(MockConnector::new("wh"))).unwrap();
        registry.disconnect("wh").await.unwrap();
        registry.connect("wh").await.unwrap();
        assert!(registry.get_descriptor("wh").unwrap().connected);
        let results = registry.disconnect_all().await;
        assert!(results["wh"].is_ok());
        assert!(!registry.get_descriptor("wh").unwrap().connected);
    }

    #[tokio::test]
    async fn test_deregister() {
        let registry = ConnectorRegistry::new();
        let mock = Arc::new(MockConnector::new("wh"));
        registry.register(mock.clone()).unwrap();
        registry.connect("wh").await.unwrap();
        registry.deregister("wh").await.unwrap();
        assert!(!mock.is_connected());
        assert!(registry.is_empty());
        assert!(matches!(
            registry.deregister("wh").await,
            Err(ConnectorError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_health_cache_respects_ttl() {
        let registry =
            ConnectorRegistry::with_health_settings(Duration::from_secs(60), DEFAULT_HEALTH_TIMEOUT);
        let mock = Arc::new(MockConnector::new("wh"));
        registry.register(mock.clone()).unwrap();

        registry.health_check_all().await;
        registry.health_check_all().await;
        assert_eq!(mock.probes.load(Ordering::SeqCst), 1);

        registry.invalidate_health("wh");
        registry.health_check_all().await;
        assert_eq!(mock.probes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_expired_entries_are_reprobed() {
        let registry =
            ConnectorRegistry::with_health_settings(Duration::from_millis(20), DEFAULT_HEALTH_TIMEOUT);
        let mock = Arc::new(MockConnector::new("wh"));
        registry.register(mock.clone()).unwrap();

        registry.health_check_all().await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        registry.health_check_all().await;
        assert_eq!(mock.probes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cached_health_expires_with_ttl() {
        let registry =
            ConnectorRegistry::with_health_settings(Duration::from_millis(20), DEFAULT_HEALTH_TIMEOUT);
        registry.register(Arc::new(MockConnector::new("wh"))).unwrap();

        registry.health_check_all().await;
        assert_eq!(registry.cached_health("wh"), Some(ConnectorStatus::Healthy));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(registry.cached_health("wh"), None);
    }

    #[tokio::test]
    async fn test_panicking_connector_does_not_abort_batch() {
        let registry = ConnectorRegistry::new();
        registry.register(Arc::new(MockConnector::new("ok"))).unwrap();
        registry
            .register(Arc::new(MockConnector::panicking("boom")))
            .unwrap();

        let results = registry.connect_all().await;
        assert_eq!(results["ok"], ConnectorStatus::Healthy);
        assert_eq!(results["boom"], ConnectorStatus::Unreachable);

        registry.invalidate_health("boom");
        registry.invalidate_health("ok");
        let health = registry.health_check_all().await;
        assert_eq!(health["boom"], ConnectorStatus::Unreachable);
        assert_eq!(health["ok"], ConnectorStatus::Healthy);

        let disconnected = registry.disconnect_all().await;
        assert!(disconnected["ok"].is_ok());
        assert!(disconnected["boom"].is_ok());
    }

    #[tokio::test]
    async fn test_slow_probe_is_unreachable() {
        let registry = ConnectorRegistry::with_health_settings(
            DEFAULT_HEALTH_TTL,
            Duration::from_millis(50),
        );
        registry
            .register(Arc::new(MockConnector::slow("slow", Duration::from_secs(5))))
            .unwrap();
        registry.register(Arc::new(MockConnector::new("fast"))).unwrap();

        let started = Instant::now();
        let health = registry.health_check_all().await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(health["slow"], ConnectorStatus::Unreachable);
        assert_eq!(health["fast"], ConnectorStatus::Healthy);
    }
}
