//! Connector construction from configuration.
//!
//! An explicit table of config `type` strings to constructors. Types that
//! are recognised but have no built-in client fail with an error naming the
//! client they would need.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};

use super::catalog::CatalogConnector;
use super::registry::ConnectorRegistry;
use super::rest::RestConnector;
use super::sql::SqlConnector;
use super::types::ConnectorType;
use super::Connector;
use crate::config::ConnectorConfig;
use crate::error::ConnectorError;

/// Build the connector named `name` from its config.
pub fn create(name: &str, config: &ConnectorConfig) -> Result<Arc<dyn Connector>, ConnectorError> {
    let connector_type: ConnectorType = config
        .connector_type
        .parse()
        .map_err(|e: String| ConnectorError::NotConfigured(name.to_string(), e))?;

    match connector_type {
        ConnectorType::RestApi => Ok(Arc::new(RestConnector::new(name, config.clone()))),
        ConnectorType::Catalog => Ok(Arc::new(CatalogConnector::new(name, config.clone()))),
        ConnectorType::Sql => Ok(Arc::new(SqlConnector::new(name, config.clone())?)),
        ConnectorType::Streaming => Err(missing_client(name, "a Kafka client")),
        ConnectorType::Processing => Err(missing_client(name, "a Spark client")),
    }
}

fn missing_client(name: &str, client: &str) -> ConnectorError {
    ConnectorError::NotConfigured(
        name.to_string(),
        format!("this build has no built-in {}", client),
    )
}

/// Create and register every configured connector.
///
/// Returns the per-connector construction failures; the successful ones are
/// registered regardless.
pub fn load_from_config(
    registry: &ConnectorRegistry,
    instances: &BTreeMap<String, ConnectorConfig>,
) -> BTreeMap<String, ConnectorError> {
    let mut failures = BTreeMap::new();
    let mut loaded = 0usize;
    for (name, cfg) in instances {
        match create(name, cfg).and_then(|c| registry.register(c)) {
            Ok(()) => loaded += 1,
            Err(e) => {
                warn!(connector = %name, error = %e, "Failed to create connector");
                failures.insert(name.clone(), e);
            }
        }
    }
    if loaded > 0 {
        info!(count = loaded, "Loaded connectors from config");
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(kind: &str) -> ConnectorConfig {
        ConnectorConfig {
            connector_type: kind.to_string(),
            base_url: "http://localhost:9".into(),
            ..ConnectorConfig::default()
        }
    }

    #[test]
    fn test_create_known_types() {
        let rest = create("airflow", &cfg("rest_api")).unwrap();
        assert_eq!(rest.connector_type(), ConnectorType::RestApi);
        let catalog = create("iceberg", &cfg("catalog")).unwrap();
        assert_eq!(catalog.connector_type(), ConnectorType::Catalog);
        assert_eq!(catalog.name(), "iceberg");
        let sql = create("warehouse", &cfg("sql")).unwrap();
        assert_eq!(sql.connector_type(), ConnectorType::Sql);
        assert!(!sql.supports("execute_write"));
    }

    #[test]
    fn test_sql_driver_without_client() {
        let config = ConnectorConfig {
            driver: "postgresql".into(),
            ..cfg("sql")
        };
        let err = create("pg", &config).err().unwrap();
        assert!(err.to_string().contains("no built-in SQL driver for 'postgresql'"));
    }

    #[test]
    fn test_aliases_name_missing_client() {
        let err = create("events", &cfg("kafka")).err().unwrap();
        assert!(err.to_string().contains("Kafka client"));
        let err = create("jobs", &cfg("spark")).err().unwrap();
        assert!(err.to_string().contains("Spark client"));
    }

    #[test]
    fn test_unknown_type() {
        let err = create("x", &cfg("mongo")).err().unwrap();
        assert!(err.to_string().contains("unknown connector type 'mongo'"));
    }

    #[test]
    fn test_load_from_config_reports_failures() {
        let registry = ConnectorRegistry::new();
        let mut instances = BTreeMap::new();
        instances.insert("airflow".to_string(), cfg("rest_api"));
        instances.insert("events".to_string(), cfg("streaming"));

        let failures = load_from_config(&registry, &instances);
        assert_eq!(registry.list_names(), vec!["airflow"]);
        assert_eq!(failures.len(), 1);
        assert!(failures.contains_key("events"));
    }
}
