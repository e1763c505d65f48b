//! Connectors - uniform access to external data systems
//!
//! A [`Connector`] wraps one external system (SQL database, REST service,
//! data catalog) behind a small lifecycle and a named-operation dispatch.
//! Connectors are owned by the [`ConnectorRegistry`]; tools and the gateway only reach them
//! through it.

pub mod catalog;
pub mod factory;
pub mod registry;
pub mod rest;
pub mod sql;
pub mod types;

pub use catalog::CatalogConnector;
pub use factory::{create, load_from_config};
pub use registry::ConnectorRegistry;
pub use rest::RestConnector;
pub use sql::SqlConnector;
pub use types::{
    ConnectorDescriptor, ConnectorResult, ConnectorStatus, ConnectorType, DEFAULT_TABLE_ROWS,
};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ConnectorError;

/// Interface implemented by every connector.
///
/// Methods take `&self`; implementations keep connection state behind
/// interior mutability so a connector can be shared as `Arc<dyn Connector>`.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Unique instance name (the key in the registry).
    fn name(&self) -> &str;

    fn connector_type(&self) -> ConnectorType;

    /// Operations accepted by [`Connector::execute`].
    fn capabilities(&self) -> Vec<String>;

    /// Establish the connection or validate configuration.
    async fn connect(&self) -> Result<(), ConnectorError>;

    /// Release held resources. Disconnecting twice is a no-op.
    async fn disconnect(&self) -> Result<(), ConnectorError>;

    fn is_connected(&self) -> bool;

    /// Probe the external system.
    async fn health_check(&self) -> ConnectorStatus;

    /// Run a named operation with JSON parameters.
    async fn execute(
        &self,
        operation: &str,
        params: Value,
    ) -> Result<ConnectorResult, ConnectorError>;

    fn supports(&self, operation: &str) -> bool {
        self.capabilities().iter().any(|c| c == operation)
    }

    /// Static description. The registry fills in `status` from its health
    /// cache.
    fn descriptor(&self) -> ConnectorDescriptor {
        ConnectorDescriptor {
            name: self.name().to_string(),
            connector_type: self.connector_type(),
            connected: self.is_connected(),
            capabilities: self.capabilities(),
            status: None,
        }
    }
}
