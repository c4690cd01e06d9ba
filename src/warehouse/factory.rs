//! Backend selection from configuration

use crate::config::{WarehouseBackend, WarehouseConfig};
use crate::error::Result;
use crate::warehouse::{InMemoryWarehouse, PostgresWarehouse, Warehouse};
use std::sync::Arc;

/// Create a warehouse based on configuration
pub async fn create_warehouse(config: &WarehouseConfig) -> Result<Arc<dyn Warehouse>> {
    match config.backend {
        WarehouseBackend::Postgres => {
            tracing::info!(
                host = %config.host,
                dbname = %config.dbname,
                "Initializing PostgreSQL warehouse backend"
            );
            let warehouse = PostgresWarehouse::connect(config).await?;
            Ok(Arc::new(warehouse))
        }

        WarehouseBackend::Memory => Ok(create_in_memory_warehouse()),
    }
}

/// Create an in-memory warehouse with the raw tables in place (for testing and dry runs)
pub fn create_in_memory_warehouse() -> Arc<dyn Warehouse> {
    tracing::info!("Initializing in-memory warehouse backend");
    Arc::new(InMemoryWarehouse::with_source_tables())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::SourceKind;

    #[tokio::test]
    async fn test_create_memory_warehouse() {
        let config = WarehouseConfig {
            backend: WarehouseBackend::Memory,
            ..Default::default()
        };
        let warehouse = create_warehouse(&config).await.unwrap();
        for kind in SourceKind::all() {
            assert_eq!(warehouse.count_rows(kind.schema().table).await.unwrap(), 0);
        }
    }

    #[tokio::test]
    async fn test_unreachable_postgres_fails() {
        let config = WarehouseConfig {
            backend: WarehouseBackend::Postgres,
            host: "127.0.0.1".to_string(),
            port: 1,
            connect_timeout_secs: 1,
            ..Default::default()
        };
        assert!(create_warehouse(&config).await.is_err());
    }
}
