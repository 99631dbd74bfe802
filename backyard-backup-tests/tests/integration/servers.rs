//! Round trips against real database servers
//!
//! Connection settings come from the environment, for example
//! `BACKYARD_TEST_PG_HOST=localhost BACKYARD_TEST_PG_USER=postgres`.

use backyard_backup::config::{DatabaseConfig, DatabaseType};
use backyard_backup::connectors::{create_connector, Connector, TableSelection};
use std::collections::HashMap;
use std::sync::Arc;

fn server_config(db_type: DatabaseType, prefix: &str) -> DatabaseConfig {
    let var = |name: &str| std::env::var(format!("{}_{}", prefix, name)).unwrap_or_default();
    DatabaseConfig {
        db_type,
        host: std::env::var(format!("{}_HOST", prefix)).unwrap_or_else(|_| "localhost".to_string()),
        port: var("PORT").parse().ok(),
        user: var("USER"),
        password: var("PASSWORD"),
        database: Some(
            std::env::var(format!("{}_DATABASE", prefix)).unwrap_or_else(|_| "backyard_test".to_string()),
        ),
        file_path: None,
        options: HashMap::new(),
    }
}

async fn dump_size(connector: &Arc<dyn Connector>) -> u64 {
    connector.connect().await.expect("Failed to connect");
    let info = connector.describe().await.expect("Failed to describe");
    assert!(info.table_count > 0, "seed the test database first");
    let tables = connector.list_tables().await.expect("Failed to list tables");
    let mut sink = Vec::new();
    let written = connector
        .dump(&mut sink, &TableSelection::Tables(tables))
        .await
        .expect("Failed to dump");
    assert_eq!(written, sink.len() as u64);
    connector.close().await.expect("Failed to close");
    written
}

#[tokio::test]
#[ignore] // Needs pg_dump/psql and a running server
async fn test_postgres_dump() {
    let config = server_config(DatabaseType::Postgres, "BACKYARD_TEST_PG");
    let connector = create_connector("pg", &config).unwrap();
    assert_eq!(connector.engine(), "postgres");
    assert!(dump_size(&connector).await > 0);
}

#[tokio::test]
#[ignore] // Needs mysqldump/mysql and a running server
async fn test_mysql_dump() {
    let config = server_config(DatabaseType::Mysql, "BACKYARD_TEST_MYSQL");
    let connector = create_connector("my", &config).unwrap();
    assert_eq!(connector.engine(), "mysql");
    assert!(dump_size(&connector).await > 0);
}
