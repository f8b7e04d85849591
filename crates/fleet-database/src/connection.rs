//! Database connection management

use fleet_core::{ServiceError, ServiceResult};
use fleet_migrations::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::sync::Arc;
use tracing::info;

pub type DbConnection = DatabaseConnection;

/// Connect and bring the schema up to date.
pub async fn establish_connection(database_url: &str) -> ServiceResult<Arc<DbConnection>> {
    let mut opt = ConnectOptions::new(database_url);
    if database_url.starts_with("sqlite:") {
        // In-memory SQLite databases exist per connection
        opt.max_connections(1).min_connections(1);
    } else {
        opt.max_connections(50).min_connections(2);
    }
    opt.sqlx_logging(false);

    let db = Database::connect(opt)
        .await
        .map_err(|e| ServiceError::Database(e.to_string()))?;

    Migrator::up(&db, None)
        .await
        .map_err(|e| ServiceError::Database(e.to_string()))?;

    info!("Database connected and migrations applied");
    Ok(Arc::new(db))
}
