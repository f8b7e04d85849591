//! Test utilities for database-backed tests
//!
//! Every [`TestDatabase`] is a fresh SQLite database with the real migrations
//! applied, so tests never share rows.

use crate::DbConnection;
use fleet_migrations::Migrator;
use sea_orm::{ConnectOptions, ConnectionTrait, Database};
use sea_orm_migration::MigratorTrait;
use std::sync::Arc;
use tempfile::TempDir;

pub struct TestDatabase {
    pub db: Arc<DbConnection>,
    /// Holds the file-backed database of [`TestDatabase::pooled`] until drop
    _dir: Option<TempDir>,
}

impl TestDatabase {
    /// In-memory database behind a single connection.
    pub async fn new() -> anyhow::Result<Self> {
        let mut opt = ConnectOptions::new("sqlite::memory:");
        opt.max_connections(1).min_connections(1).sqlx_logging(false);

        let db = Database::connect(opt).await?;
        Migrator::up(&db, None).await?;

        Ok(Self {
            db: Arc::new(db),
            _dir: None,
        })
    }

    /// File-backed WAL database behind `connections` pooled connections, for
    /// tests where statements must really run side by side.
    pub async fn pooled(connections: u32) -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("fleet.db").display());

        let mut opt = ConnectOptions::new(url);
        opt.max_connections(connections)
            .min_connections(connections)
            .sqlx_logging(false);

        let db = Database::connect(opt).await?;
        db.execute_unprepared("PRAGMA journal_mode = WAL").await?;
        Migrator::up(&db, None).await?;

        Ok(Self {
            db: Arc::new(db),
            _dir: Some(dir),
        })
    }

    pub fn connection(&self) -> Arc<DbConnection> {
        self.db.clone()
    }
}
