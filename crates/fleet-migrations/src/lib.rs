//! Database migrations for the fleet control plane

pub use sea_orm_migration::prelude::*;

mod migration;
pub use migration::Migrator;
