//! Versioned schema steps, applied in order by [`Migrator`].
//!
//! On SQLite `Migrator::up` runs each step without an enclosing transaction.
//! Every step is guarded with `if_not_exists`, so a run interrupted halfway
//! is completed by the next start instead of failing on what already exists.

use sea_orm_migration::prelude::*;

mod m20240301_000001_create_tables;
mod m20240301_000002_unique_indexes;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_tables::Migration),
            Box::new(m20240301_000002_unique_indexes::Migration),
        ]
    }
}

#[derive(DeriveIden)]
pub(crate) enum User {
    Table,
    Id,
    Handle,
    FirstName,
    LastName,
}

#[derive(DeriveIden)]
pub(crate) enum MentionGroup {
    Table,
    Id,
    Name,
    ChatId,
}

#[derive(DeriveIden)]
pub(crate) enum Membership {
    Table,
    Id,
    GroupId,
    UserId,
}
