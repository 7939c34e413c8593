//! Persistence for users, mention groups and memberships.
//!
//! Every query is a free function generic over [`sea_orm::ConnectionTrait`], so the same
//! operation runs either directly on the pool or inside a transaction opened
//! with [`Database::begin`]. The store enforces uniqueness only; membership
//! rules live in [`crate::engine`].

use sea_orm::{
    ConnectOptions, Database as SeaOrmDatabase, DatabaseConnection,
    DatabaseTransaction, DbErr, SqlErr, TransactionTrait,
};
use sea_orm_migration::MigratorTrait;
use std::{fs::OpenOptions, path::Path};
use thiserror::Error;

use crate::migration::Migrator;

pub mod groups;
pub mod users;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{op}: database error: {source}")]
    Database {
        op: &'static str,
        #[source]
        source: DbErr,
    },
    #[error("{0}: not found")]
    NotFound(&'static str),
    #[error("{0}: already exists")]
    AlreadyExists(&'static str),
    #[error("invalid group name {0:?}")]
    InvalidName(String),
    #[error("file error: {0}")]
    File(#[from] std::io::Error),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }
}

/// Tags a sea-orm error with the store operation that produced it.
pub(crate) trait OpContext<T> {
    fn op(self, op: &'static str) -> Result<T, Error>;
}

impl<T> OpContext<T> for Result<T, DbErr> {
    fn op(self, op: &'static str) -> Result<T, Error> {
        self.map_err(|source| match source.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => Error::AlreadyExists(op),
            _ => Error::Database { op, source },
        })
    }
}

async fn get_db_pool(db_path: &Path) -> Result<DatabaseConnection, Error> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(db_path)?;
    let db_str = format!("sqlite:{}", db_path.display());
    SeaOrmDatabase::connect(&db_str).await.op("connect")
}

#[derive(Clone, Debug)]
pub struct Database {
    pool: DatabaseConnection,
}

impl Database {
    pub async fn new(db_path: &Path) -> Result<Self, Error> {
        get_db_pool(db_path).await.map(|pool| Self { pool })
    }

    /// A private in-memory database with the schema applied.
    ///
    /// SQLite gives every connection its own memory database, so the pool is
    /// pinned to a single connection.
    pub async fn open_in_memory() -> Result<Self, Error> {
        let mut options = ConnectOptions::new("sqlite::memory:");
        options.max_connections(1).min_connections(1).sqlx_logging(false);
        let pool = SeaOrmDatabase::connect(options).await.op("connect")?;
        let db = Self { pool };
        db.apply_migrations().await?;
        Ok(db)
    }

    pub async fn apply_migrations(&self) -> Result<(), Error> {
        Migrator::up(&self.pool, None).await.op("apply_migrations")
    }

    /// Rolls back every applied migration, dropping the bot's tables.
    pub async fn remove_migrations(&self) -> Result<(), Error> {
        Migrator::down(&self.pool, None).await.op("remove_migrations")
    }

    pub fn conn(&self) -> &DatabaseConnection {
        &self.pool
    }

    pub async fn begin(&self) -> Result<DatabaseTransaction, Error> {
        self.pool.begin().await.op("begin")
    }
}

pub(crate) async fn commit(txn: DatabaseTransaction, op: &'static str) -> Result<(), Error> {
    txn.commit().await.op(op)
}

