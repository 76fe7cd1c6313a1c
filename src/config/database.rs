//! Database configuration module for `stockbook`.
//!
//! This module handles the record store connection and table creation using `SeaORM`.
//! Tables are generated with `Schema::create_table_from_entity` from the entity models,
//! so the schema always matches the Rust struct definitions without hand-written SQL.

use crate::entities::{Account, Expense, Identity, Product, Sale, SystemState};
use crate::errors::Result;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, EntityName, EntityTrait,
    Schema,
};
use tracing::{debug, info};

const DEFAULT_DATABASE_URL: &str = "sqlite://data/stockbook.sqlite?mode=rwc";

/// Gets the database URL from the `DATABASE_URL` environment variable, falling back
/// to a local `SQLite` file.
#[must_use]
pub fn get_database_url() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string())
}

/// Creates the parent directory of a file-backed `SQLite` URL.
///
/// In-memory and non-`SQLite` URLs are left alone.
pub fn ensure_sqlite_dir(database_url: &str) -> Result<()> {
    let Some(rest) = database_url.strip_prefix("sqlite:") else {
        return Ok(());
    };
    let path = rest.trim_start_matches("//");
    let path = path.split('?').next().unwrap_or_default();
    if path.is_empty() || path.starts_with(":memory:") {
        return Ok(());
    }

    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
            debug!(dir = ?parent, "Ensured database directory exists");
        }
    }
    Ok(())
}

/// Establishes a connection to the record store at `database_url`.
///
/// `SQLite` only tolerates one writer, so the pool is capped at a single connection.
pub async fn create_connection(database_url: &str) -> Result<DatabaseConnection> {
    let mut options = ConnectOptions::new(database_url.to_owned());
    options.max_connections(1).sqlx_logging(false);

    let db = Database::connect(options).await?;
    info!(url = %database_url, "Connected to record store");
    Ok(db)
}

async fn create_table<E, C>(db: &C, schema: &Schema, entity: E) -> Result<()>
where
    E: EntityTrait,
    C: ConnectionTrait,
{
    let builder = db.get_database_backend();
    let table = entity.table_name().to_owned();
    let mut statement = schema.create_table_from_entity(entity);
    statement.if_not_exists();
    db.execute(builder.build(&statement)).await?;
    debug!(%table, "Ensured table exists");
    Ok(())
}

/// Creates all tables that do not exist yet.
///
/// Safe to call on every start.
pub async fn create_tables(db: &DatabaseConnection) -> Result<()> {
    let schema = Schema::new(db.get_database_backend());

    create_table(db, &schema, Identity).await?;
    create_table(db, &schema, Account).await?;
    create_table(db, &schema, Product).await?;
    create_table(db, &schema, Sale).await?;
    create_table(db, &schema, Expense).await?;
    create_table(db, &schema, SystemState).await?;

    Ok(())
}
