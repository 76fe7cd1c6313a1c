//! Shared test utilities for `stockbook`.
//!
//! This module provides common helper functions for setting up test databases
//! and creating test records with sensible defaults.

use crate::{
    auth::LocalAuthProvider,
    backend::Backend,
    core::{
        expense::{self, NewExpense},
        product::{self, NewProduct},
        sale::{self, NewSale},
    },
    entities,
    errors::Result,
};
use argon2::{Algorithm, Argon2, Params, Version};
use chrono::{NaiveDate, Utc};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

/// Day used by every test record that does not care about dates.
#[allow(clippy::unwrap_used)]
pub fn test_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()
}

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all integration tests.
///
/// The pool holds a single connection; every connection to `sqlite::memory:` would
/// otherwise open its own empty database.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = crate::config::database::create_connection("sqlite::memory:").await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// A [`Backend`] over a fresh in-memory database.
pub async fn setup_backend() -> Result<Backend> {
    Ok(Backend::new(setup_test_db().await?))
}

/// A local auth provider with cheap argon2 parameters.
pub fn test_auth(backend: &Backend) -> Arc<LocalAuthProvider> {
    let params = Params::new(8, 1, 1, None).unwrap_or_default();
    let hasher = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    Arc::new(LocalAuthProvider::with_hasher(
        backend.database().clone(),
        hasher,
    ))
}

/// Creates a test product.
///
/// # Defaults
/// * `category`: `"general"`
/// * `sku`, `description`: None
pub async fn create_test_product(
    backend: &Backend,
    owner_key: &str,
    name: &str,
    quantity: i64,
    purchase_price: f64,
    selling_price: f64,
) -> Result<entities::product::Model> {
    product::create_product(
        backend,
        owner_key,
        NewProduct {
            name: name.to_string(),
            category: "general".to_string(),
            sku: None,
            quantity,
            purchase_price,
            selling_price,
            description: None,
        },
    )
    .await
}

/// Sale input for `product_id` with no explicit unit price.
///
/// # Defaults
/// * `customer_name`: `"Customer"`
/// * `sale_date`: [`test_date`]
pub fn sale_input(product_id: Option<i64>, quantity: i64) -> NewSale {
    NewSale {
        product_id,
        quantity,
        unit_price: None,
        customer_name: "Customer".to_string(),
        sale_date: test_date(),
        sale_time: None,
        notes: None,
    }
}

/// Sells `quantity` units of a product at its current selling price.
pub async fn create_test_sale(
    backend: &Backend,
    owner_key: &str,
    product_id: i64,
    quantity: i64,
) -> Result<entities::sale::Model> {
    sale::create_sale(backend, owner_key, sale_input(Some(product_id), quantity)).await
}

/// Records a test expense of `amount`.
pub async fn create_test_expense(
    backend: &Backend,
    owner_key: &str,
    amount: f64,
) -> Result<entities::expense::Model> {
    expense::create_expense(
        backend,
        owner_key,
        NewExpense {
            description: "Test expense".to_string(),
            amount,
            category: "general".to_string(),
            date: test_date(),
            notes: None,
        },
    )
    .await
}

/// In-memory product model, never stored.
pub fn product_model(id: i64, owner_key: &str, name: &str, quantity: i64) -> entities::product::Model {
    entities::product::Model {
        id,
        owner_key: owner_key.to_string(),
        name: name.to_string(),
        category: "general".to_string(),
        sku: None,
        quantity,
        initial_quantity: quantity,
        purchase_price: 0.0,
        selling_price: 0.0,
        description: None,
        created_at: Utc::now().naive_utc(),
    }
}

/// In-memory sale model with `total_amount = quantity * unit_price`.
#[allow(clippy::cast_precision_loss)]
pub fn sale_model(
    id: i64,
    owner_key: &str,
    product_id: Option<i64>,
    quantity: i64,
    unit_price: f64,
) -> entities::sale::Model {
    entities::sale::Model {
        id,
        owner_key: owner_key.to_string(),
        product_id,
        quantity,
        unit_price,
        total_amount: quantity as f64 * unit_price,
        customer_name: String::new(),
        sale_date: test_date(),
        sale_time: None,
        notes: None,
        created_at: Utc::now().naive_utc(),
    }
}

/// In-memory expense model.
pub fn expense_model(id: i64, owner_key: &str, amount: f64) -> entities::expense::Model {
    entities::expense::Model {
        id,
        owner_key: owner_key.to_string(),
        description: "Test expense".to_string(),
        amount,
        category: "general".to_string(),
        date: test_date(),
        notes: None,
        created_at: Utc::now().naive_utc(),
    }
}

/// In-memory account model.
pub fn account_model(
    owner_key: &str,
    validity_date: Option<NaiveDate>,
    is_active: bool,
) -> entities::account::Model {
    entities::account::Model {
        id: 1,
        owner_key: owner_key.to_string(),
        account_name: "Test Shop".to_string(),
        email: "shop@example.com".to_string(),
        validity_date,
        is_active,
        currency: "USD".to_string(),
        created_at: Utc::now().naive_utc(),
    }
}
