//! Product business logic - Handles all product-related operations.
//!
//! This module provides functions for creating, retrieving, updating and deleting the
//! stock items of one owner. Every query is scoped by owner key. Mutations publish their
//! committed result on the backend's change feed. Stock quantity is also moved by sale
//! operations through [`adjust_quantity`], which clamps at zero.

use crate::{
    backend::Backend,
    core::finance,
    entities::{Product, product},
    errors::{Error, Result},
    realtime::ChangeKind,
};
use chrono::Utc;
use sea_orm::{QueryOrder, Set, prelude::*};
use tracing::{debug, info};

/// Fields of a product supplied by the owner.
#[derive(Debug, Clone, PartialEq)]
pub struct NewProduct {
    /// Display name, must not be blank
    pub name: String,
    /// Free-form category
    pub category: String,
    /// Optional stock-keeping unit code
    pub sku: Option<String>,
    /// Units on hand, must not be negative
    pub quantity: i64,
    /// Purchase cost per unit
    pub purchase_price: f64,
    /// Selling price per unit
    pub selling_price: f64,
    /// Optional description
    pub description: Option<String>,
}

/// Changes to an existing product. `None` leaves a field as it is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductUpdate {
    /// New name
    pub name: Option<String>,
    /// New category
    pub category: Option<String>,
    /// New SKU; `Some(None)` clears it
    pub sku: Option<Option<String>>,
    /// New on-hand quantity
    pub quantity: Option<i64>,
    /// New purchase cost
    pub purchase_price: Option<f64>,
    /// New selling price
    pub selling_price: Option<f64>,
    /// New description; `Some(None)` clears it
    pub description: Option<Option<String>>,
}

fn validate_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::validation("name", "Product name cannot be empty"));
    }
    Ok(trimmed.to_owned())
}

fn validate_price(price: f64) -> Result<f64> {
    if !price.is_finite() || price < 0.0 {
        return Err(Error::InvalidAmount { amount: price });
    }
    Ok(price)
}

const fn validate_quantity(quantity: i64) -> Result<i64> {
    if quantity < 0 {
        return Err(Error::InvalidQuantity { quantity });
    }
    Ok(quantity)
}

fn normalize_optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

/// Retrieves all products of `owner_key`, newest first.
pub async fn get_products(db: &DatabaseConnection, owner_key: &str) -> Result<Vec<product::Model>> {
    Product::find()
        .filter(product::Column::OwnerKey.eq(owner_key))
        .order_by_desc(product::Column::CreatedAt)
        .order_by_desc(product::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Retrieves one product of `owner_key` by id.
///
/// Returns `None` if it does not exist or belongs to another owner.
pub async fn get_product<C>(db: &C, owner_key: &str, product_id: i64) -> Result<Option<product::Model>>
where
    C: ConnectionTrait,
{
    Product::find_by_id(product_id)
        .filter(product::Column::OwnerKey.eq(owner_key))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Creates a product, performing input validation.
///
/// The starting quantity is also recorded as `initial_quantity`.
///
/// # Errors
/// Returns an error if:
/// - The name is empty or whitespace-only
/// - A price is negative or not finite
/// - The quantity is negative
/// - The database insert fails
pub async fn create_product(
    backend: &Backend,
    owner_key: &str,
    input: NewProduct,
) -> Result<product::Model> {
    let name = validate_name(&input.name)?;
    let quantity = validate_quantity(input.quantity)?;
    let purchase_price = validate_price(input.purchase_price)?;
    let selling_price = validate_price(input.selling_price)?;

    let product = product::ActiveModel {
        owner_key: Set(owner_key.to_owned()),
        name: Set(name),
        category: Set(input.category.trim().to_owned()),
        sku: Set(normalize_optional(input.sku)),
        quantity: Set(quantity),
        initial_quantity: Set(quantity),
        purchase_price: Set(purchase_price),
        selling_price: Set(selling_price),
        description: Set(normalize_optional(input.description)),
        created_at: Set(Utc::now().naive_utc()),
        ..Default::default()
    };

    let product = product.insert(backend.database()).await?;
    info!(%owner_key, product_id = product.id, name = %product.name, "Product created");
    backend.notify(ChangeKind::Insert, product.clone());
    Ok(product)
}

/// Applies `changes` to a product of `owner_key`.
///
/// # Errors
/// Returns an error if a changed field is invalid, the product does not exist for this
/// owner, or the update fails.
pub async fn update_product(
    backend: &Backend,
    owner_key: &str,
    product_id: i64,
    changes: ProductUpdate,
) -> Result<product::Model> {
    let mut product: product::ActiveModel = get_product(backend.database(), owner_key, product_id)
        .await?
        .ok_or(Error::ProductNotFound { id: product_id })?
        .into();

    if let Some(name) = changes.name {
        product.name = Set(validate_name(&name)?);
    }
    if let Some(category) = changes.category {
        product.category = Set(category.trim().to_owned());
    }
    if let Some(sku) = changes.sku {
        product.sku = Set(normalize_optional(sku));
    }
    if let Some(quantity) = changes.quantity {
        product.quantity = Set(validate_quantity(quantity)?);
    }
    if let Some(price) = changes.purchase_price {
        product.purchase_price = Set(validate_price(price)?);
    }
    if let Some(price) = changes.selling_price {
        product.selling_price = Set(validate_price(price)?);
    }
    if let Some(description) = changes.description {
        product.description = Set(normalize_optional(description));
    }

    let product = product.update(backend.database()).await?;
    debug!(%owner_key, product_id, "Product updated");
    backend.notify(ChangeKind::Update, product.clone());
    Ok(product)
}

/// Deletes a product of `owner_key`.
///
/// Sales that referenced it are kept; their reference now dangles.
///
/// # Errors
/// Returns an error if the product does not exist for this owner or the delete fails.
pub async fn delete_product(backend: &Backend, owner_key: &str, product_id: i64) -> Result<()> {
    let product = get_product(backend.database(), owner_key, product_id)
        .await?
        .ok_or(Error::ProductNotFound { id: product_id })?;

    product.clone().delete(backend.database()).await?;
    info!(%owner_key, product_id, "Product deleted");
    backend.notify(ChangeKind::Delete, product);
    Ok(())
}

/// Moves the stock of a product by `delta`, never below zero.
///
/// Returns the updated product, or `None` when the product no longer exists; a missing
/// product is skipped silently since sales may outlive the products they reference.
pub async fn adjust_quantity<C>(
    db: &C,
    owner_key: &str,
    product_id: i64,
    delta: i64,
) -> Result<Option<product::Model>>
where
    C: ConnectionTrait,
{
    let Some(product) = get_product(db, owner_key, product_id).await? else {
        debug!(%owner_key, product_id, delta, "Product gone, stock adjustment skipped");
        return Ok(None);
    };

    let new_quantity = product.quantity.saturating_add(delta).max(0);
    if new_quantity == product.quantity {
        return Ok(Some(product));
    }

    let mut active: product::ActiveModel = product.into();
    active.quantity = Set(new_quantity);
    let updated = active.update(db).await?;
    debug!(%owner_key, product_id, delta, quantity = updated.quantity, "Stock adjusted");
    Ok(Some(updated))
}

/// Products whose on-hand quantity is at or below `threshold`, lowest first.
#[must_use]
pub fn low_stock_products(products: &[product::Model], threshold: i64) -> Vec<&product::Model> {
    let mut low: Vec<&product::Model> = products
        .iter()
        .filter(|p| p.quantity <= threshold)
        .collect();
    low.sort_by_key(|p| p.quantity);
    low
}

/// Total stock of `owner_key` valued at selling price.
pub async fn stock_value(db: &DatabaseConnection, owner_key: &str) -> Result<f64> {
    let products = get_products(db, owner_key).await?;
    Ok(finance::stock_value(&products))
}

/// Products of `owner_key` together with their total purchase cost.
pub async fn product_costs(
    db: &DatabaseConnection,
    owner_key: &str,
) -> Result<(Vec<product::Model>, f64)> {
    let products = get_products(db, owner_key).await?;
    let total = finance::stock_cost(&products);
    Ok((products, total))
}
