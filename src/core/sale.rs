//! Sale business logic - Handles all sale-related operations.
//!
//! Sales move product stock: creating a sale takes its quantity out of the referenced
//! product, deleting it puts the quantity back, and updating it reconciles the old and new
//! references. Each operation runs its writes in one database transaction and publishes
//! the committed sale and product rows afterwards.
//!
//! The product reference is weak. A sale whose product has been deleted keeps working and
//! simply skips the stock adjustment.
//!
//! Writers on other clients are not coordinated: two simultaneous sales of the same product
//! from different clients can still over- or under-count stock.

use crate::{
    backend::Backend,
    core::product as product_ops,
    entities::{Sale, product, sale},
    errors::{Error, Result},
    realtime::ChangeKind,
};
use chrono::{NaiveDate, NaiveTime, Utc};
use sea_orm::{
    DatabaseTransaction, PaginatorTrait, QueryOrder, QuerySelect, Set, TransactionTrait,
    prelude::*,
};
use tracing::{debug, info};

/// Fields of a sale supplied by the owner.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSale {
    /// Product sold, if any
    pub product_id: Option<i64>,
    /// Units sold, must be positive
    pub quantity: i64,
    /// Price per unit; `None` captures the product's current selling price
    pub unit_price: Option<f64>,
    /// Customer name, free text
    pub customer_name: String,
    /// Calendar day of the sale
    pub sale_date: NaiveDate,
    /// Optional time of day
    pub sale_time: Option<NaiveTime>,
    /// Optional notes
    pub notes: Option<String>,
}

/// Validated sale figures.
struct Pricing {
    quantity: i64,
    unit_price: f64,
    total_amount: f64,
}

impl Pricing {
    // Cast safety: sale quantities are far below 2^53.
    #[allow(clippy::cast_precision_loss)]
    fn new(quantity: i64, unit_price: f64) -> Result<Self> {
        if quantity <= 0 {
            return Err(Error::InvalidQuantity { quantity });
        }
        if !unit_price.is_finite() || unit_price < 0.0 {
            return Err(Error::InvalidAmount { amount: unit_price });
        }

        let total_amount = quantity as f64 * unit_price;
        if !total_amount.is_finite() {
            return Err(Error::InvalidAmount {
                amount: total_amount,
            });
        }

        Ok(Self {
            quantity,
            unit_price,
            total_amount,
        })
    }
}

fn normalize_notes(notes: Option<String>) -> Option<String> {
    notes
        .map(|n| n.trim().to_owned())
        .filter(|n| !n.is_empty())
}

/// Resolves the unit price: the caller's, else the referenced product's selling price.
async fn resolve_unit_price(
    txn: &DatabaseTransaction,
    owner_key: &str,
    product_id: Option<i64>,
    unit_price: Option<f64>,
) -> Result<f64> {
    if let Some(price) = unit_price {
        return Ok(price);
    }

    let product = match product_id {
        Some(id) => product_ops::get_product(txn, owner_key, id).await?,
        None => None,
    };

    product.map(|p| p.selling_price).ok_or_else(|| {
        Error::validation("unit_price", "A unit price is required when no product is selected")
    })
}

fn publish(backend: &Backend, kind: ChangeKind, sale: &sale::Model, products: Vec<product::Model>) {
    backend.notify(kind, sale.clone());
    for product in products {
        backend.notify(ChangeKind::Update, product);
    }
}

/// Retrieves all sales of `owner_key`, most recent sale date first.
pub async fn get_sales(db: &DatabaseConnection, owner_key: &str) -> Result<Vec<sale::Model>> {
    Sale::find()
        .filter(sale::Column::OwnerKey.eq(owner_key))
        .order_by_desc(sale::Column::SaleDate)
        .order_by_desc(sale::Column::CreatedAt)
        .order_by_desc(sale::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Retrieves the `limit` most recent sales of `owner_key`.
pub async fn recent_sales(
    db: &DatabaseConnection,
    owner_key: &str,
    limit: u64,
) -> Result<Vec<sale::Model>> {
    Sale::find()
        .filter(sale::Column::OwnerKey.eq(owner_key))
        .order_by_desc(sale::Column::SaleDate)
        .order_by_desc(sale::Column::CreatedAt)
        .order_by_desc(sale::Column::Id)
        .limit(limit)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Retrieves one sale of `owner_key` by id.
pub async fn get_sale<C>(db: &C, owner_key: &str, sale_id: i64) -> Result<Option<sale::Model>>
where
    C: ConnectionTrait,
{
    Sale::find_by_id(sale_id)
        .filter(sale::Column::OwnerKey.eq(owner_key))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Number of sales recorded by `owner_key`.
pub async fn sales_count(db: &DatabaseConnection, owner_key: &str) -> Result<u64> {
    Sale::find()
        .filter(sale::Column::OwnerKey.eq(owner_key))
        .count(db)
        .await
        .map_err(Into::into)
}

/// Sum of all sale totals of `owner_key`.
pub async fn total_sales(db: &DatabaseConnection, owner_key: &str) -> Result<f64> {
    let sales = get_sales(db, owner_key).await?;
    Ok(crate::core::finance::total_revenue(&sales))
}

/// Records a sale and takes its quantity out of the referenced product's stock.
///
/// The total is always computed here as `quantity * unit_price`. Stock never goes below
/// zero. A reference to a product that no longer exists is kept, and stock is left alone.
///
/// # Errors
/// Returns an error if:
/// - The quantity is not positive
/// - The unit price is negative or not finite, or missing with no product to take it from
/// - A database operation fails
pub async fn create_sale(backend: &Backend, owner_key: &str, input: NewSale) -> Result<sale::Model> {
    if input.quantity <= 0 {
        return Err(Error::InvalidQuantity {
            quantity: input.quantity,
        });
    }

    let txn = backend.database().begin().await?;

    let unit_price =
        resolve_unit_price(&txn, owner_key, input.product_id, input.unit_price).await?;
    let pricing = Pricing::new(input.quantity, unit_price)?;

    let sale = sale::ActiveModel {
        owner_key: Set(owner_key.to_owned()),
        product_id: Set(input.product_id),
        quantity: Set(pricing.quantity),
        unit_price: Set(pricing.unit_price),
        total_amount: Set(pricing.total_amount),
        customer_name: Set(input.customer_name.trim().to_owned()),
        sale_date: Set(input.sale_date),
        sale_time: Set(input.sale_time),
        notes: Set(normalize_notes(input.notes)),
        created_at: Set(Utc::now().naive_utc()),
        ..Default::default()
    };
    let sale = sale.insert(&txn).await?;

    let mut touched = Vec::new();
    if let Some(product_id) = sale.product_id {
        touched.extend(
            product_ops::adjust_quantity(&txn, owner_key, product_id, -sale.quantity).await?,
        );
    }

    txn.commit().await?;

    info!(
        %owner_key,
        sale_id = sale.id,
        product_id = ?sale.product_id,
        quantity = sale.quantity,
        total = sale.total_amount,
        "Sale created"
    );
    publish(backend, ChangeKind::Insert, &sale, touched);
    Ok(sale)
}

/// Replaces a sale and reconciles product stock.
///
/// - Same product: stock moves by `old quantity - new quantity` in one step.
/// - Different product: the old product gets the old quantity back and the new product
///   loses the new quantity.
///
/// Missing products are skipped. When `unit_price` is `None`, the captured price is kept if
/// the product is unchanged, otherwise the new product's current price is captured.
///
/// # Errors
/// Returns an error if the sale does not exist for this owner, a field is invalid, or a
/// database operation fails.
pub async fn update_sale(
    backend: &Backend,
    owner_key: &str,
    sale_id: i64,
    input: NewSale,
) -> Result<sale::Model> {
    if input.quantity <= 0 {
        return Err(Error::InvalidQuantity {
            quantity: input.quantity,
        });
    }

    let txn = backend.database().begin().await?;

    let old = get_sale(&txn, owner_key, sale_id)
        .await?
        .ok_or(Error::SaleNotFound { id: sale_id })?;

    let unit_price = match input.unit_price {
        None if input.product_id == old.product_id => old.unit_price,
        price => resolve_unit_price(&txn, owner_key, input.product_id, price).await?,
    };
    let pricing = Pricing::new(input.quantity, unit_price)?;

    let mut active: sale::ActiveModel = old.clone().into();
    active.product_id = Set(input.product_id);
    active.quantity = Set(pricing.quantity);
    active.unit_price = Set(pricing.unit_price);
    active.total_amount = Set(pricing.total_amount);
    active.customer_name = Set(input.customer_name.trim().to_owned());
    active.sale_date = Set(input.sale_date);
    active.sale_time = Set(input.sale_time);
    active.notes = Set(normalize_notes(input.notes));
    let sale = active.update(&txn).await?;

    let mut touched = Vec::new();
    match (old.product_id, sale.product_id) {
        (Some(previous), Some(current)) if previous == current => {
            let delta = old.quantity - sale.quantity;
            touched.extend(product_ops::adjust_quantity(&txn, owner_key, current, delta).await?);
        }
        (previous, current) => {
            if let Some(previous) = previous {
                touched.extend(
                    product_ops::adjust_quantity(&txn, owner_key, previous, old.quantity).await?,
                );
            }
            if let Some(current) = current {
                touched.extend(
                    product_ops::adjust_quantity(&txn, owner_key, current, -sale.quantity).await?,
                );
            }
        }
    }

    txn.commit().await?;

    debug!(%owner_key, sale_id, "Sale updated");
    publish(backend, ChangeKind::Update, &sale, touched);
    Ok(sale)
}

/// Deletes a sale and gives its quantity back to the referenced product.
///
/// # Errors
/// Returns an error if the sale does not exist for this owner or a database operation
/// fails. A missing product is not an error.
pub async fn delete_sale(backend: &Backend, owner_key: &str, sale_id: i64) -> Result<()> {
    let txn = backend.database().begin().await?;

    let sale = get_sale(&txn, owner_key, sale_id)
        .await?
        .ok_or(Error::SaleNotFound { id: sale_id })?;

    sale.clone().delete(&txn).await?;

    let mut touched = Vec::new();
    if let Some(product_id) = sale.product_id {
        touched.extend(
            product_ops::adjust_quantity(&txn, owner_key, product_id, sale.quantity).await?,
        );
    }

    txn.commit().await?;

    info!(%owner_key, sale_id, "Sale deleted");
    publish(backend, ChangeKind::Delete, &sale, touched);
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::float_cmp)]
    use super::*;
    use crate::test_utils::*;

    async fn quantity_of(backend: &Backend, product_id: i64) -> Result<i64> {
        Ok(product_ops::get_product(backend.database(), "o", product_id)
            .await?
            .unwrap()
            .quantity)
    }

    #[tokio::test]
    async fn test_create_then_delete_round_trip() -> Result<()> {
        let backend = setup_backend().await?;
        let product = create_test_product(&backend, "o", "Rice", 10, 2.0, 3.0).await?;

        let sale = create_test_sale(&backend, "o", product.id, 3).await?;
        assert_eq!(quantity_of(&backend, product.id).await?, 7);
        assert_eq!(sale.unit_price, 3.0);
        assert_eq!(sale.total_amount, 9.0);

        delete_sale(&backend, "o", sale.id).await?;
        assert_eq!(quantity_of(&backend, product.id).await?, 10);
        assert!(get_sales(backend.database(), "o").await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_create_sale_floors_stock_at_zero() -> Result<()> {
        let backend = setup_backend().await?;
        let product = create_test_product(&backend, "o", "Rice", 2, 2.0, 3.0).await?;

        create_test_sale(&backend, "o", product.id, 5).await?;
        assert_eq!(quantity_of(&backend, product.id).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_total_is_recomputed() -> Result<()> {
        let backend = setup_backend().await?;
        let mut input = sale_input(None, 4);
        input.unit_price = Some(2.5);

        let sale = create_sale(&backend, "o", input).await?;
        assert_eq!(sale.total_amount, 10.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_create_sale_validation() -> Result<()> {
        let backend = setup_backend().await?;

        let result = create_sale(&backend, "o", sale_input(None, 0)).await;
        assert!(matches!(
            result.unwrap_err(),
            Error::InvalidQuantity { quantity: 0 }
        ));

        // No product to take a price from
        let result = create_sale(&backend, "o", sale_input(None, 1)).await;
        assert!(matches!(
            result.unwrap_err(),
            Error::Validation {
                field: "unit_price",
                ..
            }
        ));

        let mut input = sale_input(None, 1);
        input.unit_price = Some(f64::INFINITY);
        let result = create_sale(&backend, "o", input).await;
        assert!(matches!(result.unwrap_err(), Error::InvalidAmount { .. }));

        assert_eq!(sales_count(backend.database(), "o").await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_update_same_product_applies_net_delta() -> Result<()> {
        let backend = setup_backend().await?;
        let product = create_test_product(&backend, "o", "Rice", 10, 2.0, 3.0).await?;
        let sale = create_test_sale(&backend, "o", product.id, 3).await?;
        assert_eq!(quantity_of(&backend, product.id).await?, 7);

        let updated = update_sale(&backend, "o", sale.id, sale_input(Some(product.id), 5)).await?;
        assert_eq!(quantity_of(&backend, product.id).await?, 5);
        assert_eq!(updated.quantity, 5);
        // Captured price is kept
        assert_eq!(updated.unit_price, 3.0);
        assert_eq!(updated.total_amount, 15.0);

        update_sale(&backend, "o", sale.id, sale_input(Some(product.id), 1)).await?;
        assert_eq!(quantity_of(&backend, product.id).await?, 9);
        Ok(())
    }

    #[tokio::test]
    async fn test_update_keeps_captured_price_after_product_price_change() -> Result<()> {
        let backend = setup_backend().await?;
        let product = create_test_product(&backend, "o", "Rice", 10, 2.0, 3.0).await?;
        let sale = create_test_sale(&backend, "o", product.id, 1).await?;

        product_ops::update_product(
            &backend,
            "o",
            product.id,
            product_ops::ProductUpdate {
                selling_price: Some(99.0),
                ..Default::default()
            },
        )
        .await?;

        let updated = update_sale(&backend, "o", sale.id, sale_input(Some(product.id), 2)).await?;
        assert_eq!(updated.unit_price, 3.0);
        assert_eq!(updated.total_amount, 6.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_update_changed_product_moves_stock() -> Result<()> {
        let backend = setup_backend().await?;
        let rice = create_test_product(&backend, "o", "Rice", 10, 2.0, 3.0).await?;
        let oil = create_test_product(&backend, "o", "Oil", 10, 4.0, 6.0).await?;
        let sale = create_test_sale(&backend, "o", rice.id, 3).await?;

        let updated = update_sale(&backend, "o", sale.id, sale_input(Some(oil.id), 4)).await?;
        assert_eq!(quantity_of(&backend, rice.id).await?, 10);
        assert_eq!(quantity_of(&backend, oil.id).await?, 6);
        // New product, so its price is captured
        assert_eq!(updated.unit_price, 6.0);
        assert_eq!(updated.total_amount, 24.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_update_to_and_from_no_product() -> Result<()> {
        let backend = setup_backend().await?;
        let rice = create_test_product(&backend, "o", "Rice", 10, 2.0, 3.0).await?;
        let sale = create_test_sale(&backend, "o", rice.id, 3).await?;

        let mut input = sale_input(None, 3);
        input.unit_price = Some(3.0);
        update_sale(&backend, "o", sale.id, input).await?;
        assert_eq!(quantity_of(&backend, rice.id).await?, 10);

        update_sale(&backend, "o", sale.id, sale_input(Some(rice.id), 2)).await?;
        assert_eq!(quantity_of(&backend, rice.id).await?, 8);
        Ok(())
    }

    #[tokio::test]
    async fn test_dangling_product_is_tolerated() -> Result<()> {
        let backend = setup_backend().await?;
        let rice = create_test_product(&backend, "o", "Rice", 10, 2.0, 3.0).await?;
        let sale = create_test_sale(&backend, "o", rice.id, 3).await?;

        product_ops::delete_product(&backend, "o", rice.id).await?;

        let mut input = sale_input(Some(rice.id), 5);
        input.unit_price = Some(3.0);
        let updated = update_sale(&backend, "o", sale.id, input).await?;
        assert_eq!(updated.product_id, Some(rice.id));

        delete_sale(&backend, "o", sale.id).await?;
        assert!(product_ops::get_products(backend.database(), "o").await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_sale_errors() -> Result<()> {
        let backend = setup_backend().await?;

        let result = delete_sale(&backend, "o", 42).await;
        assert!(matches!(result.unwrap_err(), Error::SaleNotFound { id: 42 }));

        let mut input = sale_input(None, 1);
        input.unit_price = Some(1.0);
        let result = update_sale(&backend, "o", 42, input).await;
        assert!(matches!(result.unwrap_err(), Error::SaleNotFound { id: 42 }));
        Ok(())
    }

    #[tokio::test]
    async fn test_sale_events_are_published() -> Result<()> {
        let backend = setup_backend().await?;
        let rice = create_test_product(&backend, "o", "Rice", 10, 2.0, 3.0).await?;
        let mut sales = backend.changes().subscribe::<sale::Model>("o");
        let mut products = backend.changes().subscribe::<product::Model>("o");

        let sale = create_test_sale(&backend, "o", rice.id, 3).await?;

        let event = sales.try_recv().unwrap();
        assert_eq!(event.kind, ChangeKind::Insert);
        assert_eq!(event.record, sale);

        let event = products.try_recv().unwrap();
        assert_eq!(event.kind, ChangeKind::Update);
        assert_eq!(event.record.quantity, 7);
        Ok(())
    }

    #[tokio::test]
    async fn test_recent_sales_and_count() -> Result<()> {
        let backend = setup_backend().await?;
        let rice = create_test_product(&backend, "o", "Rice", 100, 2.0, 3.0).await?;

        for day in 1..=7 {
            let mut input = sale_input(Some(rice.id), 1);
            input.sale_date = NaiveDate::from_ymd_opt(2025, 1, day).unwrap();
            create_sale(&backend, "o", input).await?;
        }

        let recent = recent_sales(backend.database(), "o", 5).await?;
        assert_eq!(recent.len(), 5);
        assert_eq!(recent[0].sale_date, NaiveDate::from_ymd_opt(2025, 1, 7).unwrap());
        assert_eq!(sales_count(backend.database(), "o").await?, 7);
        assert_eq!(total_sales(backend.database(), "o").await?, 21.0);
        Ok(())
    }
}
