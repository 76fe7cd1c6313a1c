//! Report generation business logic.
//!
//! This module builds the dashboard figures and the one-line sale summaries. All functions
//! return structured data or plain strings and leave presentation to the caller.

use crate::{
    core::{currency, finance, product as product_ops, sale as sale_ops},
    entities::{product, sale},
    errors::Result,
};
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::collections::HashMap;

/// Label used when a sale's product has been deleted.
pub const DELETED_PRODUCT: &str = "deleted product";

/// Label used when a sale never referenced a product.
pub const NO_PRODUCT: &str = "no product";

/// Everything the dashboard shows for one owner.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardReport {
    /// Revenue, COGS, expenses, profit and stock valuation
    pub summary: finance::FinancialSummary,
    /// Number of recorded sales
    pub sales_count: u64,
    /// Stock valued at selling price
    pub stock_value: f64,
    /// Most recent sales, newest first
    pub recent_sales: Vec<sale::Model>,
}

/// Generates the dashboard report for `owner_key`.
///
/// # Arguments
/// * `db` - Database connection
/// * `owner_key` - Owner whose records are summarized
/// * `recent_limit` - Maximum number of recent sales to include
///
/// # Errors
/// Any failed read is returned as is. The dashboard shows an error instead of zeros.
pub async fn generate_dashboard(
    db: &DatabaseConnection,
    owner_key: &str,
    recent_limit: u64,
) -> Result<DashboardReport> {
    let summary = finance::financial_summary(db, owner_key).await?;
    let sales_count = sale_ops::sales_count(db, owner_key).await?;
    let recent_sales = sale_ops::recent_sales(db, owner_key, recent_limit).await?;

    Ok(DashboardReport {
        stock_value: summary.stock_value,
        summary,
        sales_count,
        recent_sales,
    })
}

/// Low-stock products of `owner_key`, lowest quantity first.
///
/// # Errors
/// Returns an error if the product read fails.
pub async fn low_stock_report(
    db: &DatabaseConnection,
    owner_key: &str,
    threshold: i64,
) -> Result<Vec<product::Model>> {
    let products = product_ops::get_products(db, owner_key).await?;
    Ok(product_ops::low_stock_products(&products, threshold)
        .into_iter()
        .cloned()
        .collect())
}

/// Generates a summary line for a sale.
///
/// The product name is looked up in `products`; a dangling reference shows as
/// [`DELETED_PRODUCT`].
///
/// # Returns
/// Formatted string like `"2025-03-01 | Rice x3 | $ 9,00 | Alice"`
#[must_use]
pub fn format_sale_summary(sale: &sale::Model, products: &[product::Model], code: &str) -> String {
    let names: HashMap<i64, &str> = products.iter().map(|p| (p.id, p.name.as_str())).collect();

    let product_name = match sale.product_id {
        Some(id) => names.get(&id).copied().unwrap_or(DELETED_PRODUCT),
        None => NO_PRODUCT,
    };
    let amount = currency::format_amount(sale.total_amount, code);
    let customer = if sale.customer_name.is_empty() {
        "-"
    } else {
        sale.customer_name.as_str()
    };

    format!(
        "{} | {product_name} x{} | {amount} | {customer}",
        sale.sale_date, sale.quantity
    )
}
