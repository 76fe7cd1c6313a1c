//! Financial aggregation.
//!
//! Revenue, cost of goods sold, operating expenses, net profit and stock valuation are all
//! computed from the owner's full collections on every call. Recorded expenses and COGS are
//! separate terms: product purchase cost only enters the result through the sales that
//! consumed it.
//!
//! Every input value passes through [`finite_or_zero`] and every output is clamped the same
//! way, so one corrupt row cannot turn the whole summary into `NaN`.

use crate::{
    core::{expense, product, sale},
    entities::{expense as expense_entity, product as product_entity, sale as sale_entity},
    errors::Result,
};
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::collections::HashMap;

/// Aggregated figures for one owner.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct FinancialSummary {
    /// Sum of all sale totals
    pub total_revenue: f64,
    /// Sum of `quantity * purchase_price` over sales whose product still exists
    pub cost_of_goods_sold: f64,
    /// Sum of recorded expenses
    pub total_expenses: f64,
    /// `total_revenue - cost_of_goods_sold - total_expenses`
    pub net_profit: f64,
    /// Stock valued at selling price
    pub stock_value: f64,
    /// Stock valued at purchase price
    pub stock_cost: f64,
}

/// Replaces `NaN` and infinities with `0.0`.
#[must_use]
pub const fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

// Cast safety: stock and sale quantities are far below 2^53.
#[allow(clippy::cast_precision_loss)]
const fn units(quantity: i64) -> f64 {
    quantity as f64
}

// Folds from +0.0; `Iterator::sum` starts at -0.0 for floats.
fn sum<I: IntoIterator<Item = f64>>(values: I) -> f64 {
    finite_or_zero(
        values
            .into_iter()
            .fold(0.0, |total, value| total + finite_or_zero(value)),
    )
}

/// Sum of sale totals.
#[must_use]
pub fn total_revenue(sales: &[sale_entity::Model]) -> f64 {
    sum(sales.iter().map(|s| s.total_amount))
}

/// Sum of recorded expense amounts.
#[must_use]
pub fn total_expenses(expenses: &[expense_entity::Model]) -> f64 {
    sum(expenses.iter().map(|e| e.amount))
}

/// Purchase cost of everything sold.
///
/// A sale whose product has been deleted, or that never had one, contributes nothing.
#[must_use]
pub fn cost_of_goods_sold(
    sales: &[sale_entity::Model],
    products: &[product_entity::Model],
) -> f64 {
    let by_id: HashMap<i64, &product_entity::Model> =
        products.iter().map(|p| (p.id, p)).collect();

    sum(sales.iter().map(|sale| {
        sale.product_id
            .and_then(|id| by_id.get(&id))
            .map_or(0.0, |product| {
                units(sale.quantity) * finite_or_zero(product.purchase_price)
            })
    }))
}

/// Stock valued at selling price.
#[must_use]
pub fn stock_value(products: &[product_entity::Model]) -> f64 {
    sum(products
        .iter()
        .map(|p| units(p.quantity) * finite_or_zero(p.selling_price)))
}

/// Stock valued at purchase price.
#[must_use]
pub fn stock_cost(products: &[product_entity::Model]) -> f64 {
    sum(products
        .iter()
        .map(|p| units(p.quantity) * finite_or_zero(p.purchase_price)))
}

/// Computes the full summary from already-loaded collections.
#[must_use]
pub fn summarize(
    sales: &[sale_entity::Model],
    expenses: &[expense_entity::Model],
    products: &[product_entity::Model],
) -> FinancialSummary {
    let total_revenue = total_revenue(sales);
    let cost_of_goods_sold = cost_of_goods_sold(sales, products);
    let total_expenses = total_expenses(expenses);

    FinancialSummary {
        total_revenue,
        cost_of_goods_sold,
        total_expenses,
        net_profit: finite_or_zero(total_revenue - cost_of_goods_sold - total_expenses),
        stock_value: stock_value(products),
        stock_cost: stock_cost(products),
    }
}

/// Loads the owner's sales, expenses and products and summarizes them.
///
/// # Errors
/// Returns an error if any of the three reads fails; callers show an error instead of
/// presenting a partial summary.
pub async fn financial_summary(
    db: &DatabaseConnection,
    owner_key: &str,
) -> Result<FinancialSummary> {
    let sales = sale::get_sales(db, owner_key).await?;
    let expenses = expense::get_expenses(db, owner_key).await?;
    let products = product::get_products(db, owner_key).await?;

    Ok(summarize(&sales, &expenses, &products))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp)]
    use super::*;
    use crate::test_utils::*;

    #[test]
    fn test_reference_scenario() {
        let sales = vec![
            sale_model(1, "o", None, 1, 100.0),
            sale_model(2, "o", None, 1, 50.0),
        ];
        let expenses = vec![expense_model(1, "o", 30.0)];

        let summary = summarize(&sales, &expenses, &[]);
        assert_eq!(summary.total_revenue, 150.0);
        assert_eq!(summary.cost_of_goods_sold, 0.0);
        assert_eq!(summary.total_expenses, 30.0);
        assert_eq!(summary.net_profit, 120.0);
    }

    #[test]
    fn test_empty_collections() {
        assert_eq!(summarize(&[], &[], &[]), FinancialSummary::default());
    }

    #[test]
    fn test_cogs_uses_live_products_only() {
        let mut rice = product_model(1, "o", "Rice", 10);
        rice.purchase_price = 2.0;
        rice.selling_price = 3.0;

        let sales = vec![
            sale_model(1, "o", Some(1), 4, 3.0),
            // Product 99 was deleted
            sale_model(2, "o", Some(99), 5, 10.0),
            sale_model(3, "o", None, 1, 7.0),
        ];

        let summary = summarize(&sales, &[], &[rice]);
        assert_eq!(summary.total_revenue, 12.0 + 50.0 + 7.0);
        assert_eq!(summary.cost_of_goods_sold, 8.0);
        assert_eq!(summary.net_profit, 69.0 - 8.0);
    }

    #[test]
    fn test_expenses_do_not_include_purchase_cost() {
        let mut rice = product_model(1, "o", "Rice", 10);
        rice.purchase_price = 2.0;
        let expenses = vec![expense_model(1, "o", 5.0)];

        let summary = summarize(&[], &expenses, &[rice]);
        assert_eq!(summary.total_expenses, 5.0);
        assert_eq!(summary.stock_cost, 20.0);
        assert_eq!(summary.net_profit, -5.0);
    }

    #[test]
    fn test_stock_value_at_selling_price() {
        let mut a = product_model(1, "o", "A", 3);
        a.purchase_price = 1.0;
        a.selling_price = 2.5;
        let mut b = product_model(2, "o", "B", 0);
        b.selling_price = 100.0;

        assert_eq!(stock_value(&[a.clone(), b.clone()]), 7.5);
        assert_eq!(stock_cost(&[a, b]), 3.0);
    }

    #[test]
    fn test_non_finite_inputs_count_as_zero() {
        let mut broken = product_model(1, "o", "Broken", 2);
        broken.purchase_price = f64::NAN;
        broken.selling_price = f64::INFINITY;

        let sales = vec![
            sale_model(1, "o", Some(1), 2, f64::NAN),
            sale_model(2, "o", None, 1, 10.0),
        ];
        let expenses = vec![
            expense_model(1, "o", f64::NEG_INFINITY),
            expense_model(2, "o", 4.0),
        ];

        let summary = summarize(&sales, &expenses, &[broken]);
        assert_eq!(summary.total_revenue, 10.0);
        assert_eq!(summary.cost_of_goods_sold, 0.0);
        assert_eq!(summary.total_expenses, 4.0);
        assert_eq!(summary.net_profit, 6.0);
        assert_eq!(summary.stock_value, 0.0);
        assert_eq!(summary.stock_cost, 0.0);
    }

    #[test]
    fn test_empty_collections_give_positive_zero() {
        let summary = summarize(&[], &[], &[]);
        for value in [
            summary.total_revenue,
            summary.cost_of_goods_sold,
            summary.total_expenses,
            summary.net_profit,
            summary.stock_value,
            summary.stock_cost,
        ] {
            assert_eq!(value, 0.0);
            assert!(value.is_sign_positive());
        }
    }

    #[test]
    fn test_overflowing_sum_is_clamped() {
        let sales = vec![
            sale_model(1, "o", None, 1, f64::MAX),
            sale_model(2, "o", None, 1, f64::MAX),
        ];
        let summary = summarize(&sales, &[], &[]);
        assert_eq!(summary.total_revenue, 0.0);
        assert!(summary.net_profit.is_finite());
    }

    #[test]
    fn test_net_profit_identity() {
        let mut p = product_model(1, "o", "P", 9);
        p.purchase_price = 1.25;
        let sales = vec![sale_model(1, "o", Some(1), 3, 4.0), sale_model(2, "o", Some(1), 1, 4.0)];
        let expenses = vec![expense_model(1, "o", 2.5), expense_model(2, "o", 0.5)];

        let s = summarize(&sales, &expenses, &[p]);
        assert_eq!(
            s.net_profit,
            s.total_revenue - s.cost_of_goods_sold - s.total_expenses
        );
    }

    #[tokio::test]
    async fn test_financial_summary_integration() -> Result<()> {
        let backend = setup_backend().await?;
        let owner = "owner-1";

        let rice = create_test_product(&backend, owner, "Rice", 10, 2.0, 3.0).await?;
        create_test_sale(&backend, owner, rice.id, 4).await?;
        create_test_expense(&backend, owner, 5.0).await?;

        // Another owner's data never leaks in
        let other = create_test_product(&backend, "owner-2", "Oil", 100, 1.0, 1.0).await?;
        create_test_sale(&backend, "owner-2", other.id, 10).await?;

        let summary = financial_summary(backend.database(), owner).await?;
        assert_eq!(summary.total_revenue, 12.0);
        assert_eq!(summary.cost_of_goods_sold, 8.0);
        assert_eq!(summary.total_expenses, 5.0);
        assert_eq!(summary.net_profit, -1.0);
        assert_eq!(summary.stock_value, 18.0);
        assert_eq!(summary.stock_cost, 12.0);
        Ok(())
    }
}
