//! Expense business logic - Recorded operating expenses.
//!
//! Expenses can be created, listed and deleted. They are never edited in place.

use crate::{
    backend::Backend,
    entities::{Expense, expense},
    errors::{Error, Result},
    realtime::ChangeKind,
};
use chrono::{NaiveDate, Utc};
use sea_orm::{QueryOrder, Set, prelude::*};
use tracing::info;

/// Fields of an expense supplied by the owner.
#[derive(Debug, Clone, PartialEq)]
pub struct NewExpense {
    /// What the money was spent on
    pub description: String,
    /// Amount spent
    pub amount: f64,
    /// Free-form category
    pub category: String,
    /// Calendar day of the expense
    pub date: NaiveDate,
    /// Optional notes
    pub notes: Option<String>,
}

/// Retrieves all expenses of `owner_key`, most recent date first.
pub async fn get_expenses(db: &DatabaseConnection, owner_key: &str) -> Result<Vec<expense::Model>> {
    Expense::find()
        .filter(expense::Column::OwnerKey.eq(owner_key))
        .order_by_desc(expense::Column::Date)
        .order_by_desc(expense::Column::CreatedAt)
        .order_by_desc(expense::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Sum of all recorded expenses of `owner_key`.
pub async fn total_expenses(db: &DatabaseConnection, owner_key: &str) -> Result<f64> {
    let expenses = get_expenses(db, owner_key).await?;
    Ok(crate::core::finance::total_expenses(&expenses))
}

/// Records an expense.
///
/// Negative amounts are accepted and act as refunds.
///
/// # Errors
/// Returns an error if the description is blank, the amount is not finite, or the insert
/// fails.
pub async fn create_expense(
    backend: &Backend,
    owner_key: &str,
    input: NewExpense,
) -> Result<expense::Model> {
    let description = input.description.trim();
    if description.is_empty() {
        return Err(Error::validation(
            "description",
            "Expense description cannot be empty",
        ));
    }
    if !input.amount.is_finite() {
        return Err(Error::InvalidAmount {
            amount: input.amount,
        });
    }

    let expense = expense::ActiveModel {
        owner_key: Set(owner_key.to_owned()),
        description: Set(description.to_owned()),
        amount: Set(input.amount),
        category: Set(input.category.trim().to_owned()),
        date: Set(input.date),
        notes: Set(input
            .notes
            .map(|n| n.trim().to_owned())
            .filter(|n| !n.is_empty())),
        created_at: Set(Utc::now().naive_utc()),
        ..Default::default()
    };

    let expense = expense.insert(backend.database()).await?;
    info!(%owner_key, expense_id = expense.id, amount = expense.amount, "Expense recorded");
    backend.notify(ChangeKind::Insert, expense.clone());
    Ok(expense)
}

/// Deletes an expense of `owner_key`.
///
/// # Errors
/// Returns an error if the expense does not exist for this owner or the delete fails.
pub async fn delete_expense(backend: &Backend, owner_key: &str, expense_id: i64) -> Result<()> {
    let expense = Expense::find_by_id(expense_id)
        .filter(expense::Column::OwnerKey.eq(owner_key))
        .one(backend.database())
        .await?
        .ok_or(Error::ExpenseNotFound { id: expense_id })?;

    expense.clone().delete(backend.database()).await?;
    info!(%owner_key, expense_id, "Expense deleted");
    backend.notify(ChangeKind::Delete, expense);
    Ok(())
}
