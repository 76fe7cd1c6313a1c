//! Expense entity - A recorded operating expense, stored in the account's base currency.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Expense database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "expenses")]
pub struct Model {
    /// Unique identifier for the expense
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Owner key of the account this expense belongs to
    pub owner_key: String,
    /// What the money was spent on
    pub description: String,
    /// Amount spent
    pub amount: f64,
    /// Free-form category (e.g. "rent", "transport")
    pub category: String,
    /// Calendar day of the expense
    pub date: Date,
    /// Optional notes
    pub notes: Option<String>,
    /// When the expense was recorded
    pub created_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
