//! Product entity - A stock item owned by one account.
//!
//! `quantity` is the on-hand stock. Besides direct edits it only moves as a side effect
//! of sale operations, and it never drops below zero.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Product database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    /// Unique identifier for the product
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Owner key of the account this product belongs to
    pub owner_key: String,
    /// Name of the product (e.g., "Rice 25kg")
    pub name: String,
    /// Free-form category used for grouping
    pub category: String,
    /// Stock-keeping unit code, not guaranteed unique
    pub sku: Option<String>,
    /// Units currently on hand
    pub quantity: i64,
    /// Units on hand when the product was first recorded
    pub initial_quantity: i64,
    /// Purchase cost per unit
    pub purchase_price: f64,
    /// Selling price per unit
    pub selling_price: f64,
    /// Free-text description
    pub description: Option<String>,
    /// When the product was created
    pub created_at: DateTime,
}

/// Products are referenced by sales through a plain column, not a foreign key:
/// deleting a product leaves its sales pointing at nothing.
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
