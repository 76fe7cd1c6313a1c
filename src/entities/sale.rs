//! Sale entity - One recorded sale, optionally tied to a product.
//!
//! `product_id` is a weak reference: the product may have been deleted since. The unit
//! price is captured at the time of sale and `total_amount` is always recomputed as
//! `quantity * unit_price` when written.
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Sale database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sales")]
pub struct Model {
    /// Unique identifier for the sale
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Owner key of the account this sale belongs to
    pub owner_key: String,
    /// Product sold, if any (may dangle)
    pub product_id: Option<i64>,
    /// Units sold
    pub quantity: i64,
    /// Price per unit at the time of sale
    pub unit_price: f64,
    /// `quantity * unit_price`
    pub total_amount: f64,
    /// Customer name, free text
    pub customer_name: String,
    /// Calendar day of the sale
    pub sale_date: Date,
    /// Optional time of day of the sale
    pub sale_time: Option<Time>,
    /// Optional notes
    pub notes: Option<String>,
    /// When the sale was recorded
    pub created_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
