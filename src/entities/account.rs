//! Account entity - The business profile paired with one authenticated identity.
//!
//! The validity deadline and the active flag are managed by an external administrative
//! process; this crate only reads them. Accounts are never hard-deleted.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Account database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "accounts")]
pub struct Model {
    /// Unique identifier, `0` for a placeholder that was never stored
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Identity this account belongs to (at most one account per identity)
    #[sea_orm(unique)]
    pub owner_key: String,
    /// Display or business name
    pub account_name: String,
    /// Contact email
    pub email: String,
    /// Last calendar day on which the account is usable, `None` for no limit
    pub validity_date: Option<Date>,
    /// Administrative on/off switch
    pub is_active: bool,
    /// Preferred ISO currency code (e.g. `"USD"`, `"XAF"`)
    pub currency: String,
    /// When the account was created
    pub created_at: DateTime,
}

/// `Account` has no relationships with other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
