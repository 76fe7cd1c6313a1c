//! Entity module - Contains all SeaORM entity definitions for the record store.
//! Every business record carries an `owner_key` naming the identity it belongs to;
//! no query in this crate runs without that filter.

pub mod account;
pub mod expense;
pub mod identity;
pub mod product;
pub mod sale;
pub mod system_state;

// Re-export specific types to avoid conflicts
pub use account::{Column as AccountColumn, Entity as Account, Model as AccountModel};
pub use expense::{Column as ExpenseColumn, Entity as Expense, Model as ExpenseModel};
pub use identity::{Column as IdentityColumn, Entity as Identity, Model as IdentityModel};
pub use product::{Column as ProductColumn, Entity as Product, Model as ProductModel};
pub use sale::{Column as SaleColumn, Entity as Sale, Model as SaleModel};
pub use system_state::{
    Column as SystemStateColumn, Entity as SystemState, Model as SystemStateModel,
};
