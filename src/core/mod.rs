//! Core business logic - owner-scoped records, stock side effects, validity and finance.

/// Account lookup, creation and profile changes
pub mod account;
/// Currency table, conversion and formatting
pub mod currency;
/// Expense records
pub mod expense;
/// Financial aggregation
pub mod finance;
/// Product records and stock adjustment
pub mod product;
/// Dashboard report and sale summaries
pub mod report;
/// Sale records and their stock side effects
pub mod sale;
/// Key-value state stored next to the records
pub mod system_state;
/// Account validity rule
pub mod validity;
