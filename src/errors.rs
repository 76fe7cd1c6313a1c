use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("{message}")]
    Auth { message: String },

    #[error("Account is disabled")]
    AccountDisabled,

    #[error("Account expired on {deadline}")]
    AccountExpired { deadline: NaiveDate },

    #[error("No signed-in identity")]
    NotSignedIn,

    #[error("An account already exists for owner {owner_key}")]
    AccountExists { owner_key: String },

    #[error("No account stored for owner {owner_key}")]
    AccountNotFound { owner_key: String },

    #[error("Invalid {field}: {message}")]
    Validation { field: &'static str, message: String },

    #[error("Invalid amount: {amount}")]
    InvalidAmount { amount: f64 },

    #[error("Invalid quantity: {quantity}")]
    InvalidQuantity { quantity: i64 },

    #[error("Unknown currency: {code}")]
    UnknownCurrency { code: String },

    #[error("Product not found: {id}")]
    ProductNotFound { id: i64 },

    #[error("Sale not found: {id}")]
    SaleNotFound { id: i64 },

    #[error("Expense not found: {id}")]
    ExpenseNotFound { id: i64 },

    #[error("Live {collection} could not be loaded")]
    LiveDataUnavailable { collection: &'static str },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Password hashing error: {message}")]
    PasswordHash { message: String },
}

impl Error {
    /// Shorthand for a field validation failure.
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    /// Whether this error should be shown to the user verbatim.
    ///
    /// Authentication and account-validity failures are surfaced as-is; everything
    /// else is replaced by a generic failure message in the UI.
    #[must_use]
    pub const fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Self::Auth { .. } | Self::AccountDisabled | Self::AccountExpired { .. }
        )
    }
}

impl From<argon2::password_hash::Error> for Error {
    fn from(value: argon2::password_hash::Error) -> Self {
        Self::PasswordHash {
            message: value.to_string(),
        }
    }
}

// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;
