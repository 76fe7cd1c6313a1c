//! Account validity rule.
//!
//! Decides whether an account may use the application. The rule is pure: callers pass the
//! calendar day to evaluate against, and [`evaluate_today`] supplies the local date.

use crate::entities::account;
use chrono::{Local, NaiveDate};
use std::fmt;

/// Why an account is not usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvalidReason {
    /// The validity deadline has passed
    Expired,
    /// The account was switched off
    Disabled,
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Expired => f.write_str("EXPIRED"),
            Self::Disabled => f.write_str("DISABLED"),
        }
    }
}

/// Outcome of the validity rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validity {
    /// Whether the account may be used
    pub valid: bool,
    /// Set exactly when `valid` is false
    pub reason: Option<InvalidReason>,
}

impl Validity {
    /// A usable account.
    pub const VALID: Self = Self {
        valid: true,
        reason: None,
    };

    const fn invalid(reason: InvalidReason) -> Self {
        Self {
            valid: false,
            reason: Some(reason),
        }
    }
}

/// Evaluates `account` on the calendar day `today`.
///
/// A disabled account is invalid whatever its deadline. An active account is expired only
/// when `today` is strictly after its deadline; the deadline day itself is still valid.
/// No account, or no deadline, means no constraint.
#[must_use]
pub fn evaluate(account: Option<&account::Model>, today: NaiveDate) -> Validity {
    let Some(account) = account else {
        return Validity::VALID;
    };

    if !account.is_active {
        return Validity::invalid(InvalidReason::Disabled);
    }

    match account.validity_date {
        Some(deadline) if today > deadline => Validity::invalid(InvalidReason::Expired),
        _ => Validity::VALID,
    }
}

/// Evaluates `account` on the current local date.
#[must_use]
pub fn evaluate_today(account: Option<&account::Model>) -> Validity {
    evaluate(account, today())
}

/// The current local calendar day.
#[must_use]
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}
