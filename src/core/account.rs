//! Account business logic - The business profile of a signed-in identity.
//!
//! There is at most one account per owner key. The validity deadline and the active flag
//! are written only at creation; afterwards they belong to an administrative process
//! outside this crate.

use crate::{
    auth::Identity,
    backend::Backend,
    core::{currency, system_state},
    entities::{Account, account},
    errors::{Error, Result},
    realtime::ChangeKind,
};
use chrono::{NaiveDate, Utc};
use sea_orm::{Set, prelude::*};
use tracing::{debug, info, warn};

/// `system_state` key holding the last chosen display currency.
pub const CURRENCY_STATE_KEY: &str = "display.currency";

/// Name shown for an account that has not been stored yet.
pub const PLACEHOLDER_NAME: &str = "User";

/// Fields of a new account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccount {
    /// Display or business name
    pub account_name: String,
    /// Contact email
    pub email: String,
    /// Last usable day, `None` for no limit
    pub validity_date: Option<NaiveDate>,
    /// Preferred currency code
    pub currency: String,
}

fn validate_currency(code: &str) -> Result<String> {
    currency::find(code)
        .map(|info| info.code.to_owned())
        .ok_or_else(|| Error::UnknownCurrency {
            code: code.to_owned(),
        })
}

/// Retrieves the account of `owner_key`, if one is stored.
pub async fn get_account_for_owner<C>(db: &C, owner_key: &str) -> Result<Option<account::Model>>
where
    C: ConnectionTrait,
{
    Account::find()
        .filter(account::Column::OwnerKey.eq(owner_key))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Builds an in-memory account for an identity without a stored one.
///
/// The placeholder has id `0`, is active and has no deadline, so it never blocks the
/// session while the real record is missing.
#[must_use]
pub fn placeholder_account(identity: &Identity, currency: &str) -> account::Model {
    account::Model {
        id: 0,
        owner_key: identity.id.clone(),
        account_name: PLACEHOLDER_NAME.to_owned(),
        email: identity.email.clone(),
        validity_date: None,
        is_active: true,
        currency: currency.to_owned(),
        created_at: Utc::now().naive_utc(),
    }
}

/// Stores the account paired with `owner_key`.
///
/// # Errors
/// Returns an error if:
/// - An account already exists for this owner
/// - The name is blank or the currency code is unknown
/// - The database insert fails
pub async fn create_account(
    backend: &Backend,
    owner_key: &str,
    input: NewAccount,
) -> Result<account::Model> {
    let account_name = input.account_name.trim();
    if account_name.is_empty() {
        return Err(Error::validation("account_name", "Account name cannot be empty"));
    }
    let currency = validate_currency(&input.currency)?;

    if get_account_for_owner(backend.database(), owner_key)
        .await?
        .is_some()
    {
        return Err(Error::AccountExists {
            owner_key: owner_key.to_owned(),
        });
    }

    let account = account::ActiveModel {
        owner_key: Set(owner_key.to_owned()),
        account_name: Set(account_name.to_owned()),
        email: Set(input.email.trim().to_owned()),
        validity_date: Set(input.validity_date),
        is_active: Set(true),
        currency: Set(currency),
        created_at: Set(Utc::now().naive_utc()),
        ..Default::default()
    };

    let account = account.insert(backend.database()).await?;
    info!(%owner_key, account_id = account.id, "Account created");
    backend.notify(ChangeKind::Insert, account.clone());
    Ok(account)
}

async fn stored_account(backend: &Backend, owner_key: &str) -> Result<account::Model> {
    get_account_for_owner(backend.database(), owner_key)
        .await?
        .ok_or_else(|| Error::AccountNotFound {
            owner_key: owner_key.to_owned(),
        })
}

/// Changes the display name and contact email of the owner's account.
///
/// # Errors
/// Returns an error if the name is blank, no account is stored, or the update fails.
pub async fn update_account_profile(
    backend: &Backend,
    owner_key: &str,
    account_name: &str,
    email: &str,
) -> Result<account::Model> {
    let account_name = account_name.trim();
    if account_name.is_empty() {
        return Err(Error::validation("account_name", "Account name cannot be empty"));
    }

    let mut account: account::ActiveModel = stored_account(backend, owner_key).await?.into();
    account.account_name = Set(account_name.to_owned());
    account.email = Set(email.trim().to_owned());

    let account = account.update(backend.database()).await?;
    debug!(%owner_key, "Account profile updated");
    backend.notify(ChangeKind::Update, account.clone());
    Ok(account)
}

/// Changes the preferred currency and caches it locally.
///
/// Stored amounts are not converted.
///
/// # Errors
/// Returns an error if the code is unknown, no account is stored, or a write fails.
pub async fn update_account_currency(
    backend: &Backend,
    owner_key: &str,
    code: &str,
) -> Result<account::Model> {
    let code = validate_currency(code)?;

    let mut account: account::ActiveModel = stored_account(backend, owner_key).await?.into();
    account.currency = Set(code.clone());
    let account = account.update(backend.database()).await?;

    system_state::set_value(backend.database(), CURRENCY_STATE_KEY, &code).await?;

    info!(%owner_key, currency = %code, "Account currency changed");
    backend.notify(ChangeKind::Update, account.clone());
    Ok(account)
}

/// The locally cached currency, or `default` if none is cached or it cannot be read.
pub async fn cached_currency(db: &DatabaseConnection, default: &str) -> String {
    match system_state::get_value(db, CURRENCY_STATE_KEY).await {
        Ok(Some(code)) if currency::find(&code).is_some() => code,
        Ok(_) => default.to_owned(),
        Err(e) => {
            warn!(error = %e, "Failed to read cached currency, using default");
            default.to_owned()
        }
    }
}
