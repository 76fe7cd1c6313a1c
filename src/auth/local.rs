//! Local auth provider backed by the `identities` table.
//!
//! Passwords are stored as argon2 PHC strings. The signed-in identity id is persisted in
//! `system_state` so a restarted process finds the session again.

use super::{AuthEvent, AuthEventKind, AuthProvider, Identity};
use crate::{
    core::system_state,
    entities::{Identity as IdentityEntity, identity},
    errors::{Error, Result},
};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{DatabaseConnection, Set, prelude::*};
use tokio::{
    sync::{RwLock, broadcast},
    task,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// `system_state` key holding the signed-in identity id.
pub const SESSION_STATE_KEY: &str = "auth.session";

const MIN_PASSWORD_LEN: usize = 6;
const EVENT_CAPACITY: usize = 16;

const INVALID_CREDENTIALS: &str = "Invalid login credentials";
const ALREADY_REGISTERED: &str = "User already registered";

fn auth_error(message: &str) -> Error {
    Error::Auth {
        message: message.to_owned(),
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// [`AuthProvider`] over the local record store.
pub struct LocalAuthProvider {
    db: DatabaseConnection,
    hasher: Argon2<'static>,
    session: RwLock<Option<Identity>>,
    events: broadcast::Sender<AuthEvent>,
}

impl LocalAuthProvider {
    /// Creates a provider with the default argon2 parameters.
    #[must_use]
    pub fn new(db: DatabaseConnection) -> Self {
        Self::with_hasher(db, Argon2::default())
    }

    /// Creates a provider with a specific argon2 configuration.
    #[must_use]
    pub fn with_hasher(db: DatabaseConnection, hasher: Argon2<'static>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            db,
            hasher,
            session: RwLock::new(None),
            events,
        }
    }

    fn emit(&self, kind: AuthEventKind, identity: Option<Identity>) {
        if self.events.send(AuthEvent { kind, identity }).is_err() {
            debug!(?kind, "No auth listeners");
        }
    }

    async fn start_session(&self, identity: Identity) -> Result<Identity> {
        system_state::set_value(&self.db, SESSION_STATE_KEY, &identity.id).await?;
        *self.session.write().await = Some(identity.clone());
        self.emit(AuthEventKind::SignedIn, Some(identity.clone()));
        Ok(identity)
    }

    /// Hashes on the blocking pool.
    async fn hash_password(&self, password: &str) -> Result<String> {
        let hasher = self.hasher.clone();
        let password = password.to_owned();
        task::spawn_blocking(move || -> Result<String> {
            let salt = SaltString::generate(&mut OsRng);
            Ok(hasher.hash_password(password.as_bytes(), &salt)?.to_string())
        })
        .await
        .map_err(|e| Error::PasswordHash {
            message: e.to_string(),
        })?
    }

    async fn verify_password(&self, password: &str, stored: &str) -> bool {
        let hasher = self.hasher.clone();
        let password = password.to_owned();
        let stored = stored.to_owned();
        let outcome = task::spawn_blocking(move || match PasswordHash::new(&stored) {
            Ok(parsed) => hasher.verify_password(password.as_bytes(), &parsed).is_ok(),
            Err(e) => {
                warn!(error = %e, "Stored password hash is malformed");
                false
            }
        })
        .await;

        outcome.unwrap_or_else(|e| {
            warn!(error = %e, "Password verification task failed");
            false
        })
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<identity::Model>> {
        IdentityEntity::find()
            .filter(identity::Column::Email.eq(email))
            .one(&self.db)
            .await
            .map_err(Into::into)
    }

    /// Renews the current session and notifies listeners.
    ///
    /// Returns the identity, or `None` if nobody is signed in.
    pub async fn refresh_session(&self) -> Result<Option<Identity>> {
        let current = self.current_session().await?;
        if let Some(identity) = &current {
            debug!(identity_id = %identity.id, "Session refreshed");
            self.emit(AuthEventKind::TokenRefreshed, Some(identity.clone()));
        }
        Ok(current)
    }
}

#[async_trait]
impl AuthProvider for LocalAuthProvider {
    async fn sign_up(&self, email: &str, password: &str) -> Result<Identity> {
        let email = normalize_email(email);
        if !email.contains('@') {
            return Err(auth_error("Unable to validate email address: invalid format"));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(auth_error("Password should be at least 6 characters"));
        }
        if self.find_by_email(&email).await?.is_some() {
            return Err(auth_error(ALREADY_REGISTERED));
        }

        let model = identity::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            email: Set(email),
            password_hash: Set(self.hash_password(password).await?),
            created_at: Set(Utc::now().naive_utc()),
        };
        let identity: Identity = model.insert(&self.db).await?.into();

        info!(identity_id = %identity.id, "Identity registered");
        self.start_session(identity).await
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity> {
        let email = normalize_email(email);
        let Some(model) = self.find_by_email(&email).await? else {
            return Err(auth_error(INVALID_CREDENTIALS));
        };
        if !self.verify_password(password, &model.password_hash).await {
            return Err(auth_error(INVALID_CREDENTIALS));
        }

        let identity: Identity = model.into();
        info!(identity_id = %identity.id, "Signed in");
        self.start_session(identity).await
    }

    async fn sign_out(&self) -> Result<()> {
        system_state::remove_value(&self.db, SESSION_STATE_KEY).await?;
        let previous = self.session.write().await.take();
        if let Some(identity) = previous {
            info!(identity_id = %identity.id, "Signed out");
        }
        self.emit(AuthEventKind::SignedOut, None);
        Ok(())
    }

    async fn current_session(&self) -> Result<Option<Identity>> {
        if let Some(identity) = self.session.read().await.clone() {
            return Ok(Some(identity));
        }

        let Some(id) = system_state::get_value(&self.db, SESSION_STATE_KEY).await? else {
            return Ok(None);
        };
        let Some(model) = IdentityEntity::find_by_id(id).one(&self.db).await? else {
            warn!("Persisted session refers to a missing identity");
            return Ok(None);
        };

        let identity: Identity = model.into();
        *self.session.write().await = Some(identity.clone());
        Ok(Some(identity))
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}
