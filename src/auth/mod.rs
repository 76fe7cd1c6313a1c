//! Authentication collaborator.
//!
//! [`AuthProvider`] is the seam between the session manager and whatever issues identities.
//! [`local::LocalAuthProvider`] implements it on top of the record store.

pub mod local;

pub use local::LocalAuthProvider;

use crate::{entities::identity, errors::Result};
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast;

/// An authenticated identity. Its id is the owner key of everything it creates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Identity {
    /// Stable identifier
    pub id: String,
    /// Sign-in email
    pub email: String,
}

impl From<identity::Model> for Identity {
    fn from(model: identity::Model) -> Self {
        Self {
            id: model.id,
            email: model.email,
        }
    }
}

/// What happened to the signed-in identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEventKind {
    /// An identity signed in
    SignedIn,
    /// The session ended
    SignedOut,
    /// The current session was renewed
    TokenRefreshed,
}

/// Identity change pushed by an [`AuthProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthEvent {
    /// Kind of change
    pub kind: AuthEventKind,
    /// Identity after the change; `None` when signed out
    pub identity: Option<Identity>,
}

/// Credential check and session issuance.
///
/// Errors from `sign_up` and `sign_in` carry a message meant to be shown to the user as is.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Registers a new identity and signs it in.
    async fn sign_up(&self, email: &str, password: &str) -> Result<Identity>;

    /// Checks credentials and signs the identity in.
    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity>;

    /// Ends the current session.
    async fn sign_out(&self) -> Result<()>;

    /// The identity of the current session, if any.
    async fn current_session(&self) -> Result<Option<Identity>>;

    /// Subscribes to identity changes. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}
