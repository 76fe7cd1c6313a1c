//! Backend handle - the record store and its change feed, passed explicitly.
//!
//! There is no process-wide client: the entry point builds one [`Backend`] and hands a
//! clone to every component that needs it.

use crate::realtime::{ChangeFeed, ChangeKind, Record};
use sea_orm::DatabaseConnection;

/// Shared handle to the record store and the notification channel.
#[derive(Debug, Clone)]
pub struct Backend {
    database: DatabaseConnection,
    changes: ChangeFeed,
}

impl Backend {
    /// Wraps an open connection with a fresh change feed.
    #[must_use]
    pub fn new(database: DatabaseConnection) -> Self {
        Self {
            database,
            changes: ChangeFeed::new(),
        }
    }

    /// The record store connection.
    #[must_use]
    pub const fn database(&self) -> &DatabaseConnection {
        &self.database
    }

    /// The notification channel.
    #[must_use]
    pub const fn changes(&self) -> &ChangeFeed {
        &self.changes
    }

    /// Publishes a committed change.
    pub(crate) fn notify<T: Record>(&self, kind: ChangeKind, record: T) {
        self.changes.publish(kind, record);
    }
}
