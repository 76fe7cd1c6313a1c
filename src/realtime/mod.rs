//! # Change feed
//!
//! The notification channel: every committed insert, update or delete of an owned record
//! is published once, and subscribers receive the events for one record type and one
//! owner key, in publication order.

/// Applying change events to local collections
pub mod reconcile;

pub use reconcile::{LiveCollection, SessionWorkspace, Workspace, apply_change};

use crate::entities::{account, expense, product, sale};
use std::fmt;
use std::marker::PhantomData;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Capacity of the underlying broadcast channel. Slow subscribers past this many
/// pending events lose the oldest ones.
const FEED_CAPACITY: usize = 1024;

/// What happened to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// The record was created
    Insert,
    /// The record was modified; the event carries the new version
    Update,
    /// The record was removed; the event carries the last known version
    Delete,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        };
        f.write_str(label)
    }
}

/// The record types that flow through the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    /// [`account::Model`]
    Account,
    /// [`product::Model`]
    Product,
    /// [`sale::Model`]
    Sale,
    /// [`expense::Model`]
    Expense,
}

/// A record of any type, as carried on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangedRecord {
    /// An account row
    Account(account::Model),
    /// A product row
    Product(product::Model),
    /// A sale row
    Sale(sale::Model),
    /// An expense row
    Expense(expense::Model),
}

impl ChangedRecord {
    /// The type tag of the wrapped record.
    #[must_use]
    pub const fn record_type(&self) -> RecordType {
        match self {
            Self::Account(_) => RecordType::Account,
            Self::Product(_) => RecordType::Product,
            Self::Sale(_) => RecordType::Sale,
            Self::Expense(_) => RecordType::Expense,
        }
    }

    /// Owner key of the wrapped record.
    #[must_use]
    pub fn owner_key(&self) -> &str {
        match self {
            Self::Account(r) => &r.owner_key,
            Self::Product(r) => &r.owner_key,
            Self::Sale(r) => &r.owner_key,
            Self::Expense(r) => &r.owner_key,
        }
    }
}

/// One published change.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    /// What happened
    pub kind: ChangeKind,
    /// The record it happened to
    pub record: ChangedRecord,
}

/// A record type that can be published on the feed and kept in a live collection.
pub trait Record: Clone + Send + Sync + 'static {
    /// Type tag used to route events
    const TYPE: RecordType;

    /// Primary key used to match updates and deletes
    fn record_id(&self) -> i64;

    /// Wraps this record for publication.
    fn into_changed(self) -> ChangedRecord;

    /// Unwraps a published record of this type.
    fn from_changed(record: ChangedRecord) -> Option<Self>;
}

macro_rules! impl_record {
    ($model:ty, $variant:ident) => {
        impl Record for $model {
            const TYPE: RecordType = RecordType::$variant;

            fn record_id(&self) -> i64 {
                self.id
            }

            fn into_changed(self) -> ChangedRecord {
                ChangedRecord::$variant(self)
            }

            fn from_changed(record: ChangedRecord) -> Option<Self> {
                match record {
                    ChangedRecord::$variant(r) => Some(r),
                    _ => None,
                }
            }
        }
    };
}

impl_record!(account::Model, Account);
impl_record!(product::Model, Product);
impl_record!(sale::Model, Sale);
impl_record!(expense::Model, Expense);

/// A typed change delivered to a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent<T> {
    /// What happened
    pub kind: ChangeKind,
    /// The record it happened to
    pub record: T,
}

impl<T> ChangeEvent<T> {
    /// Creates an event.
    pub const fn new(kind: ChangeKind, record: T) -> Self {
        Self { kind, record }
    }
}

/// Publishing side of the notification channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<Change>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeFeed {
    /// Creates a feed with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(FEED_CAPACITY);
        Self { sender }
    }

    /// Publishes one change. Having no subscribers is not an error.
    pub fn publish<T: Record>(&self, kind: ChangeKind, record: T) {
        let record = record.into_changed();
        trace!(
            %kind,
            record_type = ?record.record_type(),
            owner_key = %record.owner_key(),
            "Publishing change"
        );
        if self.sender.send(Change { kind, record }).is_err() {
            trace!("No subscribers for change");
        }
    }

    /// Subscribes to changes of record type `T` owned by `owner_key`.
    ///
    /// Dropping the returned [`Subscription`] unsubscribes.
    #[must_use]
    pub fn subscribe<T: Record>(&self, owner_key: &str) -> Subscription<T> {
        debug!(record_type = ?T::TYPE, %owner_key, "New change subscription");
        Subscription {
            receiver: self.sender.subscribe(),
            owner_key: owner_key.to_owned(),
            _record: PhantomData,
        }
    }

    /// Number of live subscriptions across all types and owners.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// A subscription handle for one record type and one owner.
pub struct Subscription<T> {
    receiver: broadcast::Receiver<Change>,
    owner_key: String,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record> Subscription<T> {
    /// Owner key this subscription is scoped to.
    #[must_use]
    pub fn owner_key(&self) -> &str {
        &self.owner_key
    }

    /// Receives the next matching event.
    ///
    /// Returns `None` once the feed has been dropped.
    pub async fn recv(&mut self) -> Option<ChangeEvent<T>> {
        loop {
            let change = match self.receiver.recv().await {
                Ok(change) => change,
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    debug!(lagged = count, record_type = ?T::TYPE, "Subscriber lagged, some events dropped");
                    continue;
                }
            };

            if let Some(event) = self.matching(change) {
                return Some(event);
            }
        }
    }

    /// Receives the next matching event without waiting.
    ///
    /// Returns `None` when nothing matching is pending.
    pub fn try_recv(&mut self) -> Option<ChangeEvent<T>> {
        loop {
            let change = match self.receiver.try_recv() {
                Ok(change) => change,
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            };

            if let Some(event) = self.matching(change) {
                return Some(event);
            }
        }
    }

    fn matching(&self, change: Change) -> Option<ChangeEvent<T>> {
        if change.record.record_type() != T::TYPE || change.record.owner_key() != self.owner_key {
            return None;
        }
        T::from_changed(change.record).map(|record| ChangeEvent::new(change.kind, record))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::test_utils::{expense_model, product_model};

    #[test]
    fn test_subscription_filters_by_owner_and_type() {
        let feed = ChangeFeed::new();
        let mut products = feed.subscribe::<product::Model>("owner-a");

        feed.publish(ChangeKind::Insert, product_model(1, "owner-b", "Other", 1));
        feed.publish(ChangeKind::Insert, expense_model(2, "owner-a", 10.0));
        feed.publish(ChangeKind::Insert, product_model(3, "owner-a", "Mine", 4));

        let event = products.try_recv().unwrap();
        assert_eq!(event.kind, ChangeKind::Insert);
        assert_eq!(event.record.id, 3);
        assert!(products.try_recv().is_none());
    }

    #[test]
    fn test_events_arrive_in_publication_order() {
        let feed = ChangeFeed::new();
        let mut products = feed.subscribe::<product::Model>("owner-a");

        let product = product_model(1, "owner-a", "Soap", 4);
        feed.publish(ChangeKind::Insert, product.clone());
        feed.publish(ChangeKind::Update, product.clone());
        feed.publish(ChangeKind::Delete, product);

        let kinds: Vec<ChangeKind> = std::iter::from_fn(|| products.try_recv())
            .map(|e| e.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![ChangeKind::Insert, ChangeKind::Update, ChangeKind::Delete]
        );
    }

    #[test]
    fn test_dropping_subscription_unsubscribes() {
        let feed = ChangeFeed::new();
        let first = feed.subscribe::<product::Model>("owner-a");
        let second = feed.subscribe::<sale::Model>("owner-a");
        assert_eq!(feed.subscriber_count(), 2);

        drop(first);
        drop(second);
        assert_eq!(feed.subscriber_count(), 0);
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let feed = ChangeFeed::new();
        feed.publish(ChangeKind::Insert, product_model(1, "owner-a", "Soap", 1));
        assert_eq!(feed.subscriber_count(), 0);
    }

    #[test]
    fn test_change_kind_labels() {
        assert_eq!(ChangeKind::Insert.to_string(), "INSERT");
        assert_eq!(ChangeKind::Update.to_string(), "UPDATE");
        assert_eq!(ChangeKind::Delete.to_string(), "DELETE");
    }
}
