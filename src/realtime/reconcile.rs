//! Real-time reconciliation - keeps local collections in step with the record store.
//!
//! Events are applied as they arrive, without re-fetching. The layer does no reordering or
//! deduplication of its own: the feed delivers each record's events in emission order, and
//! every application below is idempotent, so seeing the same event twice is harmless.

use super::{ChangeEvent, ChangeKind, Record, Subscription};
use crate::{
    backend::Backend,
    core::{
        expense as expense_ops,
        finance::{self, FinancialSummary},
        product as product_ops, sale as sale_ops,
    },
    entities::{expense, product, sale},
    errors::{Error, Result},
    session::SessionSnapshot,
};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Applies one change event to a local collection.
///
/// - `Insert` puts the record at the front, or replaces it in place if its id is already
///   present (the initial fetch may have raced the event).
/// - `Update` replaces the record with the same id, keeping its position.
/// - `Delete` removes the record with the same id.
///
/// Updates and deletes for unknown ids leave the collection untouched.
pub fn apply_change<T: Record>(records: &mut Vec<T>, event: ChangeEvent<T>) {
    let id = event.record.record_id();
    let position = records.iter().position(|r| r.record_id() == id);

    match (event.kind, position) {
        (ChangeKind::Insert | ChangeKind::Update, Some(index)) => records[index] = event.record,
        (ChangeKind::Insert, None) => records.insert(0, event.record),
        (ChangeKind::Update, None) => {
            debug!(record_type = ?T::TYPE, id, "Update for unknown record ignored");
        }
        (ChangeKind::Delete, Some(index)) => {
            records.remove(index);
        }
        (ChangeKind::Delete, None) => {}
    }
}

/// A collection that follows the change feed until detached.
pub struct LiveCollection<T> {
    records: Arc<RwLock<Vec<T>>>,
    version: watch::Receiver<u64>,
    task: Option<JoinHandle<()>>,
}

impl<T: Record> LiveCollection<T> {
    /// Starts applying events from `subscription` on top of `initial`.
    ///
    /// Subscribe before fetching `initial` so that nothing emitted in between is lost.
    #[must_use]
    pub fn spawn(mut subscription: Subscription<T>, initial: Vec<T>) -> Self {
        let records = Arc::new(RwLock::new(initial));
        let (version_tx, version) = watch::channel(0_u64);

        let shared = Arc::clone(&records);
        let task = tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                apply_change(&mut *shared.write().await, event);
                version_tx.send_modify(|v| *v += 1);
            }
            debug!(record_type = ?T::TYPE, "Change feed closed");
        });

        Self {
            records,
            version,
            task: Some(task),
        }
    }

    /// Current contents.
    pub async fn snapshot(&self) -> Vec<T> {
        self.records.read().await.clone()
    }

    /// A receiver that changes every time an event has been applied.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<u64> {
        self.version.clone()
    }

    /// Whether events are still being applied.
    #[must_use]
    pub const fn is_attached(&self) -> bool {
        self.task.is_some()
    }

    /// Stops following the feed and waits until the subscription has been released.
    ///
    /// The contents stay readable; no further event will be applied.
    pub async fn detach(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            // The subscription lives inside the task and is only dropped once the
            // runtime has processed the cancellation.
            let _ = task.await;
        }
    }
}

impl<T> Drop for LiveCollection<T> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn initial_or_empty<T>(
    collection: &'static str,
    owner_key: &str,
    result: Result<Vec<T>>,
    degraded: &mut Vec<&'static str>,
) -> Vec<T> {
    result.unwrap_or_else(|e| {
        warn!(%owner_key, error = %e, "Failed to load {collection}, starting empty");
        degraded.push(collection);
        Vec::new()
    })
}

/// The three live collections of one owner.
pub struct Workspace {
    owner_key: String,
    products: LiveCollection<product::Model>,
    sales: LiveCollection<sale::Model>,
    expenses: LiveCollection<expense::Model>,
    degraded: Vec<&'static str>,
}

impl Workspace {
    /// Subscribes to the owner's products, sales and expenses, then loads them.
    ///
    /// A failed initial read leaves that collection empty and marks the workspace
    /// degraded; events still apply, but [`summary`](Self::summary) refuses to report.
    pub async fn open(backend: &Backend, owner_key: &str) -> Self {
        let feed = backend.changes();
        let product_sub = feed.subscribe::<product::Model>(owner_key);
        let sale_sub = feed.subscribe::<sale::Model>(owner_key);
        let expense_sub = feed.subscribe::<expense::Model>(owner_key);

        let db = backend.database();
        let mut degraded = Vec::new();
        let products = initial_or_empty(
            "products",
            owner_key,
            product_ops::get_products(db, owner_key).await,
            &mut degraded,
        );
        let sales = initial_or_empty(
            "sales",
            owner_key,
            sale_ops::get_sales(db, owner_key).await,
            &mut degraded,
        );
        let expenses = initial_or_empty(
            "expenses",
            owner_key,
            expense_ops::get_expenses(db, owner_key).await,
            &mut degraded,
        );

        debug!(
            %owner_key,
            products = products.len(),
            sales = sales.len(),
            expenses = expenses.len(),
            "Workspace opened"
        );

        Self {
            owner_key: owner_key.to_owned(),
            products: LiveCollection::spawn(product_sub, products),
            sales: LiveCollection::spawn(sale_sub, sales),
            expenses: LiveCollection::spawn(expense_sub, expenses),
            degraded,
        }
    }

    /// Whether any initial read failed.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }

    /// Owner key this workspace follows.
    #[must_use]
    pub fn owner_key(&self) -> &str {
        &self.owner_key
    }

    /// Live products, newest first.
    #[must_use]
    pub const fn products(&self) -> &LiveCollection<product::Model> {
        &self.products
    }

    /// Live sales.
    #[must_use]
    pub const fn sales(&self) -> &LiveCollection<sale::Model> {
        &self.sales
    }

    /// Live expenses.
    #[must_use]
    pub const fn expenses(&self) -> &LiveCollection<expense::Model> {
        &self.expenses
    }

    /// Financial summary of the current contents.
    ///
    /// # Errors
    /// [`Error::LiveDataUnavailable`] if a collection failed to load; its empty contents
    /// are not reported as real figures.
    pub async fn summary(&self) -> Result<FinancialSummary> {
        if let Some(&collection) = self.degraded.first() {
            return Err(Error::LiveDataUnavailable { collection });
        }
        let products = self.products.snapshot().await;
        let sales = self.sales.snapshot().await;
        let expenses = self.expenses.snapshot().await;
        Ok(finance::summarize(&sales, &expenses, &products))
    }

    /// Tears down all three subscriptions.
    pub async fn close(mut self) {
        self.products.detach().await;
        self.sales.detach().await;
        self.expenses.detach().await;
        debug!(owner_key = %self.owner_key, "Workspace closed");
    }
}

/// Keeps a [`Workspace`] open for the owner of a granted session.
///
/// The workspace is closed as soon as access stops being granted (sign-out, expiry) and
/// opened again for whoever signs in next.
pub struct SessionWorkspace {
    current: Arc<Mutex<Option<Workspace>>>,
    task: Option<JoinHandle<()>>,
}

impl SessionWorkspace {
    /// Follows `sessions`, starting from its current snapshot.
    #[must_use]
    pub fn follow(backend: Backend, mut sessions: watch::Receiver<SessionSnapshot>) -> Self {
        let current = Arc::new(Mutex::new(None));
        let shared = Arc::clone(&current);

        let task = tokio::spawn(async move {
            loop {
                let owner_key = sessions
                    .borrow_and_update()
                    .require_owner()
                    .ok()
                    .map(str::to_owned);
                switch_owner(&backend, &shared, owner_key.as_deref()).await;
                if sessions.changed().await.is_err() {
                    debug!("Session channel closed");
                    break;
                }
            }
        });

        Self {
            current,
            task: Some(task),
        }
    }

    /// Owner of the open workspace, if any.
    pub async fn owner_key(&self) -> Option<String> {
        self.current
            .lock()
            .await
            .as_ref()
            .map(|workspace| workspace.owner_key().to_owned())
    }

    /// Summary of the open workspace.
    ///
    /// # Errors
    /// [`Error::NotSignedIn`] while no workspace is open, otherwise as
    /// [`Workspace::summary`].
    pub async fn summary(&self) -> Result<FinancialSummary> {
        let current = self.current.lock().await;
        match current.as_ref() {
            Some(workspace) => workspace.summary().await,
            None => Err(Error::NotSignedIn),
        }
    }

    /// Stops following the session and closes the open workspace.
    pub async fn close(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
        let workspace = self.current.lock().await.take();
        if let Some(workspace) = workspace {
            workspace.close().await;
        }
    }
}

impl Drop for SessionWorkspace {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn switch_owner(
    backend: &Backend,
    current: &Mutex<Option<Workspace>>,
    owner_key: Option<&str>,
) {
    let mut slot = current.lock().await;
    if slot.as_ref().map(Workspace::owner_key) == owner_key {
        return;
    }
    if let Some(workspace) = slot.take() {
        workspace.close().await;
    }
    if let Some(owner_key) = owner_key {
        *slot = Some(Workspace::open(backend, owner_key).await);
        info!(%owner_key, "Live workspace opened");
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::float_cmp)]
    use super::*;
    use crate::core::product::NewProduct;
    use crate::realtime::ChangeFeed;
    use crate::session::SessionManager;
    use crate::test_utils::*;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    async fn wait_for_subscribers(backend: &Backend, count: usize) {
        tokio::time::timeout(WAIT, async {
            while backend.changes().subscriber_count() != count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    async fn wait_for_owner(live: &SessionWorkspace, owner_key: Option<&str>) {
        tokio::time::timeout(WAIT, async {
            while live.owner_key().await.as_deref() != owner_key {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    async fn next_version(rx: &mut watch::Receiver<u64>) {
        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_update_preserves_position() {
        let a = product_model(1, "o", "A", 1);
        let b = product_model(2, "o", "B", 1);
        let mut records = vec![a.clone(), b.clone()];

        let mut a2 = a;
        a2.name = "A'".to_string();
        apply_change(&mut records, ChangeEvent::new(ChangeKind::Update, a2.clone()));

        assert_eq!(records, vec![a2, b]);
    }

    #[test]
    fn test_insert_prepends() {
        let mut records = vec![product_model(1, "o", "A", 1)];
        apply_change(
            &mut records,
            ChangeEvent::new(ChangeKind::Insert, product_model(2, "o", "B", 1)),
        );
        let ids: Vec<i64> = records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn test_insert_of_known_id_replaces_in_place() {
        let mut records = vec![product_model(1, "o", "A", 1), product_model(2, "o", "B", 1)];
        apply_change(
            &mut records,
            ChangeEvent::new(ChangeKind::Insert, product_model(2, "o", "B2", 1)),
        );
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].name, "B2");
    }

    #[test]
    fn test_delete_removes_and_is_idempotent() {
        let a = product_model(1, "o", "A", 1);
        let b = product_model(2, "o", "B", 1);
        let mut records = vec![a.clone(), b.clone()];

        apply_change(&mut records, ChangeEvent::new(ChangeKind::Delete, a.clone()));
        apply_change(&mut records, ChangeEvent::new(ChangeKind::Delete, a));
        assert_eq!(records, vec![b]);
    }

    #[test]
    fn test_repeated_update_is_harmless() {
        let a = product_model(1, "o", "A", 5);
        let mut records = vec![a.clone()];
        let mut a2 = a;
        a2.quantity = 3;

        apply_change(&mut records, ChangeEvent::new(ChangeKind::Update, a2.clone()));
        apply_change(&mut records, ChangeEvent::new(ChangeKind::Update, a2.clone()));
        assert_eq!(records, vec![a2]);
    }

    #[test]
    fn test_update_for_unknown_id_is_ignored() {
        let mut records = vec![product_model(1, "o", "A", 1)];
        apply_change(
            &mut records,
            ChangeEvent::new(ChangeKind::Update, product_model(9, "o", "Z", 1)),
        );
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, 1);
    }

    #[tokio::test]
    async fn test_live_collection_applies_events() {
        let feed = ChangeFeed::new();
        let sub = feed.subscribe::<product::Model>("o");
        let live = LiveCollection::spawn(sub, vec![product_model(1, "o", "A", 1)]);
        let mut version = live.watch();

        feed.publish(ChangeKind::Insert, product_model(2, "o", "B", 1));
        next_version(&mut version).await;

        let ids: Vec<i64> = live.snapshot().await.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[tokio::test]
    async fn test_detached_collection_ignores_later_events() {
        let feed = ChangeFeed::new();
        let sub = feed.subscribe::<product::Model>("o");
        let mut live = LiveCollection::spawn(sub, Vec::new());

        live.detach().await;
        assert!(!live.is_attached());
        assert_eq!(feed.subscriber_count(), 0);

        feed.publish(ChangeKind::Insert, product_model(2, "o", "B", 1));
        tokio::task::yield_now().await;
        assert!(live.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_workspace_follows_store_mutations() -> Result<()> {
        let backend = setup_backend().await?;
        let owner = "owner-1";
        let existing = create_test_product(&backend, owner, "Rice", 10, 2.0, 3.0).await?;

        let workspace = Workspace::open(&backend, owner).await;
        assert_eq!(workspace.products().snapshot().await, vec![existing.clone()]);

        let mut versions = workspace.products().watch();

        // The sale decrements stock, which arrives as a product update.
        create_test_sale(&backend, owner, existing.id, 3).await?;
        next_version(&mut versions).await;

        let products = workspace.products().snapshot().await;
        assert_eq!(products.len(), 1);
        assert_eq!(products[0].quantity, 7);

        // Summary is recomputed from the live contents.
        let mut sale_versions = workspace.sales().watch();
        if workspace.sales().snapshot().await.is_empty() {
            next_version(&mut sale_versions).await;
        }
        let summary = workspace.summary().await?;
        assert_eq!(summary.total_revenue, 9.0);
        assert_eq!(summary.cost_of_goods_sold, 6.0);
        assert_eq!(summary.stock_value, 21.0);

        workspace.close().await;
        assert_eq!(backend.changes().subscriber_count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_workspace_ignores_other_owners() -> Result<()> {
        let backend = setup_backend().await?;
        let workspace = Workspace::open(&backend, "owner-1").await;
        let mut versions = workspace.products().watch();

        crate::core::product::create_product(
            &backend,
            "owner-2",
            NewProduct {
                name: "Not mine".to_string(),
                category: "misc".to_string(),
                sku: None,
                quantity: 1,
                purchase_price: 1.0,
                selling_price: 2.0,
                description: None,
            },
        )
        .await?;
        create_test_product(&backend, "owner-1", "Mine", 1, 1.0, 2.0).await?;
        next_version(&mut versions).await;

        let products = workspace.products().snapshot().await;
        assert_eq!(products.len(), 1);
        assert_eq!(products[0].name, "Mine");

        workspace.close().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_initial_load_is_not_reported_as_zero() -> Result<()> {
        // No tables, so every initial read fails
        let db = crate::config::database::create_connection("sqlite::memory:").await?;
        let backend = Backend::new(db);

        let workspace = Workspace::open(&backend, "owner-1").await;
        assert!(workspace.is_degraded());
        assert!(workspace.products().snapshot().await.is_empty());
        assert!(matches!(
            workspace.summary().await,
            Err(Error::LiveDataUnavailable {
                collection: "products"
            })
        ));

        workspace.close().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_session_workspace_follows_sign_in_and_out() -> Result<()> {
        let backend = setup_backend().await?;
        let session = SessionManager::with_options(
            backend.clone(),
            test_auth(&backend),
            Duration::from_secs(3600),
            "USD",
        );
        session.bootstrap().await;
        let live = SessionWorkspace::follow(backend.clone(), session.watch());
        assert!(matches!(live.summary().await, Err(Error::NotSignedIn)));

        let snapshot = session.sign_up("a@b.c", "secret1", "Shop", None).await?;
        let owner = snapshot.owner_key().unwrap().to_string();
        wait_for_owner(&live, Some(&owner)).await;
        // The session's account watch plus three collections
        wait_for_subscribers(&backend, 4).await;

        session.sign_out().await?;
        wait_for_owner(&live, None).await;
        wait_for_subscribers(&backend, 0).await;
        assert!(matches!(live.summary().await, Err(Error::NotSignedIn)));

        session.sign_in("a@b.c", "secret1").await?;
        wait_for_owner(&live, Some(&owner)).await;
        create_test_product(&backend, &owner, "Rice", 2, 1.0, 3.0).await?;
        tokio::time::timeout(WAIT, async {
            while live.summary().await.map(|s| s.stock_value).ok() != Some(6.0) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        live.close().await;
        session.shutdown();
        wait_for_subscribers(&backend, 0).await;
        Ok(())
    }
}
