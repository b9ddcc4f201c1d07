//! Record counts per collection for the dashboard.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use crate::record::fields;
use crate::session::Session;
use crate::watch::Watch;
use lockbox_common::{Collection, Result};
use lockbox_store::{Filter, Snapshot};

/// Number of records the user owns in each collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DashboardStats {
    pub passwords: usize,
    pub notes: usize,
    pub todos: usize,
    pub expenses: usize,
}

impl DashboardStats {
    pub fn count(&self, collection: Collection) -> usize {
        match collection {
            Collection::Passwords => self.passwords,
            Collection::Notes => self.notes,
            Collection::Todos => self.todos,
            Collection::Expenses => self.expenses,
        }
    }

    pub fn total(&self) -> usize {
        self.passwords + self.notes + self.todos + self.expenses
    }

    fn set(&mut self, collection: Collection, count: usize) {
        match collection {
            Collection::Passwords => self.passwords = count,
            Collection::Notes => self.notes = count,
            Collection::Todos => self.todos = count,
            Collection::Expenses => self.expenses = count,
        }
    }
}

/// Tracks which collections have reported at least once.
#[derive(Default)]
struct Tally {
    stats: DashboardStats,
    reported: [bool; 4],
}

impl Tally {
    fn record(&mut self, collection: Collection, snapshot: &Snapshot) {
        self.stats.set(collection, snapshot.len());
        if let Some(index) = Collection::ALL.iter().position(|c| *c == collection) {
            self.reported[index] = true;
        }
    }

    fn complete(&self) -> bool {
        self.reported.iter().all(|r| *r)
    }
}

/// Watch the user's record counts across all four collections.
///
/// The first value is emitted once every collection has reported, and a new
/// value follows every change. The four underlying subscriptions live and
/// die together.
///
/// # Errors
/// - `NotPermitted` if nobody is logged in
/// - `StoreUnavailable` if any subscription cannot be opened
pub async fn watch_stats(session: &Session) -> Result<Watch<DashboardStats>> {
    let owner = session.user()?.clone();
    let store = session.store();
    let filter = Filter::eq(fields::USER_ID, owner.as_str());

    let mut passwords = store.subscribe(Collection::Passwords.name(), filter.clone()).await?;
    let mut notes = store.subscribe(Collection::Notes.name(), filter.clone()).await?;
    let mut todos = store.subscribe(Collection::Todos.name(), filter.clone()).await?;
    let mut expenses = store.subscribe(Collection::Expenses.name(), filter).await?;

    let (tx, rx) = mpsc::channel(session.subscription_buffer());
    let cancel = session.scope();
    let token = cancel.clone();

    tokio::spawn(async move {
        let mut tally = Tally::default();

        loop {
            let (collection, item) = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                item = passwords.next() => (Collection::Passwords, item),
                item = notes.next() => (Collection::Notes, item),
                item = todos.next() => (Collection::Todos, item),
                item = expenses.next() => (Collection::Expenses, item),
            };

            let update = match item {
                Some(Ok(snapshot)) => {
                    tally.record(collection, &snapshot);
                    if !tally.complete() {
                        continue;
                    }
                    Ok(tally.stats)
                }
                Some(Err(e)) => Err(e),
                None => break,
            };

            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                sent = tx.send(update) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }

        debug!(user = %owner, "Dashboard watch stopped");
    });

    Ok(Watch::new(rx, cancel))
}
