//! Live views over the user's records.
//!
//! A watch runs in a background task bound to the session's login scope.
//! Each delivery is a complete view that replaces the previous one. Logging
//! out cancels the task, which drops its key reference with it.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::access::LoadReport;
use crate::record::fields;
use crate::session::Session;
use lockbox_common::{Collection, Result};
use lockbox_store::{Filter, Snapshot};

/// Handle to a background view. Dropping it stops the view.
pub struct Watch<T> {
    receiver: mpsc::Receiver<Result<T>>,
    cancel: CancellationToken,
}

impl<T> Watch<T> {
    pub(crate) fn new(receiver: mpsc::Receiver<Result<T>>, cancel: CancellationToken) -> Self {
        Self { receiver, cancel }
    }

    /// Wait for the next complete view.
    ///
    /// Returns `None` once the watch is closed or the session logged out.
    pub async fn next(&mut self) -> Option<Result<T>> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            _ = self.cancel.cancelled() => None,
            item = self.receiver.recv() => item,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}

impl<T> Drop for Watch<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Watch the user's records in a collection.
///
/// A new view is emitted on every store snapshot, and again whenever the
/// session state changes so that content appears as soon as the session
/// unlocks.
///
/// # Errors
/// - `NotPermitted` if nobody is logged in
/// - `StoreUnavailable` if the subscription cannot be opened
pub async fn watch_records(session: &Session, collection: Collection) -> Result<Watch<LoadReport>> {
    let owner = session.user()?.clone();
    let mut subscription = session
        .store()
        .subscribe(collection.name(), Filter::eq(fields::USER_ID, owner.as_str()))
        .await?;

    let (tx, rx) = mpsc::channel(session.subscription_buffer());
    let cancel = session.scope();
    let token = cancel.clone();
    let keys = session.key_slot();
    let mut states = session.subscribe_state();

    tokio::spawn(async move {
        let mut latest: Option<Snapshot> = None;

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                item = subscription.next() => match item {
                    Some(Ok(snapshot)) => latest = Some(snapshot),
                    Some(Err(e)) => {
                        if tx.send(Err(e)).await.is_err() {
                            break;
                        }
                        continue;
                    }
                    None => break,
                },
                changed = states.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }

            let Some(snapshot) = &latest else {
                continue;
            };
            let report = {
                let key = keys.read().clone();
                LoadReport::from_documents(&snapshot.documents, key.as_deref())
            };

            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                sent = tx.send(Ok(report)) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }

        debug!(user = %owner, collection = %collection, "Record watch stopped");
    });

    Ok(Watch::new(rx, cancel))
}
