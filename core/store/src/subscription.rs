//! Real-time query subscriptions.
//!
//! A subscription delivers complete snapshots of a query result. Each
//! snapshot replaces the previous one; consumers never see partial diffs.

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::store::{Document, DocumentStore, Filter};
use lockbox_common::Result;

/// Snapshots buffered per subscription before the feed waits on the consumer.
const SNAPSHOT_BUFFER: usize = 16;

/// Complete result of a subscribed query at one point in time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub documents: Vec<Document>,
}

impl Snapshot {
    pub fn new(documents: Vec<Document>) -> Self {
        Self { documents }
    }

    /// Number of documents in the snapshot.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// Handle to a live query.
///
/// Dropping the handle unsubscribes.
pub struct Subscription {
    receiver: mpsc::Receiver<Result<Snapshot>>,
    cancel: CancellationToken,
}

impl Subscription {
    /// Wrap a snapshot channel and the token that stops its producer.
    pub fn new(receiver: mpsc::Receiver<Result<Snapshot>>, cancel: CancellationToken) -> Self {
        Self { receiver, cancel }
    }

    /// Wait for the next snapshot.
    ///
    /// Returns `None` once the subscription has been cancelled or the
    /// producer has stopped.
    pub async fn next(&mut self) -> Option<Result<Snapshot>> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            _ = self.cancel.cancelled() => None,
            item = self.receiver.recv() => item,
        }
    }

    /// Stop receiving snapshots.
    pub fn unsubscribe(&self) {
        self.cancel.cancel();
    }

    /// Whether the subscription is still live.
    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// In-process change notifier shared by the bundled stores.
///
/// Stores call [`ChangeFeed::notify`] after every committed write; each
/// subscription re-runs its query when its collection changes.
#[derive(Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<String>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Announce that `collection` changed.
    pub fn notify(&self, collection: &str) {
        // No live subscribers is not an error.
        let _ = self.sender.send(collection.to_string());
    }

    /// Start a snapshot feed for a query against `store`.
    pub fn subscribe(
        &self,
        store: Arc<dyn DocumentStore>,
        collection: &str,
        filter: Filter,
    ) -> Subscription {
        let (tx, rx) = mpsc::channel(SNAPSHOT_BUFFER);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let collection = collection.to_string();

        // Subscribe before the first query so no write can slip between them.
        let mut changes = self.sender.subscribe();

        tokio::spawn(async move {
            let mut stale = true;
            loop {
                if stale {
                    let snapshot = store.query(&collection, &filter).await.map(Snapshot::new);
                    tokio::select! {
                        _ = token.cancelled() => break,
                        sent = tx.send(snapshot) => {
                            if sent.is_err() {
                                break;
                            }
                        }
                    }
                    stale = false;
                }

                tokio::select! {
                    _ = token.cancelled() => break,
                    change = changes.recv() => match change {
                        Ok(changed) => stale = changed == collection,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            debug!(collection = %collection, skipped, "Change feed lagged, refreshing");
                            stale = true;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
            debug!(collection = %collection, "Subscription closed");
        });

        Subscription::new(rx, cancel)
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(256)
    }
}
