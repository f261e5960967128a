use super::{CorrelationId, PendingRequest, Resolution};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, trace};

/// Errors that may be returned when registering a [`PendingRequest`]
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TableError {
    /// An entry with the same identifier is still pending
    #[error("correlation identifier {0} is already registered")]
    DuplicateCorrelationId(CorrelationId),
    /// The configured limit of in-flight requests has been reached
    #[error("limit of {0} pending requests reached")]
    CapacityExceeded(usize),
}

type Entries = Mutex<HashMap<CorrelationId, Entry>>;

struct Entry {
    completion: oneshot::Sender<Resolution>,
    created_at: Instant,
    timer: JoinHandle<()>,
}

impl Entry {
    fn resolve(self, id: &str, resolution: Resolution) {
        let elapsed = self.created_at.elapsed();

        if self.completion.send(resolution).is_err() {
            trace!(id, ?elapsed, "Waiting side went away before resolution");
        } else {
            trace!(id, ?elapsed, "Resolved pending request");
        }
    }
}

/// Concurrency-safe mapping from [`CorrelationId`] to in-flight requests
///
/// Cloning is cheap and yields a handle to the same table. Every operation takes the
/// same lock, so for any given identifier exactly one of [`complete`](Self::complete),
/// [`expire`](Self::expire) or [`abandon`](Self::abandon) will find the entry.
#[derive(Clone)]
pub struct CorrelationTable {
    entries: Arc<Entries>,
    capacity: Option<usize>,
}

impl Default for CorrelationTable {
    fn default() -> Self {
        Self::new(None)
    }
}

impl CorrelationTable {
    /// Creates an empty table which optionally refuses new entries once `capacity` is reached
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            capacity,
        }
    }

    /// Inserts a request and arms its deadline timer
    pub async fn register(&self, pending: PendingRequest) -> Result<(), TableError> {
        let PendingRequest {
            id,
            completion,
            deadline,
            created_at,
        } = pending;

        let mut entries = self.entries.lock().await;

        if entries.contains_key(&id) {
            return Err(TableError::DuplicateCorrelationId(id));
        }

        if let Some(capacity) = self.capacity {
            if entries.len() >= capacity {
                return Err(TableError::CapacityExceeded(capacity));
            }
        }

        let timer = tokio::spawn(expire_at(
            Arc::downgrade(&self.entries),
            id.clone(),
            deadline,
        ));

        debug!(%id, pending = entries.len() + 1, "Registered pending request");

        entries.insert(
            id,
            Entry {
                completion,
                created_at,
                timer,
            },
        );

        Ok(())
    }

    /// Resolves the request with the given payload if it is still pending
    ///
    /// Returns whether a pending request was found. A reply may legitimately race its own
    /// deadline so a miss is not an error.
    pub async fn complete(&self, id: &str, payload: Vec<u8>) -> bool {
        match self.take(id).await {
            Some(entry) => {
                entry.timer.abort();
                entry.resolve(id, Resolution::Reply(payload));
                true
            }
            None => false,
        }
    }

    /// Resolves the request with a timeout if it is still pending
    pub async fn expire(&self, id: &str) -> bool {
        match self.take(id).await {
            Some(entry) => {
                entry.timer.abort();
                debug!(id, "Expired pending request");
                entry.resolve(id, Resolution::Expired);
                true
            }
            None => false,
        }
    }

    /// Removes the request without resolving it
    ///
    /// Used when the request never made it onto the broker and nobody is going to wait for it.
    pub async fn abandon(&self, id: &str) -> bool {
        match self.take(id).await {
            Some(entry) => {
                entry.timer.abort();
                debug!(id, "Abandoned pending request");
                true
            }
            None => false,
        }
    }

    /// Whether a request with the given identifier is still pending
    pub async fn contains(&self, id: &str) -> bool {
        self.entries.lock().await.contains_key(id)
    }

    /// Number of pending requests
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether there are no pending requests
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    async fn take(&self, id: &str) -> Option<Entry> {
        self.entries.lock().await.remove(id)
    }
}

async fn expire_at(entries: Weak<Entries>, id: CorrelationId, deadline: Instant) {
    sleep_until(deadline).await;

    let entries = match entries.upgrade() {
        Some(entries) => entries,
        None => return,
    };

    let entry = entries.lock().await.remove(id.as_str());

    if let Some(entry) = entry {
        debug!(%id, "Pending request reached its deadline");
        entry.resolve(id.as_str(), Resolution::Expired);
    }
}

#[cfg(test)]
mod does {
    use super::super::PendingError;
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tokio::time::sleep;

    const TIMEOUT: Duration = Duration::from_secs(30);

    #[tokio::test(start_paused = true)]
    async fn resolve_with_reply() {
        let table = CorrelationTable::default();
        let (pending, response) = PendingRequest::new(TIMEOUT);
        let id = pending.id().clone();

        table.register(pending).await.unwrap();
        assert!(table.complete(id.as_str(), b"1".to_vec()).await);

        assert_eq!(response.wait().await, Ok(b"1".to_vec()));
        assert!(table.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn expire_after_deadline() {
        let table = CorrelationTable::default();
        let (pending, response) = PendingRequest::new(TIMEOUT);
        let id = pending.id().clone();

        table.register(pending).await.unwrap();
        sleep(TIMEOUT - Duration::from_millis(1)).await;
        assert!(table.contains(id.as_str()).await);

        assert_eq!(response.wait().await, Err(PendingError::Expired));
        assert!(!table.contains(id.as_str()).await);
    }

    #[tokio::test(start_paused = true)]
    async fn ignore_late_reply() {
        let table = CorrelationTable::default();
        let (pending, response) = PendingRequest::new(TIMEOUT);
        let id = pending.id().clone();

        table.register(pending).await.unwrap();
        assert_eq!(response.wait().await, Err(PendingError::Expired));

        assert!(!table.complete(id.as_str(), b"late".to_vec()).await);
        assert!(table.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn resolve_exactly_once_when_racing() {
        let table = CorrelationTable::default();
        let (pending, response) = PendingRequest::new(TIMEOUT);
        let id = pending.id().clone();
        table.register(pending).await.unwrap();

        let (completed, expired) = tokio::join!(
            table.complete(id.as_str(), b"reply".to_vec()),
            table.expire(id.as_str())
        );

        assert!(completed ^ expired);
        assert!(response.wait().await.is_ok() == completed);

        // Both operations are idempotent once the entry is gone
        assert!(!table.complete(id.as_str(), Vec::new()).await);
        assert!(!table.expire(id.as_str()).await);
    }

    #[tokio::test(start_paused = true)]
    async fn keep_timer_from_firing_after_completion() {
        let table = CorrelationTable::default();
        let (pending, response) = PendingRequest::new(TIMEOUT);
        let id = pending.id().clone();
        table.register(pending).await.unwrap();

        assert!(table.complete(id.as_str(), b"done".to_vec()).await);
        sleep(TIMEOUT * 2).await;

        assert_eq!(response.wait().await, Ok(b"done".to_vec()));
        assert!(table.is_empty().await);
    }

    #[tokio::test]
    async fn refuse_duplicate_identifiers() {
        let table = CorrelationTable::default();
        let id = CorrelationId::from("fixed");
        let (first, _first_response) = PendingRequest::with_id(id.clone(), TIMEOUT);
        let (second, _second_response) = PendingRequest::with_id(id.clone(), TIMEOUT);

        table.register(first).await.unwrap();

        assert_eq!(
            table.register(second).await,
            Err(TableError::DuplicateCorrelationId(id))
        );
        assert_eq!(table.len().await, 1);
    }

    #[tokio::test]
    async fn refuse_entries_beyond_capacity() {
        let table = CorrelationTable::new(Some(1));
        let (first, _first_response) = PendingRequest::new(TIMEOUT);
        let (second, _second_response) = PendingRequest::new(TIMEOUT);

        table.register(first).await.unwrap();

        assert_eq!(
            table.register(second).await,
            Err(TableError::CapacityExceeded(1))
        );
    }

    #[tokio::test]
    async fn discard_abandoned_requests() {
        let table = CorrelationTable::default();
        let (pending, response) = PendingRequest::new(TIMEOUT);
        let id = pending.id().clone();
        table.register(pending).await.unwrap();

        assert!(table.abandon(id.as_str()).await);
        assert!(!table.abandon(id.as_str()).await);

        assert_eq!(response.wait().await, Err(PendingError::Discarded));
    }
}
