use super::CorrelationId;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Terminal event of a [`PendingRequest`]
#[derive(Debug)]
pub(super) enum Resolution {
    Reply(Vec<u8>),
    Expired,
}

/// Reasons why a [`PendingResponse`] did not yield a reply
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PendingError {
    /// The deadline passed before a reply arrived
    #[error("no reply received before the deadline")]
    Expired,
    /// The entry was removed from the table without being resolved
    #[error("pending request has been discarded")]
    Discarded,
}

/// In-memory record of one request waiting for either a reply or its deadline
#[derive(Debug)]
pub struct PendingRequest {
    pub(super) id: CorrelationId,
    pub(super) completion: oneshot::Sender<Resolution>,
    pub(super) deadline: Instant,
    pub(super) created_at: Instant,
}

impl PendingRequest {
    /// Creates a request with a fresh identifier which expires after `timeout`
    pub fn new(timeout: Duration) -> (Self, PendingResponse) {
        Self::with_id(CorrelationId::generate(), timeout)
    }

    /// Creates a request for a given identifier which expires after `timeout`
    pub fn with_id(id: CorrelationId, timeout: Duration) -> (Self, PendingResponse) {
        let (completion, receiver) = oneshot::channel();
        let created_at = Instant::now();

        let request = Self {
            id: id.clone(),
            completion,
            deadline: created_at + timeout,
            created_at,
        };

        (request, PendingResponse { id, receiver })
    }

    /// Identifier under which the request will be registered
    pub fn id(&self) -> &CorrelationId {
        &self.id
    }

    /// Point in time at which the request expires
    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

/// Waiting half of a [`PendingRequest`]
#[derive(Debug)]
pub struct PendingResponse {
    id: CorrelationId,
    receiver: oneshot::Receiver<Resolution>,
}

impl PendingResponse {
    /// Identifier of the request this response belongs to
    pub fn id(&self) -> &CorrelationId {
        &self.id
    }

    /// Waits until the request has been resolved one way or another
    pub async fn wait(self) -> Result<Vec<u8>, PendingError> {
        match self.receiver.await {
            Ok(Resolution::Reply(payload)) => Ok(payload),
            Ok(Resolution::Expired) => Err(PendingError::Expired),
            Err(_) => Err(PendingError::Discarded),
        }
    }
}
