use crate::communication::broker::{BrokerConnector, BrokerLink, LinkError};
use crate::communication::correlation::{
    CorrelationTable, PendingError, PendingRequest, TableError,
};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, instrument};

/// Errors that may be returned to a caller of [`RequestDispatcher::submit`]
#[derive(Debug, Error)]
pub enum RequestError {
    /// The caller provided nothing to work on
    #[error("request payload is empty")]
    InvalidRequest,
    /// No connection to the broker could be established for this request
    #[error("broker is unavailable")]
    Connection(#[source] LinkError),
    /// The request could not be placed onto the work queue
    #[error("unable to send request to broker")]
    Publish(#[source] LinkError),
    /// No reply arrived in time. This does not imply that the worker failed.
    #[error("no reply received within {0:?}")]
    Timeout(Duration),
    /// Too many requests are in flight already
    #[error("limit of {0} pending requests reached")]
    Overloaded(usize),
}

/// Entry point for callers: publishes a payload and waits for the worker's reply
///
/// Any number of callers may submit concurrently. Each call owns its own correlation
/// identifier, the only state shared between them is the [`BrokerLink`].
pub struct RequestDispatcher<K: BrokerConnector> {
    link: BrokerLink<K>,
    table: CorrelationTable,
    request_timeout: Duration,
}

impl<K: BrokerConnector> Clone for RequestDispatcher<K> {
    fn clone(&self) -> Self {
        Self {
            link: self.link.clone(),
            table: self.table.clone(),
            request_timeout: self.request_timeout,
        }
    }
}

impl<K: BrokerConnector> RequestDispatcher<K> {
    /// Creates a new dispatcher from raw parts
    ///
    /// The `table` has to be the one the [`ReplyRouter`](super::ReplyRouter) of the `link` resolves.
    pub fn new(link: BrokerLink<K>, table: CorrelationTable, request_timeout: Duration) -> Self {
        Self {
            link,
            table,
            request_timeout,
        }
    }

    /// Link used for publishing
    pub fn link(&self) -> &BrokerLink<K> {
        &self.link
    }

    /// Table tracking requests of this dispatcher
    pub fn table(&self) -> &CorrelationTable {
        &self.table
    }

    /// Sends the payload to a worker and returns its reply verbatim
    ///
    /// Timed out requests are not retried, resubmitting is up to the caller.
    #[instrument(skip(self, payload), fields(size = payload.len()))]
    pub async fn submit(&self, payload: Vec<u8>) -> Result<Vec<u8>, RequestError> {
        if payload.is_empty() {
            return Err(RequestError::InvalidRequest);
        }

        let handle = self
            .link
            .ensure_connected()
            .await
            .map_err(RequestError::Connection)?;

        let (pending, response) = PendingRequest::new(self.request_timeout);
        let id = pending.id().clone();

        match self.table.register(pending).await {
            Ok(()) => {}
            Err(TableError::CapacityExceeded(limit)) => return Err(RequestError::Overloaded(limit)),
            Err(error @ TableError::DuplicateCorrelationId(_)) => {
                // Identifiers are random v4 UUIDs, a collision means the generator is broken
                error!(%error, "Correlation identifier has been handed out twice");
                panic!("{}", error);
            }
        }

        if let Err(error) = self.link.publish(&handle, &payload, &id).await {
            self.table.abandon(id.as_str()).await;
            return Err(RequestError::Publish(error));
        }

        debug!(%id, generation = handle.generation(), "Published work item");

        match response.wait().await {
            Ok(reply) => Ok(reply),
            Err(PendingError::Expired) | Err(PendingError::Discarded) => {
                Err(RequestError::Timeout(self.request_timeout))
            }
        }
    }
}
