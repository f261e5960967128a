//! Connection to the message broker
//!
//! The [`BrokerLink`] owns the one physical connection shared by every request in the
//! process. Backends plug in through [`BrokerConnector`] and [`BrokerConnection`] while
//! replies flow back as a stream of [`ReplyEntry`] implementations.

use super::correlation::CorrelationId;
use crate::{BoxedError, EmptyResult};
use async_trait::async_trait;
use futures::stream::BoxStream;

mod link;

pub use link::*;

/// Names of the queues a [`BrokerLink`] declares
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueTopology {
    /// Shared queue consumed by the worker pool
    pub work_queue: String,
    /// Queue owned by this process on which workers publish their replies
    pub reply_queue: String,
}

impl QueueTopology {
    /// Creates a new topology from raw parts
    pub fn new(work_queue: impl Into<String>, reply_queue: impl Into<String>) -> Self {
        Self {
            work_queue: work_queue.into(),
            reply_queue: reply_queue.into(),
        }
    }
}

/// Unit of work as it is placed onto the work queue
#[derive(Debug, Clone, Copy)]
pub struct WorkMessage<'a> {
    /// Queue to publish to
    pub queue: &'a str,
    /// Opaque payload handed to the worker
    pub payload: &'a [u8],
    /// Identifier the worker has to copy onto its reply
    pub correlation_id: &'a CorrelationId,
    /// Queue the worker has to publish its reply to
    pub reply_to: &'a str,
}

/// Reply received from the broker which has to be acknowledged once processed
#[async_trait]
pub trait ReplyEntry: Send {
    /// Correlation identifier copied back by the worker, if any
    fn correlation_id(&self) -> Option<&str>;

    /// Raw reply payload
    fn payload(&self) -> &[u8];

    /// Moves the payload out of the entry, leaving it empty
    fn take_payload(&mut self) -> Vec<u8>;

    /// Removes the entry from the reply queue
    async fn acknowledge(&mut self) -> EmptyResult;
}

/// Type erased [`ReplyEntry`]
pub type BoxedReplyEntry = Box<dyn ReplyEntry>;

/// Stream of replies produced by a subscription
///
/// An `Err(_)` or the end of the stream indicates that the subscription is gone.
pub type ReplyStream = BoxStream<'static, Result<BoxedReplyEntry, BoxedError>>;

/// Established connection to a broker
#[async_trait]
pub trait BrokerConnection: Send + Sync + 'static {
    /// Creates the work and reply queues if they do not exist yet
    async fn declare(&self, topology: &QueueTopology) -> EmptyResult;

    /// Starts consuming the reply queue
    async fn subscribe(&self, topology: &QueueTopology) -> Result<ReplyStream, BoxedError>;

    /// Places a message onto a queue
    async fn publish(&self, message: WorkMessage<'_>) -> EmptyResult;
}

/// Factory for new [`BrokerConnection`] instances
#[async_trait]
pub trait BrokerConnector: Send + Sync + 'static {
    /// Connection type produced by this connector
    type Connection: BrokerConnection;

    /// Opens a new physical connection
    async fn connect(&self) -> Result<Self::Connection, BoxedError>;
}
