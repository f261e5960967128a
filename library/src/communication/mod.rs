//! Request and response correlation over a message broker
//!
//! A caller hands a payload to the [`RequestDispatcher`](request::RequestDispatcher) which
//! publishes it onto a shared work queue and waits for a worker to answer. Every request
//! carries a [`CorrelationId`](correlation::CorrelationId) and the name of the reply queue
//! owned by this process. Workers copy the identifier onto their reply so that the
//! [`ReplyRouter`](request::ReplyRouter) can hand it back to whoever is waiting for it.
//!
//! The moving parts, leaves first:
//!
//! 1. [`broker`] owns the physical connection through the [`BrokerLink`](broker::BrokerLink)
//!    and hides the actual backend behind the [`BrokerConnector`](broker::BrokerConnector) trait.
//! 2. [`correlation`] tracks in-flight requests and their deadlines.
//! 3. [`request`] ties both together for callers and for inbound replies.
//!
//! Backends live in [`implementation`]: one using Redis streams and an in-memory mock
//! for tests.

mod error;

pub mod broker;
pub mod correlation;
pub mod implementation;
pub mod request;

pub use error::BlackboxError;
