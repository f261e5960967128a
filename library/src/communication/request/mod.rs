//! Synchronous-looking requests on top of the asynchronous broker
//!
//! The [`RequestDispatcher`] is what callers interact with. It registers every request in the
//! [`CorrelationTable`](super::correlation::CorrelationTable) before publishing it and then
//! waits for the [`ReplyRouter`] to resolve the entry, or for the entry to reach its deadline.

mod dispatcher;
mod router;

pub use dispatcher::*;
pub use router::*;
