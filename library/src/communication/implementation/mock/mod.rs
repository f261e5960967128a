//! In-memory broker for tests
//!
//! The [`MockBroker`] records everything that is published and lets tests act as the worker
//! pool by tapping into published messages and pushing replies into the live subscription.

mod broker;

pub use broker::*;
