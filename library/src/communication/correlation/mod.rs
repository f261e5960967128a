//! Bookkeeping for requests which have been published but not answered yet
//!
//! Each request is represented by a [`PendingRequest`] which is exclusively owned by the
//! [`CorrelationTable`] from the moment it is registered. The waiting side only keeps the
//! matching [`PendingResponse`]. An entry leaves the table in exactly one of two ways:
//! a reply arrives and [`complete`](CorrelationTable::complete) resolves it, or its deadline
//! passes and it gets [`expired`](CorrelationTable::expire). Whichever operation removes the
//! entry gets to resolve it, the other one turns into a no-op.

mod pending;
mod table;

pub use pending::*;
pub use table::*;

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use uuid::Uuid;

/// Opaque token linking a published request to its eventual reply
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Creates a new random identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Textual representation as it is sent over the wire
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CorrelationId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl From<&str> for CorrelationId {
    fn from(raw: &str) -> Self {
        Self(raw.to_owned())
    }
}

impl Borrow<str> for CorrelationId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generate_distinct_identifiers() {
        let identifiers: HashSet<_> = (0..1000).map(|_| CorrelationId::generate()).collect();
        assert_eq!(identifiers.len(), 1000);
    }

    #[test]
    fn serialize_as_plain_string() {
        let id = CorrelationId::from("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""abc""#);
    }
}
