use crate::communication::broker::{ReplyEntry, ReplyStream};
use crate::communication::correlation::CorrelationTable;
use crate::{BoxedError, EmptyResult};
use futures::TryStreamExt;
use tracing::{debug, trace, warn};

/// Hands inbound replies to whoever is waiting for them
///
/// Every reply is acknowledged after the lookup, whether it matched a pending request or not.
/// Replies for requests which already timed out are thereby drained instead of piling up in
/// the reply queue or being redelivered forever.
#[derive(Clone)]
pub struct ReplyRouter {
    table: CorrelationTable,
}

impl ReplyRouter {
    /// Creates a new router resolving entries of the given table
    pub fn new(table: CorrelationTable) -> Self {
        Self { table }
    }

    /// Routes a single reply and acknowledges it, returning whether it matched a pending request
    pub async fn route(&self, entry: &mut dyn ReplyEntry) -> Result<bool, BoxedError> {
        let matched = match entry.correlation_id().map(ToOwned::to_owned) {
            Some(id) => {
                let payload = entry.take_payload();
                let matched = self.table.complete(&id, payload).await;

                if matched {
                    trace!(%id, "Routed reply");
                } else {
                    debug!(%id, "Discarding reply without pending request");
                }

                matched
            }
            None => {
                warn!(
                    size = entry.payload().len(),
                    "Discarding reply without correlation identifier"
                );
                false
            }
        };

        entry.acknowledge().await?;

        Ok(matched)
    }

    /// Routes replies until the stream ends or yields an error
    pub async fn run(&self, mut replies: ReplyStream) -> EmptyResult {
        while let Some(mut entry) = replies.try_next().await? {
            self.route(entry.as_mut()).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use crate::communication::correlation::PendingRequest;
    use async_trait::async_trait;
    use futures::stream;
    use futures::StreamExt;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    struct Reply {
        id: Option<&'static str>,
        payload: Vec<u8>,
        acknowledged: bool,
    }

    impl Reply {
        fn new(id: Option<&'static str>, payload: &[u8]) -> Self {
            Self {
                id,
                payload: payload.to_vec(),
                acknowledged: false,
            }
        }
    }

    #[async_trait]
    impl ReplyEntry for Reply {
        fn correlation_id(&self) -> Option<&str> {
            self.id
        }

        fn payload(&self) -> &[u8] {
            &self.payload
        }

        fn take_payload(&mut self) -> Vec<u8> {
            std::mem::take(&mut self.payload)
        }

        async fn acknowledge(&mut self) -> EmptyResult {
            self.acknowledged = true;
            Ok(())
        }
    }

    #[tokio::test]
    async fn complete_matching_request() {
        let table = CorrelationTable::default();
        let router = ReplyRouter::new(table.clone());
        let (pending, response) =
            PendingRequest::with_id("abc".into(), Duration::from_secs(30));
        table.register(pending).await.unwrap();

        let mut reply = Reply::new(Some("abc"), b"1");
        assert!(router.route(&mut reply).await.unwrap());

        assert!(reply.acknowledged);
        assert_eq!(response.wait().await, Ok(b"1".to_vec()));
    }

    #[tokio::test]
    async fn drain_unmatched_reply() {
        let table = CorrelationTable::default();
        let router = ReplyRouter::new(table.clone());
        let (pending, _response) =
            PendingRequest::with_id("pending".into(), Duration::from_secs(30));
        table.register(pending).await.unwrap();

        let mut reply = Reply::new(Some("expired-long-ago"), b"late");
        assert!(!router.route(&mut reply).await.unwrap());

        assert!(reply.acknowledged);
        assert!(table.contains("pending").await);
    }

    #[tokio::test]
    async fn drain_reply_without_identifier() {
        let router = ReplyRouter::new(CorrelationTable::default());

        let mut reply = Reply::new(None, b"anonymous");
        assert!(!router.route(&mut reply).await.unwrap());

        assert!(reply.acknowledged);
    }

    #[tokio::test]
    async fn stop_on_stream_error() {
        let router = ReplyRouter::new(CorrelationTable::default());
        let entries: Vec<Result<crate::communication::broker::BoxedReplyEntry, BoxedError>> = vec![
            Ok(Box::new(Reply::new(Some("a"), b"a"))),
            Err("connection reset".into()),
            Ok(Box::new(Reply::new(Some("b"), b"b"))),
        ];

        let result = router.run(stream::iter(entries).boxed()).await;

        assert_eq!(result.unwrap_err().to_string(), "connection reset");
    }
}
