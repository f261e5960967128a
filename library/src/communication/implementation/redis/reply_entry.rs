use super::{STREAM_CORRELATION_KEY, STREAM_PAYLOAD_KEY};
use crate::communication::broker::ReplyEntry;
use crate::EmptyResult;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::StreamId;
use redis::AsyncCommands;

/// Contents of a raw stream entry
#[derive(Debug, PartialEq, Eq)]
pub(super) struct ReplyFields {
    pub id: String,
    pub correlation_id: Option<String>,
    pub payload: Vec<u8>,
}

impl From<StreamId> for ReplyFields {
    /// Entries without a payload field are treated as an empty reply
    fn from(entry: StreamId) -> Self {
        let correlation_id = entry
            .get::<String>(STREAM_CORRELATION_KEY)
            .filter(|id| !id.is_empty());
        let payload = entry.get(STREAM_PAYLOAD_KEY).unwrap_or_default();

        Self {
            id: entry.id,
            correlation_id,
            payload,
        }
    }
}

/// Redis based implementation of the [`ReplyEntry`] trait
///
/// Acknowledging runs [`XACK`](https://redis.io/commands/xack) followed by
/// [`XDEL`](https://redis.io/commands/xdel).
pub struct RedisReplyEntry {
    con: MultiplexedConnection,
    key: String,
    group: String,
    fields: ReplyFields,
}

impl RedisReplyEntry {
    pub(super) fn new(
        con: MultiplexedConnection,
        key: String,
        group: String,
        entry: StreamId,
    ) -> Self {
        Self {
            con,
            key,
            group,
            fields: entry.into(),
        }
    }

    /// Stream identifier of the entry
    pub fn id(&self) -> &str {
        &self.fields.id
    }
}

#[async_trait]
impl ReplyEntry for RedisReplyEntry {
    fn correlation_id(&self) -> Option<&str> {
        self.fields.correlation_id.as_deref()
    }

    fn payload(&self) -> &[u8] {
        &self.fields.payload
    }

    fn take_payload(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.fields.payload)
    }

    async fn acknowledge(&mut self) -> EmptyResult {
        let id = &self.fields.id;

        self.con
            .xack::<_, _, _, ()>(&self.key, &self.group, &[id])
            .await?;
        self.con.xdel::<_, _, ()>(&self.key, &[id]).await?;

        Ok(())
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use pretty_assertions::assert_eq;
    use redis::Value;
    use std::collections::HashMap;

    fn entry(fields: &[(&str, &[u8])]) -> StreamId {
        let map: HashMap<String, Value> = fields
            .iter()
            .map(|(k, v)| (k.to_string(), Value::Data(v.to_vec())))
            .collect();

        StreamId {
            id: "1526919030474-55".to_string(),
            map,
        }
    }

    #[test]
    fn read_reply_fields() {
        let fields = ReplyFields::from(entry(&[
            ("payload", &b"1"[..]),
            ("correlation_id", &b"abc"[..]),
        ]));

        assert_eq!(
            fields,
            ReplyFields {
                id: "1526919030474-55".to_string(),
                correlation_id: Some("abc".to_string()),
                payload: b"1".to_vec(),
            }
        );
    }

    #[test]
    fn tolerate_missing_fields() {
        let fields = ReplyFields::from(entry(&[("correlation_id", &b""[..])]));

        assert_eq!(fields.correlation_id, None);
        assert_eq!(fields.payload, Vec::<u8>::new());
    }
}
