use super::{RedisReplyEntry, STREAM_ID_ADDITIONS, STREAM_ID_HEAD};
use crate::communication::broker::{BoxedReplyEntry, ReplyStream};
use crate::BoxedError;
use futures::stream::{self, StreamExt};
use redis::aio::{Connection, MultiplexedConnection};
use redis::streams::{StreamId, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use std::convert::TryInto;
use std::time::Duration;
use tracing::{debug, error};

struct ReadState {
    con: Connection,
    group: String,
    consumer: String,
    block: usize,
    cursor: String,
    failed: bool,
}

/// Consumes a reply stream through its consumer group:
///
/// 1. Stream entries from this consumer's pending entries list until it is exhausted
/// 2. Wait for and stream new entries in a blocking manner
///
/// Blocking reads time out after `block_timeout` and are reissued. The first read error is
/// yielded and ends the stream.
pub(super) fn xreadgroup_stream(
    con: Connection,
    ack_con: MultiplexedConnection,
    key: String,
    group: String,
    consumer: String,
    block_timeout: Duration,
) -> ReplyStream {
    let state = ReadState {
        con,
        group: group.clone(),
        consumer,
        block: block_timeout.as_millis().try_into().unwrap_or(usize::MAX),
        cursor: STREAM_ID_HEAD.to_string(),
        failed: false,
    };

    let read_key = key.clone();
    let batches = stream::unfold(state, move |mut state| {
        let key = read_key.clone();

        async move {
            if state.failed {
                return None;
            }

            let options = StreamReadOptions::default()
                .group(&state.group, &state.consumer)
                .count(16)
                .block(state.block);

            let result = state
                .con
                .xread_options::<_, _, StreamReadReply>(&[&key], &[&state.cursor], options)
                .await;

            match result {
                Ok(reply) => {
                    let ids: Vec<StreamId> = reply
                        .keys
                        .into_iter()
                        .filter(|stream| stream.key == key)
                        .flat_map(|stream| stream.ids)
                        .collect();

                    advance_cursor(&mut state.cursor, &ids);
                    Some((Ok(ids), state))
                }
                Err(e) => {
                    error!(%key, error = %e, "Unable to read from reply stream");
                    state.failed = true;
                    Some((Err(BoxedError::from(e)), state))
                }
            }
        }
    });

    batches
        .flat_map(move |batch| match batch {
            Ok(ids) => {
                let ack_con = ack_con.clone();
                let key = key.clone();
                let group = group.clone();

                stream::iter(ids.into_iter().map(move |id| {
                    let entry = RedisReplyEntry::new(ack_con.clone(), key.clone(), group.clone(), id);
                    Ok::<_, BoxedError>(Box::new(entry) as BoxedReplyEntry)
                }))
                .boxed()
            }
            Err(e) => stream::once(async move { Err(e) }).boxed(),
        })
        .boxed()
}

/// Moves through the pending entries list and switches to new entries once it is drained
fn advance_cursor(cursor: &mut String, batch: &[StreamId]) {
    if cursor == STREAM_ID_ADDITIONS {
        return;
    }

    match batch.last() {
        Some(last) => *cursor = last.id.clone(),
        None => {
            debug!("Drained pending replies, following new entries");
            *cursor = STREAM_ID_ADDITIONS.to_string();
        }
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use pretty_assertions::assert_eq;

    fn id(id: &str) -> StreamId {
        StreamId {
            id: id.to_string(),
            map: Default::default(),
        }
    }

    #[test]
    fn walk_pending_entries_before_new_ones() {
        let mut cursor = STREAM_ID_HEAD.to_string();

        advance_cursor(&mut cursor, &[id("1-0"), id("2-0")]);
        assert_eq!(cursor, "2-0");

        advance_cursor(&mut cursor, &[]);
        assert_eq!(cursor, STREAM_ID_ADDITIONS);
    }

    #[test]
    fn stay_on_new_entries() {
        let mut cursor = STREAM_ID_ADDITIONS.to_string();

        advance_cursor(&mut cursor, &[id("3-0")]);
        assert_eq!(cursor, STREAM_ID_ADDITIONS);

        advance_cursor(&mut cursor, &[]);
        assert_eq!(cursor, STREAM_ID_ADDITIONS);
    }
}
