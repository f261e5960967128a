//! Broker backend using [Redis Streams](https://redis.io/topics/streams-intro)
//!
//! Both queues are streams with a consumer group attached. The work queue is consumed by the
//! worker pool through its own group, the reply queue is consumed exclusively by the gateway
//! instance it is named after. Replies are deleted once they have been acknowledged.

const STREAM_PAYLOAD_KEY: &str = "payload";
const STREAM_CORRELATION_KEY: &str = "correlation_id";
const STREAM_REPLY_TO_KEY: &str = "reply_to";

const STREAM_ID_NEW: &str = "*";
const STREAM_ID_HEAD: &str = "0";
const STREAM_ID_TAIL: &str = "$";
const STREAM_ID_ADDITIONS: &str = ">";

/// Error code returned by `XGROUP CREATE` if the group exists already
const BUSYGROUP: &str = "BUSYGROUP";

mod connector;
mod reply_entry;
mod reply_stream;

pub use connector::*;
pub use reply_entry::*;
