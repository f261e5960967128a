use super::reply_stream::xreadgroup_stream;
use super::{
    BUSYGROUP, STREAM_CORRELATION_KEY, STREAM_ID_HEAD, STREAM_ID_NEW, STREAM_ID_TAIL,
    STREAM_PAYLOAD_KEY, STREAM_REPLY_TO_KEY,
};
use crate::communication::broker::{
    BrokerConnection, BrokerConnector, QueueTopology, ReplyStream, WorkMessage,
};
use crate::{BoxedError, EmptyResult};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, RedisResult};
use std::time::Duration;
use tracing::{debug, trace};

/// Consumer group settings used by a [`RedisConnector`]
#[derive(Debug, Clone)]
pub struct RedisGroups {
    /// Group through which the worker pool consumes the work queue
    pub worker_group: String,
    /// Group through which this instance consumes its reply queue
    pub reply_group: String,
    /// Consumer name within the reply group
    pub consumer: String,
}

/// [`BrokerConnector`] opening connections to a Redis server
#[derive(Clone)]
pub struct RedisConnector {
    client: Client,
    groups: RedisGroups,
    block_timeout: Duration,
}

impl RedisConnector {
    /// Creates a new connector for the given URL without contacting the server yet
    pub fn new(url: &str, groups: RedisGroups) -> RedisResult<Self> {
        Ok(Self {
            client: Client::open(url)?,
            groups,
            block_timeout: Duration::from_secs(5),
        })
    }

    /// Upper bound for a single blocking read of the reply stream.
    /// Reads that yield nothing are reissued, the value only bounds how long a dead
    /// connection can go unnoticed.
    pub fn with_block_timeout(mut self, block_timeout: Duration) -> Self {
        self.block_timeout = block_timeout;
        self
    }
}

#[async_trait]
impl BrokerConnector for RedisConnector {
    type Connection = RedisConnection;

    async fn connect(&self) -> Result<Self::Connection, BoxedError> {
        let con = self.client.get_multiplexed_tokio_connection().await?;

        Ok(RedisConnection {
            client: self.client.clone(),
            con,
            groups: self.groups.clone(),
            block_timeout: self.block_timeout,
        })
    }
}

/// Live connection to a Redis server
///
/// Publishing and acknowledging share one multiplexed connection while the subscription
/// gets a dedicated one for its blocking reads.
pub struct RedisConnection {
    client: Client,
    con: MultiplexedConnection,
    groups: RedisGroups,
    block_timeout: Duration,
}

async fn create_group(
    con: &mut MultiplexedConnection,
    key: &str,
    group: &str,
    start: &str,
) -> RedisResult<()> {
    match con
        .xgroup_create_mkstream::<_, _, _, ()>(key, group, start)
        .await
    {
        Err(e) if e.code() == Some(BUSYGROUP) => {
            trace!(key, group, "Consumer group exists already");
            Ok(())
        }
        result => result,
    }
}

#[async_trait]
impl BrokerConnection for RedisConnection {
    async fn declare(&self, topology: &QueueTopology) -> EmptyResult {
        let mut con = self.con.clone();

        create_group(
            &mut con,
            &topology.work_queue,
            &self.groups.worker_group,
            STREAM_ID_HEAD,
        )
        .await?;

        create_group(
            &mut con,
            &topology.reply_queue,
            &self.groups.reply_group,
            STREAM_ID_TAIL,
        )
        .await?;

        Ok(())
    }

    async fn subscribe(&self, topology: &QueueTopology) -> Result<ReplyStream, BoxedError> {
        let blocking = self.client.get_async_connection().await?;

        debug!(key = ?topology.reply_queue, group = ?self.groups.reply_group, "Subscribing to reply stream");

        Ok(xreadgroup_stream(
            blocking,
            self.con.clone(),
            topology.reply_queue.clone(),
            self.groups.reply_group.clone(),
            self.groups.consumer.clone(),
            self.block_timeout,
        ))
    }

    async fn publish(&self, message: WorkMessage<'_>) -> EmptyResult {
        let mut con = self.con.clone();
        let correlation_id = message.correlation_id.as_str();

        con.xadd::<_, _, _, _, ()>(
            message.queue,
            STREAM_ID_NEW,
            &[
                (STREAM_PAYLOAD_KEY, message.payload),
                (STREAM_CORRELATION_KEY, correlation_id.as_bytes()),
                (STREAM_REPLY_TO_KEY, message.reply_to.as_bytes()),
            ],
        )
        .await?;

        Ok(())
    }
}
