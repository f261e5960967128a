use crate::options::{ConnectionOptions, QueueingOptions, RedisOptions};
use library::communication::broker::{LinkOptions, QueueTopology};
use library::helpers::{parse_seconds, reply_queue_name};
use std::time::Duration;
use structopt::StructOpt;

/// Options for the gateway module
#[derive(Debug, StructOpt)]
pub struct Options {
    #[allow(missing_docs)]
    #[structopt(flatten)]
    pub queueing: QueueingOptions,

    #[allow(missing_docs)]
    #[structopt(flatten)]
    pub redis: RedisOptions,

    #[allow(missing_docs)]
    #[structopt(flatten)]
    pub connection: ConnectionOptions,

    /// Port on which the HTTP server listens
    #[structopt(long, env, default_value = "3001")]
    pub port: u16,

    /// Seconds to wait for a reply before a request is considered timed out
    #[structopt(long, env, default_value = "30", parse(try_from_str = parse_seconds))]
    pub request_timeout: Duration,

    /// Maximum number of requests waiting for a reply at any given time.
    /// Further requests are refused until capacity frees up. Unlimited if omitted.
    #[structopt(long, env)]
    pub max_pending_requests: Option<usize>,

    /// Maximum accepted request body size in bytes
    #[structopt(long, env, default_value = "1048576")]
    pub max_body_size: u64,

    /// Seconds granted to in-flight HTTP requests when shutting down
    #[structopt(long, env, default_value = "30", parse(try_from_str = parse_seconds))]
    pub termination_grace_period: Duration,
}

impl Options {
    /// Queues used by this instance
    pub fn topology(&self) -> QueueTopology {
        let work_queue = &self.queueing.work_queue;

        QueueTopology::new(
            work_queue.clone(),
            reply_queue_name(work_queue, &self.queueing.id),
        )
    }

    /// Timing parameters for the broker link
    pub fn link_options(&self) -> LinkOptions {
        LinkOptions {
            reconnect_interval: self.connection.reconnect_interval,
            connect_timeout: self.connection.connect_timeout,
        }
    }
}
