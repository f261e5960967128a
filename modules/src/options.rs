//! Various options usable by modules
//!
//! The structs in this module allow other modules to flatten them into
//! their own options struct. This allows for a unified yet non-cluttered
//! option set.

use library::helpers::parse_seconds;
use std::time::Duration;
use structopt::StructOpt;

/// Options for connecting to the Redis server
#[derive(Debug, StructOpt)]
pub struct RedisOptions {
    /// Redis server URL acting as the message broker
    #[structopt(
        short = "r",
        long = "redis",
        env = "REDIS",
        global = true,
        default_value = "redis://localhost/",
        value_name = "url"
    )]
    pub url: String,
}

/// Options relevant for message queueing
#[derive(Debug, StructOpt)]
pub struct QueueingOptions {
    /// Unique and stable identifier for this instance.
    /// It names the reply queue and is used to pick up replies
    /// that arrived during a crash or deliberate restart, thus it
    /// may not change across executions!
    #[structopt(long, env)]
    pub id: String,

    /// Name of the queue consumed by the worker pool
    #[structopt(long, env, default_value = "compile_queue")]
    pub work_queue: String,

    /// Consumer group through which workers read the work queue
    #[structopt(long, env, default_value = "compile_workers")]
    pub worker_group: String,
}

/// Timing of the broker connection
#[derive(Debug, StructOpt)]
pub struct ConnectionOptions {
    /// Delay in seconds before a failed broker connection is retried
    #[structopt(long, env, default_value = "10", parse(try_from_str = parse_seconds))]
    pub reconnect_interval: Duration,

    /// Maximum duration in seconds for establishing a broker connection
    #[structopt(long, env, default_value = "5", parse(try_from_str = parse_seconds))]
    pub connect_timeout: Duration,
}
