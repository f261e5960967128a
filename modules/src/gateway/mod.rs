//! HTTP ingress turning compile requests into work items for the worker pool
//!
//! Requests are published onto a Redis stream shared with the workers. Each gateway instance
//! consumes its own reply stream named after its [`id`](crate::options::QueueingOptions::id)
//! so that multiple instances may run side by side.

use async_trait::async_trait;
use harness::{Heart, Module};
use jatsl::{schedule, Job, JobScheduler};
use library::communication::broker::{BrokerConnector, BrokerLink};
use library::communication::correlation::CorrelationTable;
use library::communication::implementation::redis::{RedisConnector, RedisGroups};
use library::communication::request::{ReplyRouter, RequestDispatcher};
use library::BoxedError;
use tracing::{debug, instrument};

mod options;
mod server;
mod supervisor;

pub use options::Options;
pub use server::{compile_filter, ServerJob};
pub use supervisor::LinkSupervisorJob;

/// Consumer group through which gateway instances read their reply streams
const REPLY_GROUP: &str = "gateway";

/// Wires up the correlation engine for the given broker backend
pub fn build_dispatcher<K: BrokerConnector>(
    connector: K,
    options: &Options,
) -> RequestDispatcher<K> {
    let table = CorrelationTable::new(options.max_pending_requests);
    let router = ReplyRouter::new(table.clone());
    let link = BrokerLink::new(
        connector,
        options.topology(),
        options.link_options(),
        router,
    );

    RequestDispatcher::new(link, table, options.request_timeout)
}

/// Module implementation
pub struct Gateway {
    options: Options,
}

impl Gateway {
    /// Creates a new instance from raw parts
    pub fn new(options: Options) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Module for Gateway {
    #[instrument(skip(self, scheduler))]
    async fn run(&mut self, scheduler: &JobScheduler) -> Result<Option<Heart>, BoxedError> {
        let groups = RedisGroups {
            worker_group: self.options.queueing.worker_group.clone(),
            reply_group: REPLY_GROUP.to_owned(),
            consumer: self.options.queueing.id.clone(),
        };
        let connector = RedisConnector::new(&self.options.redis.url, groups)?;
        let dispatcher = build_dispatcher(connector, &self.options);

        let supervisor_job = LinkSupervisorJob::new(dispatcher.link().clone());
        let server_job = ServerJob::new(self.options.port, self.options.max_body_size, dispatcher);

        debug!("Scheduling jobs");
        schedule!(scheduler, { supervisor_job, server_job });

        Ok(Some(Heart::without_heart_stone()))
    }

    async fn pre_shutdown(&mut self, scheduler: &JobScheduler) {
        // Let in-flight requests finish before the link goes down with the remaining jobs
        debug!("Gracefully shutting down HTTP server");
        scheduler
            .terminate_job(
                &ServerJob::<RedisConnector>::NAME.into(),
                self.options.termination_grace_period,
            )
            .await;
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use library::communication::implementation::mock::MockBroker;
    use pretty_assertions::assert_eq;
    use structopt::StructOpt;

    #[tokio::test]
    async fn wire_dispatcher_from_options() {
        let options = Options::from_iter_safe(&[
            "gateway",
            "--id",
            "gw-1",
            "--max-pending-requests",
            "0",
        ])
        .unwrap();
        let broker = MockBroker::default();
        let dispatcher = build_dispatcher(broker.clone(), &options);

        assert_eq!(
            dispatcher.link().topology().reply_queue,
            "compile_queue.reply.gw-1"
        );
        assert!(dispatcher.submit(b"print(1)".to_vec()).await.is_err());
        assert!(broker.published().is_empty());
    }
}
