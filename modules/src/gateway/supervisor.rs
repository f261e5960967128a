use async_trait::async_trait;
use jatsl::{Job, JobManager};
use library::communication::broker::{BrokerConnector, BrokerLink};
use library::EmptyResult;
use tracing::{info, warn};

/// Establishes the broker connection at startup and tears it down on termination
///
/// A failed initial connection does not fail the job. The link keeps retrying on its own
/// and requests arriving in the meantime are answered with an error.
pub struct LinkSupervisorJob<K: BrokerConnector> {
    link: BrokerLink<K>,
}

impl<K: BrokerConnector> LinkSupervisorJob<K> {
    /// Creates a new instance from raw parts
    pub fn new(link: BrokerLink<K>) -> Self {
        Self { link }
    }
}

#[async_trait]
impl<K: BrokerConnector> Job for LinkSupervisorJob<K> {
    const NAME: &'static str = module_path!();
    const SUPPORTS_GRACEFUL_TERMINATION: bool = true;

    async fn execute(&self, manager: JobManager) -> EmptyResult {
        match self.link.ensure_connected().await {
            Ok(handle) => info!(generation = handle.generation(), "Broker link established"),
            Err(error) => warn!(%error, "Initial broker connection failed, retrying in background"),
        }

        manager.ready().await;
        manager.termination_signal().await;

        self.link.shutdown().await;

        Ok(())
    }
}
