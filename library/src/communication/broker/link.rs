use super::{BrokerConnection, BrokerConnector, QueueTopology, ReplyStream, WorkMessage};
use crate::communication::correlation::CorrelationId;
use crate::communication::request::ReplyRouter;
use crate::communication::BlackboxError;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, instrument, warn};

/// Errors surfaced by a [`BrokerLink`]
#[derive(Debug, Error, Clone)]
pub enum LinkError {
    /// The connection could not be established
    #[error("unable to connect to broker")]
    ConnectionFailed(#[source] BlackboxError),
    /// Establishing the connection took longer than allowed
    #[error("timed out connecting to broker after {0:?}")]
    ConnectTimeout(Duration),
    /// The connection a handle refers to is gone
    #[error("broker connection is not established")]
    NotConnected,
    /// The broker did not accept a message
    #[error("unable to publish message")]
    PublishFailed(#[source] BlackboxError),
    /// The link has been shut down and will not reconnect
    #[error("broker link has been shut down")]
    ShutDown,
}

/// Timing parameters of a [`BrokerLink`]
#[derive(Debug, Clone, Copy)]
pub struct LinkOptions {
    /// Fixed delay before a failed connection is retried
    pub reconnect_interval: Duration,
    /// Upper bound for opening the physical connection
    pub connect_timeout: Duration,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            reconnect_interval: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Observable state of a [`BrokerLink`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and no attempt in flight (also reported after shutdown)
    Disconnected,
    /// A connection attempt is in flight
    Connecting,
    /// Queues are declared and the reply queue is being consumed
    Connected,
}

/// Ready-to-use connection returned by [`BrokerLink::ensure_connected`]
pub struct LinkHandle<C> {
    connection: Arc<C>,
    generation: u64,
}

impl<C> LinkHandle<C> {
    /// Sequence number of the connection, increasing with every reconnect
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl<C> Clone for LinkHandle<C> {
    fn clone(&self) -> Self {
        Self {
            connection: self.connection.clone(),
            generation: self.generation,
        }
    }
}

type ConnectionAttempt<C> = Shared<BoxFuture<'static, Result<LinkHandle<C>, LinkError>>>;

enum State<C> {
    Disconnected,
    Connecting(ConnectionAttempt<C>),
    Connected {
        handle: LinkHandle<C>,
        router: JoinHandle<()>,
    },
    ShutDown,
}

struct Guarded<C> {
    state: State<C>,
    retry: Option<JoinHandle<()>>,
}

struct Inner<K: BrokerConnector> {
    connector: K,
    topology: QueueTopology,
    options: LinkOptions,
    router: ReplyRouter,
    generation: AtomicU64,
    guarded: Mutex<Guarded<K::Connection>>,
}

/// Lifecycle-managed connection to the broker shared by all requests
///
/// The link moves between [`ConnectionState::Disconnected`], [`ConnectionState::Connecting`]
/// and [`ConnectionState::Connected`]. At most one connection attempt is in flight at any time,
/// concurrent callers of [`ensure_connected`](Self::ensure_connected) all wait for the same one.
/// Whenever a connection fails, a single retry is scheduled after
/// [`LinkOptions::reconnect_interval`]. This repeats until a connection succeeds or the link is
/// [shut down](Self::shutdown).
///
/// Once connected, the reply subscription is consumed by a dedicated task running the
/// [`ReplyRouter`]. When that subscription ends, the link considers the connection lost.
pub struct BrokerLink<K: BrokerConnector> {
    inner: Arc<Inner<K>>,
}

impl<K: BrokerConnector> Clone for BrokerLink<K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K: BrokerConnector> BrokerLink<K> {
    /// Creates a new, disconnected link
    pub fn new(
        connector: K,
        topology: QueueTopology,
        options: LinkOptions,
        router: ReplyRouter,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                connector,
                topology,
                options,
                router,
                generation: AtomicU64::new(0),
                guarded: Mutex::new(Guarded {
                    state: State::Disconnected,
                    retry: None,
                }),
            }),
        }
    }

    /// Queues declared by this link
    pub fn topology(&self) -> &QueueTopology {
        &self.inner.topology
    }

    /// Current connection state
    pub async fn state(&self) -> ConnectionState {
        match self.inner.guarded.lock().await.state {
            State::Disconnected | State::ShutDown => ConnectionState::Disconnected,
            State::Connecting(_) => ConnectionState::Connecting,
            State::Connected { .. } => ConnectionState::Connected,
        }
    }

    /// Returns the current connection, establishing one if necessary
    pub async fn ensure_connected(&self) -> Result<LinkHandle<K::Connection>, LinkError> {
        let attempt = {
            let mut guarded = self.inner.guarded.lock().await;

            match &guarded.state {
                State::Connected { handle, .. } => return Ok(handle.clone()),
                State::Connecting(attempt) => attempt.clone(),
                State::ShutDown => return Err(LinkError::ShutDown),
                State::Disconnected => {
                    debug!("Initiating broker connection");
                    let task = tokio::spawn(self.clone().attempt());
                    let link = self.clone();
                    let attempt = async move {
                        match task.await {
                            Ok(result) => result,
                            Err(e) => {
                                let error = LinkError::ConnectionFailed(BlackboxError::new(e));
                                link.attempt_aborted(&error).await;
                                Err(error)
                            }
                        }
                    }
                    .boxed()
                    .shared();

                    guarded.state = State::Connecting(attempt.clone());
                    attempt
                }
            }
        };

        attempt.await
    }

    /// Places a unit of work onto the work queue, tagged with the reply destination
    ///
    /// Fails with [`LinkError::NotConnected`] if the connection behind `handle` is no longer current.
    /// A failed publish is treated as a loss of the connection.
    pub async fn publish(
        &self,
        handle: &LinkHandle<K::Connection>,
        payload: &[u8],
        correlation_id: &CorrelationId,
    ) -> Result<(), LinkError> {
        if !self.is_current(handle.generation).await {
            return Err(LinkError::NotConnected);
        }

        let topology = &self.inner.topology;
        let message = WorkMessage {
            queue: &topology.work_queue,
            payload,
            correlation_id,
            reply_to: &topology.reply_queue,
        };

        if let Err(e) = handle.connection.publish(message).await {
            let error = BlackboxError::from_boxed(e);

            if let Some(router) = self.connection_lost(handle.generation, &error).await {
                router.abort();
            }

            return Err(LinkError::PublishFailed(error));
        }

        Ok(())
    }

    /// Drops the connection and stops all background activity for good
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        let mut guarded = self.inner.guarded.lock().await;

        if let Some(retry) = guarded.retry.take() {
            retry.abort();
        }

        if let State::Connected { router, .. } = mem::replace(&mut guarded.state, State::ShutDown)
        {
            router.abort();
        }

        info!("Broker link shut down");
    }

    async fn is_current(&self, generation: u64) -> bool {
        matches!(
            &self.inner.guarded.lock().await.state,
            State::Connected { handle, .. } if handle.generation == generation
        )
    }

    fn attempt(self) -> BoxFuture<'static, Result<LinkHandle<K::Connection>, LinkError>> {
        async move {
            let result = self.establish().await;
            let mut guarded = self.inner.guarded.lock().await;

            if let State::ShutDown = guarded.state {
                return Err(LinkError::ShutDown);
            }

            match result {
                Ok((connection, replies)) => {
                    let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
                    let handle = LinkHandle {
                        connection: Arc::new(connection),
                        generation,
                    };
                    let router = tokio::spawn(self.clone().route(replies, generation));

                    info!(generation, "Connected to broker");
                    guarded.state = State::Connected {
                        handle: handle.clone(),
                        router,
                    };

                    Ok(handle)
                }
                Err(error) => {
                    warn!(%error, retry_in = ?self.inner.options.reconnect_interval, "Unable to connect to broker");
                    guarded.state = State::Disconnected;
                    self.schedule_retry(&mut guarded);

                    Err(error)
                }
            }
        }
        .boxed()
    }

    /// Leaves the connecting state after the attempt task died without resolving it
    async fn attempt_aborted(&self, error: &LinkError) {
        let mut guarded = self.inner.guarded.lock().await;

        if let State::Connecting(_) = guarded.state {
            warn!(%error, retry_in = ?self.inner.options.reconnect_interval, "Connection attempt aborted");
            guarded.state = State::Disconnected;
            self.schedule_retry(&mut guarded);
        }
    }

    async fn establish(&self) -> Result<(K::Connection, ReplyStream), LinkError> {
        let connect_timeout = self.inner.options.connect_timeout;
        let topology = &self.inner.topology;

        let connection = timeout(connect_timeout, self.inner.connector.connect())
            .await
            .map_err(|_| LinkError::ConnectTimeout(connect_timeout))?
            .map_err(|e| LinkError::ConnectionFailed(BlackboxError::from_boxed(e)))?;

        debug!(work_queue = ?topology.work_queue, reply_queue = ?topology.reply_queue, "Declaring queues");
        connection
            .declare(topology)
            .await
            .map_err(|e| LinkError::ConnectionFailed(BlackboxError::from_boxed(e)))?;

        let replies = connection
            .subscribe(topology)
            .await
            .map_err(|e| LinkError::ConnectionFailed(BlackboxError::from_boxed(e)))?;

        Ok((connection, replies))
    }

    async fn route(self, replies: ReplyStream, generation: u64) {
        let reason = match self.inner.router.run(replies).await {
            Ok(()) => BlackboxError::from_message("reply subscription closed"),
            Err(e) => BlackboxError::from_boxed(e),
        };

        // The returned handle belongs to this very task which is about to finish anyway
        self.connection_lost(generation, &reason).await;
    }

    /// Transitions to disconnected if `generation` is the current connection and schedules a retry.
    /// Returns the handle of the routing task that belonged to the lost connection.
    async fn connection_lost(
        &self,
        generation: u64,
        reason: &BlackboxError,
    ) -> Option<JoinHandle<()>> {
        let mut guarded = self.inner.guarded.lock().await;

        let is_current = matches!(
            &guarded.state,
            State::Connected { handle, .. } if handle.generation == generation
        );

        if !is_current {
            return None;
        }

        warn!(generation, %reason, "Lost connection to broker");

        let router = match mem::replace(&mut guarded.state, State::Disconnected) {
            State::Connected { router, .. } => Some(router),
            _ => None,
        };

        self.schedule_retry(&mut guarded);
        router
    }

    fn schedule_retry(&self, guarded: &mut Guarded<K::Connection>) {
        if guarded.retry.is_some() {
            return;
        }

        let link = self.clone();
        let interval = self.inner.options.reconnect_interval;

        guarded.retry = Some(tokio::spawn(async move {
            sleep(interval).await;
            link.inner.guarded.lock().await.retry = None;

            debug!("Retrying broker connection");
            if let Err(error) = link.ensure_connected().await {
                debug!(%error, "Scheduled reconnect failed");
            }
        }));
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use crate::communication::correlation::CorrelationTable;
    use crate::communication::implementation::mock::MockBroker;
    use pretty_assertions::assert_eq;

    fn link(broker: &MockBroker) -> BrokerLink<MockBroker> {
        BrokerLink::new(
            broker.clone(),
            QueueTopology::new("compile_queue", "compile_queue.reply.test"),
            LinkOptions::default(),
            ReplyRouter::new(CorrelationTable::default()),
        )
    }

    #[tokio::test]
    async fn connect_on_demand() {
        let broker = MockBroker::default();
        let link = link(&broker);

        assert_eq!(link.state().await, ConnectionState::Disconnected);
        let handle = link.ensure_connected().await.unwrap();

        assert_eq!(handle.generation(), 1);
        assert_eq!(link.state().await, ConnectionState::Connected);
        assert_eq!(broker.declarations(), 1);
        assert_eq!(broker.subscriptions(), 1);
    }

    #[tokio::test]
    async fn share_one_attempt_between_callers() {
        let broker = MockBroker::default();
        let link = link(&broker);

        let (a, b, c) = tokio::join!(
            link.ensure_connected(),
            link.ensure_connected(),
            link.ensure_connected()
        );

        assert_eq!(a.unwrap().generation(), 1);
        assert_eq!(b.unwrap().generation(), 1);
        assert_eq!(c.unwrap().generation(), 1);
        assert_eq!(broker.connections(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn keep_retrying_until_reachable() {
        let broker = MockBroker::default();
        broker.fail_next_connections(3);
        let link = link(&broker);

        assert!(matches!(
            link.ensure_connected().await,
            Err(LinkError::ConnectionFailed(_))
        ));
        assert_eq!(link.state().await, ConnectionState::Disconnected);

        // Two more failed retries followed by a successful one
        sleep(Duration::from_secs(31)).await;

        assert_eq!(link.state().await, ConnectionState::Connected);
        assert_eq!(broker.connections(), 4);
        assert_eq!(broker.declarations(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_a_single_retry() {
        let broker = MockBroker::default();
        broker.fail_next_connections(2);
        let link = link(&broker);

        // Both on-demand attempts fail, only one retry may be pending afterwards
        assert!(link.ensure_connected().await.is_err());
        assert!(link.ensure_connected().await.is_err());
        assert_eq!(broker.connections(), 2);

        sleep(Duration::from_secs(11)).await;
        assert_eq!(broker.connections(), 3);
        assert_eq!(link.state().await, ConnectionState::Connected);

        sleep(Duration::from_secs(60)).await;
        assert_eq!(broker.connections(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn recover_from_a_crashed_attempt() {
        let broker = MockBroker::default();
        broker.panic_next_connections(1);
        let link = link(&broker);

        assert!(matches!(
            link.ensure_connected().await,
            Err(LinkError::ConnectionFailed(_))
        ));
        assert_eq!(link.state().await, ConnectionState::Disconnected);

        sleep(Duration::from_secs(11)).await;

        assert_eq!(link.state().await, ConnectionState::Connected);
        assert_eq!(broker.connections(), 2);
        assert_eq!(link.ensure_connected().await.unwrap().generation(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_after_publish_failure() {
        let broker = MockBroker::default();
        let link = link(&broker);
        let handle = link.ensure_connected().await.unwrap();

        broker.fail_publishing(true);
        let result = link
            .publish(&handle, b"print(1)", &CorrelationId::generate())
            .await;

        assert!(matches!(result, Err(LinkError::PublishFailed(_))));
        assert_eq!(link.state().await, ConnectionState::Disconnected);

        broker.fail_publishing(false);
        sleep(Duration::from_secs(11)).await;

        assert_eq!(link.state().await, ConnectionState::Connected);
        assert!(matches!(
            link.publish(&handle, b"print(1)", &CorrelationId::generate())
                .await,
            Err(LinkError::NotConnected)
        ));

        let handle = link.ensure_connected().await.unwrap();
        assert_eq!(handle.generation(), 2);
        link.publish(&handle, b"print(1)", &CorrelationId::generate())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_after_losing_the_subscription() {
        let broker = MockBroker::default();
        let link = link(&broker);
        link.ensure_connected().await.unwrap();

        broker.sever();
        sleep(Duration::from_millis(1)).await;
        assert_eq!(link.state().await, ConnectionState::Disconnected);

        sleep(Duration::from_secs(10)).await;
        assert_eq!(link.state().await, ConnectionState::Connected);
        assert_eq!(broker.subscriptions(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stay_down_after_shutdown() {
        let broker = MockBroker::default();
        broker.fail_next_connections(1);
        let link = link(&broker);

        assert!(link.ensure_connected().await.is_err());
        link.shutdown().await;
        sleep(Duration::from_secs(60)).await;

        assert_eq!(broker.connections(), 1);
        assert!(matches!(
            link.ensure_connected().await,
            Err(LinkError::ShutDown)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn give_up_on_slow_connections() {
        let broker = MockBroker::default();
        broker.stall_connections(true);
        let link = link(&broker);

        assert!(matches!(
            link.ensure_connected().await,
            Err(LinkError::ConnectTimeout(_))
        ));
    }
}
