use crate::communication::broker::{
    BoxedReplyEntry, BrokerConnection, BrokerConnector, QueueTopology, ReplyEntry, ReplyStream,
    WorkMessage,
};
use crate::{BoxedError, EmptyResult};
use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::StreamExt;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
enum MockBrokerError {
    #[error("broker unreachable")]
    Unreachable,
    #[error("connection severed")]
    Severed,
    #[error("publish rejected")]
    PublishRejected,
}

/// Message as it has been published onto the mock broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    /// Target queue
    pub queue: String,
    /// Raw payload
    pub payload: Vec<u8>,
    /// Correlation identifier attached to the message
    pub correlation_id: String,
    /// Reply destination attached to the message
    pub reply_to: String,
}

type ReplySender = UnboundedSender<Result<BoxedReplyEntry, BoxedError>>;

#[derive(Default)]
struct MockState {
    failing_connections: AtomicUsize,
    panicking_connections: AtomicUsize,
    stall_connections: AtomicBool,
    fail_publishing: AtomicBool,

    connections: AtomicUsize,
    declarations: AtomicUsize,
    subscriptions: AtomicUsize,
    acknowledgements: AtomicUsize,

    published: Mutex<Vec<PublishedMessage>>,
    workers: Mutex<Vec<UnboundedSender<PublishedMessage>>>,
    subscription: Mutex<Option<(Arc<AtomicBool>, ReplySender)>>,
}

/// Broker living entirely in memory
#[derive(Clone, Default)]
pub struct MockBroker {
    state: Arc<MockState>,
}

impl MockBroker {
    /// Lets the next `count` connection attempts fail
    pub fn fail_next_connections(&self, count: usize) {
        self.state
            .failing_connections
            .store(count, Ordering::SeqCst);
    }

    /// Lets the next `count` connection attempts panic
    pub fn panic_next_connections(&self, count: usize) {
        self.state
            .panicking_connections
            .store(count, Ordering::SeqCst);
    }

    /// Makes connection attempts hang forever
    pub fn stall_connections(&self, stall: bool) {
        self.state.stall_connections.store(stall, Ordering::SeqCst);
    }

    /// Makes publishing fail until reset
    pub fn fail_publishing(&self, fail: bool) {
        self.state.fail_publishing.store(fail, Ordering::SeqCst);
    }

    /// Stream of every message published from now on
    pub fn worker(&self) -> UnboundedReceiver<PublishedMessage> {
        let (tx, rx) = unbounded();
        self.state.workers.lock().unwrap().push(tx);
        rx
    }

    /// Pushes a reply into the live subscription, returns false if there is none
    pub fn reply(&self, correlation_id: Option<&str>, payload: &[u8]) -> bool {
        let entry = MockReplyEntry {
            correlation_id: correlation_id.map(ToOwned::to_owned),
            payload: payload.to_vec(),
            state: self.state.clone(),
        };

        match &*self.state.subscription.lock().unwrap() {
            Some((_, tx)) => tx.unbounded_send(Ok(Box::new(entry))).is_ok(),
            None => false,
        }
    }

    /// Kills the current connection, ending its subscription with an error
    pub fn sever(&self) {
        if let Some((alive, tx)) = self.state.subscription.lock().unwrap().take() {
            alive.store(false, Ordering::SeqCst);
            tx.unbounded_send(Err(MockBrokerError::Severed.into())).ok();
        }
    }

    /// Number of connection attempts, including failed ones
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Number of times the queues have been declared
    pub fn declarations(&self) -> usize {
        self.state.declarations.load(Ordering::SeqCst)
    }

    /// Number of subscriptions to the reply queue
    pub fn subscriptions(&self) -> usize {
        self.state.subscriptions.load(Ordering::SeqCst)
    }

    /// Number of replies that have been acknowledged
    pub fn acknowledgements(&self) -> usize {
        self.state.acknowledgements.load(Ordering::SeqCst)
    }

    /// Every message published so far
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state.published.lock().unwrap().clone()
    }

    /// Asserts that exactly the given payloads have been published, in order
    pub fn assert_published_payloads(&self, expected: &[&[u8]]) {
        let actual: Vec<Vec<u8>> = self.published().into_iter().map(|m| m.payload).collect();
        let expected: Vec<Vec<u8>> = expected.iter().map(|p| p.to_vec()).collect();

        assert_eq!(expected, actual, "Published payloads (right) did not match expectation (left)");
    }
}

#[async_trait]
impl BrokerConnector for MockBroker {
    type Connection = MockConnection;

    async fn connect(&self) -> Result<Self::Connection, BoxedError> {
        self.state.connections.fetch_add(1, Ordering::SeqCst);

        if self.state.stall_connections.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }

        let panicking = self.state.panicking_connections.load(Ordering::SeqCst);
        if panicking > 0 {
            self.state
                .panicking_connections
                .store(panicking - 1, Ordering::SeqCst);
            panic!("mock broker crashed while connecting");
        }

        let failing = self.state.failing_connections.load(Ordering::SeqCst);
        if failing > 0 {
            self.state
                .failing_connections
                .store(failing - 1, Ordering::SeqCst);
            return Err(MockBrokerError::Unreachable.into());
        }

        Ok(MockConnection {
            state: self.state.clone(),
            alive: Arc::new(AtomicBool::new(true)),
        })
    }
}

/// Connection handed out by the [`MockBroker`]
pub struct MockConnection {
    state: Arc<MockState>,
    alive: Arc<AtomicBool>,
}

impl MockConnection {
    fn check_alive(&self) -> EmptyResult {
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(MockBrokerError::Severed.into())
        }
    }
}

#[async_trait]
impl BrokerConnection for MockConnection {
    async fn declare(&self, _topology: &QueueTopology) -> EmptyResult {
        self.check_alive()?;
        self.state.declarations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe(&self, _topology: &QueueTopology) -> Result<ReplyStream, BoxedError> {
        self.check_alive()?;
        self.state.subscriptions.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = unbounded();
        *self.state.subscription.lock().unwrap() = Some((self.alive.clone(), tx));

        Ok(rx.boxed())
    }

    async fn publish(&self, message: WorkMessage<'_>) -> EmptyResult {
        self.check_alive()?;

        if self.state.fail_publishing.load(Ordering::SeqCst) {
            return Err(MockBrokerError::PublishRejected.into());
        }

        let message = PublishedMessage {
            queue: message.queue.to_owned(),
            payload: message.payload.to_vec(),
            correlation_id: message.correlation_id.to_string(),
            reply_to: message.reply_to.to_owned(),
        };

        self.state.published.lock().unwrap().push(message.clone());
        self.state
            .workers
            .lock()
            .unwrap()
            .retain(|worker| worker.unbounded_send(message.clone()).is_ok());

        Ok(())
    }
}

struct MockReplyEntry {
    correlation_id: Option<String>,
    payload: Vec<u8>,
    state: Arc<MockState>,
}

#[async_trait]
impl ReplyEntry for MockReplyEntry {
    fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn take_payload(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.payload)
    }

    async fn acknowledge(&mut self) -> EmptyResult {
        self.state.acknowledgements.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
