//! In-memory fakes shared by the unit tests

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::api::{ApiError, SupportApi, ThreadDetail};
use crate::connection::{
    ClientEvent, ConnectionConfig, ConnectionError, ConnectionManager, ConnectionState, Envelope,
    EventSink, Link, Transport,
};
use crate::engine::SyncEngine;
use crate::models::{Message, Sender, Thread, ThreadStatus};
use crate::storage::MemoryStore;

/// Let spawned tasks run
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

/// Block until the manager reaches `state`
pub async fn wait_for_state(manager: &ConnectionManager, state: ConnectionState) {
    let mut rx = manager.subscribe_state();
    let reached = tokio::time::timeout(Duration::from_secs(60), async {
        loop {
            if *rx.borrow_and_update() == state {
                return true;
            }
            if rx.changed().await.is_err() {
                return false;
            }
        }
    })
    .await;
    assert!(
        matches!(reached, Ok(true)),
        "connection never reached {:?}",
        state
    );
}

// ==================== Push side ====================

/// Transport handing out in-memory links
pub struct FakeTransport {
    failures: Mutex<VecDeque<ConnectionError>>,
    attempts: AtomicUsize,
    sessions_tx: mpsc::UnboundedSender<FakeServer>,
    sessions_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<FakeServer>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        let (sessions_tx, sessions_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            failures: Mutex::new(VecDeque::new()),
            attempts: AtomicUsize::new(0),
            sessions_tx,
            sessions_rx: tokio::sync::Mutex::new(sessions_rx),
        })
    }

    /// Fail the next connect attempt
    pub fn fail_next(&self, err: ConnectionError) {
        self.failures.lock().unwrap().push_back(err);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Server end of the next successful connect
    pub async fn next_session(&self) -> FakeServer {
        let mut rx = self.sessions_rx.lock().await;
        tokio::time::timeout(Duration::from_secs(60), rx.recv())
            .await
            .expect("no session opened")
            .expect("transport dropped")
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&self) -> Result<Link, ConnectionError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }

        let (outbound, from_client) = mpsc::unbounded_channel();
        let (to_client, inbound) = mpsc::unbounded_channel();
        let _ = self.sessions_tx.send(FakeServer {
            from_client,
            to_client: Some(to_client),
        });
        Ok(Link { outbound, inbound })
    }
}

/// Server end of one fake link
pub struct FakeServer {
    from_client: mpsc::UnboundedReceiver<Envelope>,
    to_client: Option<mpsc::UnboundedSender<Envelope>>,
}

impl FakeServer {
    /// Events the client sent so far, as `event:id`
    pub async fn drain_events(&mut self) -> Vec<String> {
        settle().await;
        let mut seen = Vec::new();
        while let Ok(envelope) = self.from_client.try_recv() {
            seen.push(describe(&envelope));
        }
        seen
    }

    /// Push an event to the client
    pub fn push(&self, event: &str, data: Value) {
        if let Some(tx) = &self.to_client {
            let _ = tx.send(Envelope::new(event, data));
        }
    }

    /// Simulate the network dropping the link
    pub fn drop_link(&mut self) {
        self.to_client = None;
    }

    /// Whether the client closed its end
    pub async fn closed(&mut self) -> bool {
        let drained = tokio::time::timeout(Duration::from_secs(5), async {
            while self.from_client.recv().await.is_some() {}
        })
        .await;
        drained.is_ok()
    }
}

fn describe(envelope: &Envelope) -> String {
    let id = envelope.data["threadId"]
        .as_str()
        .or_else(|| envelope.data["userId"].as_str())
        .unwrap_or_default();
    format!("{}:{}", envelope.event, id)
}

/// Sink that records emitted events
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ClientEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<ClientEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: ClientEvent) {
        self.events.lock().unwrap().push(event);
    }
}

// ==================== REST side ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiCall {
    ListThreads,
    GetThread,
    CreateThread,
    PostMessage,
    CloseThread,
}

#[derive(Default)]
struct ServerData {
    threads: Vec<Thread>,
    /// A thread without an entry answers 404
    messages: HashMap<String, Vec<Message>>,
    failures: HashMap<ApiCall, ApiError>,
    thread_gates: HashMap<String, oneshot::Receiver<()>>,
    post_gate: Option<oneshot::Receiver<()>>,
    calls: HashMap<ApiCall, usize>,
    next_id: u32,
    ticks: u32,
}

impl ServerData {
    fn tick(&mut self) -> DateTime<Utc> {
        self.ticks += 1;
        base_time() + chrono::Duration::seconds(i64::from(self.ticks))
    }

    fn begin(&mut self, call: ApiCall) {
        *self.calls.entry(call).or_default() += 1;
    }
}

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
}

/// Support API backed by in-memory server state
#[derive(Default)]
pub struct FakeApi {
    data: Mutex<ServerData>,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_thread(&self, id: &str, subject: &str) -> Thread {
        let mut data = self.data.lock().unwrap();
        let mut thread = Thread::new(id, subject);
        thread.last_updated = data.tick();
        data.threads.push(thread.clone());
        data.messages.entry(id.to_string()).or_default();
        thread
    }

    pub fn add_message(&self, thread_id: &str, sender: Sender, content: &str) -> Message {
        let mut data = self.data.lock().unwrap();
        let message = Message::new(thread_id, sender, content, data.tick());
        data.messages
            .entry(thread_id.to_string())
            .or_default()
            .push(message.clone());
        message
    }

    /// Fail the next call of a kind
    pub fn fail_next(&self, call: ApiCall, err: ApiError) {
        self.data.lock().unwrap().failures.insert(call, err);
    }

    /// Hold the next fetch of a thread until the sender fires or drops
    pub fn hold_thread(&self, thread_id: &str) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.data
            .lock()
            .unwrap()
            .thread_gates
            .insert(thread_id.to_string(), rx);
        tx
    }

    /// Hold the next post until the sender fires or drops
    pub fn hold_post(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.data.lock().unwrap().post_gate = Some(rx);
        tx
    }

    /// Timestamp the next server-side write will carry
    pub fn next_timestamp(&self) -> DateTime<Utc> {
        let ticks = self.data.lock().unwrap().ticks;
        base_time() + chrono::Duration::seconds(i64::from(ticks + 1))
    }

    pub fn calls(&self, call: ApiCall) -> usize {
        self.data
            .lock()
            .unwrap()
            .calls
            .get(&call)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.data.lock().unwrap().calls.values().sum()
    }

    pub fn messages(&self, thread_id: &str) -> Vec<Message> {
        self.data
            .lock()
            .unwrap()
            .messages
            .get(thread_id)
            .cloned()
            .unwrap_or_default()
    }

    fn take_failure(&self, call: ApiCall) -> Result<(), ApiError> {
        match self.data.lock().unwrap().failures.remove(&call) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SupportApi for FakeApi {
    async fn list_threads(&self) -> Result<Vec<Thread>, ApiError> {
        self.data.lock().unwrap().begin(ApiCall::ListThreads);
        self.take_failure(ApiCall::ListThreads)?;
        Ok(self.data.lock().unwrap().threads.clone())
    }

    async fn get_thread(&self, thread_id: &str) -> Result<ThreadDetail, ApiError> {
        let gate = {
            let mut data = self.data.lock().unwrap();
            data.begin(ApiCall::GetThread);
            data.thread_gates.remove(thread_id)
        };
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        self.take_failure(ApiCall::GetThread)?;

        let data = self.data.lock().unwrap();
        match data.messages.get(thread_id) {
            Some(messages) => Ok(ThreadDetail {
                messages: messages.clone(),
            }),
            None => Err(ApiError::NotFound),
        }
    }

    async fn create_thread(&self, subject: &str) -> Result<Thread, ApiError> {
        self.data.lock().unwrap().begin(ApiCall::CreateThread);
        self.take_failure(ApiCall::CreateThread)?;

        let mut data = self.data.lock().unwrap();
        data.next_id += 1;
        let mut thread = Thread::new(format!("t-{}", data.next_id), subject);
        thread.last_updated = data.tick();
        data.threads.insert(0, thread.clone());
        Ok(thread)
    }

    async fn post_message(&self, thread_id: &str, content: &str) -> Result<Message, ApiError> {
        let gate = {
            let mut data = self.data.lock().unwrap();
            data.begin(ApiCall::PostMessage);
            data.post_gate.take()
        };
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        self.take_failure(ApiCall::PostMessage)?;

        let mut data = self.data.lock().unwrap();
        let message = Message::new(thread_id, Sender::User, content, data.tick());
        data.messages
            .entry(thread_id.to_string())
            .or_default()
            .push(message.clone());
        Ok(message)
    }

    async fn close_thread(&self, thread_id: &str) -> Result<(), ApiError> {
        self.data.lock().unwrap().begin(ApiCall::CloseThread);
        self.take_failure(ApiCall::CloseThread)?;

        let mut data = self.data.lock().unwrap();
        match data.threads.iter_mut().find(|t| t.id == thread_id) {
            Some(thread) => {
                thread.status = ThreadStatus::Closed;
                Ok(())
            }
            None => Err(ApiError::NotFound),
        }
    }
}

// ==================== Engine harness ====================

/// Engine wired to fakes
pub struct Harness {
    pub engine: SyncEngine,
    pub api: Arc<FakeApi>,
    pub store: Arc<MemoryStore>,
    pub transport: Arc<FakeTransport>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()))
    }

    /// Reuse a store, as a restarted process would
    pub fn with_store(store: Arc<MemoryStore>) -> Self {
        let api = FakeApi::new();
        let transport = FakeTransport::new();
        let connection = ConnectionManager::new(
            transport.clone(),
            ConnectionConfig {
                user_id: Some("u-1".to_string()),
                max_attempts: 3,
                retry_delay: Duration::from_millis(10),
            },
        );
        let engine = SyncEngine::new(
            api.clone(),
            store.clone(),
            connection,
            Duration::from_secs(2),
        );
        Self {
            engine,
            api,
            store,
            transport,
        }
    }
}
