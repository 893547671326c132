//! Connection Manager
//!
//! Owns the one long-lived push connection shared by every thread. A
//! background task drives the lifecycle:
//!
//! ```text
//! Disconnected --connect()--> Connecting --link open--> Connected
//!      ^                        |    ^                      |
//!      |                 budget spent |                  link dropped
//!      |                        v    |                      |
//!      +--disconnect()------- Error  +---- (auto reconnect) +
//!                               |
//!                            retry()
//! ```
//!
//! Room membership does not survive a dropped link, so every time the
//! state enters `Connected` the task re-emits `join_user_room` and a
//! `join_thread` for each id in the subscription set.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::message::{events, ClientEvent, Envelope};
use super::transport::{Link, Transport};
use super::EventSink;

/// Connection state, process-wide
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected, not trying
    Disconnected,
    /// Attempting to connect
    Connecting,
    /// Link open, rooms joined
    Connected,
    /// Retry budget exhausted; waiting for an explicit retry
    Error,
}

/// Configuration for the Connection Manager
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Personal notification room to join after every connect
    pub user_id: Option<String>,
    /// Connection attempts per (re)connect cycle
    pub max_attempts: u32,
    /// Fixed delay between attempts
    pub retry_delay: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            user_id: None,
            max_attempts: 5,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Handler invoked with an event's payload
pub type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Registration returned by [`ConnectionManager::on`], consumed by `off`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    event: String,
    id: u64,
}

impl Subscription {
    pub fn event(&self) -> &str {
        &self.event
    }
}

/// Commands sent to the connection task
#[derive(Debug)]
enum Command {
    Connect,
    Disconnect,
    Join(String),
    Leave(String),
    Send(Envelope),
}

/// State shared between handles and the task
#[derive(Default)]
struct Shared {
    handlers: Mutex<HashMap<String, Vec<(u64, Handler)>>>,
    next_handler_id: AtomicU64,
    subscriptions: Mutex<BTreeSet<String>>,
}

impl Shared {
    fn dispatch(&self, event: &str, data: &Value) {
        // Snapshot the handlers so they may call on()/off() themselves
        let handlers: Vec<Handler> = match self.handlers.lock() {
            Ok(map) => map
                .get(event)
                .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default(),
            Err(_) => return,
        };

        for handler in handlers {
            handler(data);
        }
    }

    fn subscriptions(&self) -> Vec<String> {
        self.subscriptions
            .lock()
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Handle to the push connection
///
/// Cheap to clone; all clones drive the same task. The task stops once
/// every handle is dropped.
#[derive(Clone)]
pub struct ConnectionManager {
    command_tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    shared: Arc<Shared>,
}

impl ConnectionManager {
    /// Spawn the connection task (initially `Disconnected`)
    pub fn new(transport: Arc<dyn Transport>, config: ConnectionConfig) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let shared = Arc::new(Shared::default());

        let task = ConnectionTask {
            transport,
            config,
            shared: Arc::clone(&shared),
            commands: command_rx,
            state_tx,
        };
        tokio::spawn(task.run());

        Self {
            command_tx,
            state_rx,
            shared,
        }
    }

    /// Start connecting (no-op while connecting or connected)
    pub fn connect(&self) {
        self.command(Command::Connect);
    }

    /// Explicit retry after the budget was exhausted
    pub fn retry(&self) {
        self.command(Command::Connect);
    }

    /// Close the link and stay disconnected until `connect()`
    pub fn disconnect(&self) {
        self.command(Command::Disconnect);
    }

    /// Add a thread to the subscription set and join its room when connected
    pub fn join_thread(&self, thread_id: &str) {
        if thread_id.is_empty() {
            return;
        }
        if let Ok(mut set) = self.shared.subscriptions.lock() {
            set.insert(thread_id.to_string());
        }
        self.command(Command::Join(thread_id.to_string()));
    }

    /// Remove a thread from the subscription set and leave its room when connected
    pub fn leave_thread(&self, thread_id: &str) {
        if let Ok(mut set) = self.shared.subscriptions.lock() {
            set.remove(thread_id);
        }
        self.command(Command::Leave(thread_id.to_string()));
    }

    /// Send a named event; dropped while not connected
    pub fn send(&self, event: &str, data: Value) {
        self.command(Command::Send(Envelope::new(event, data)));
    }

    /// Register a handler for a named event
    pub fn on<F>(&self, event: &str, handler: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = self.shared.next_handler_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut map) = self.shared.handlers.lock() {
            map.entry(event.to_string())
                .or_default()
                .push((id, Arc::new(handler)));
        }
        Subscription {
            event: event.to_string(),
            id,
        }
    }

    /// Unregister a handler; returns whether it was registered
    pub fn off(&self, subscription: &Subscription) -> bool {
        let Ok(mut map) = self.shared.handlers.lock() else {
            return false;
        };
        let Some(list) = map.get_mut(&subscription.event) else {
            return false;
        };
        let before = list.len();
        list.retain(|(id, _)| *id != subscription.id);
        let removed = list.len() != before;
        if list.is_empty() {
            map.remove(&subscription.event);
        }
        removed
    }

    /// Number of handlers registered for an event
    pub fn handler_count(&self, event: &str) -> usize {
        self.shared
            .handlers
            .lock()
            .map(|map| map.get(event).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Watch connection state changes
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Thread ids currently in the subscription set
    pub fn subscriptions(&self) -> Vec<String> {
        self.shared.subscriptions()
    }

    fn command(&self, command: Command) {
        if self.command_tx.send(command).is_err() {
            debug!("Connection task has stopped; command dropped");
        }
    }
}

impl EventSink for ConnectionManager {
    fn emit(&self, event: ClientEvent) {
        let envelope = event.to_envelope();
        self.command(Command::Send(envelope));
    }
}

/// How a connect cycle or a session ended
enum Outcome {
    /// Link dropped by the transport; reconnect automatically
    Dropped,
    /// Caller asked to disconnect
    Disconnected,
    /// Attempts exhausted
    Exhausted,
    /// Every handle is gone
    Shutdown,
}

struct ConnectionTask {
    transport: Arc<dyn Transport>,
    config: ConnectionConfig,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
}

impl ConnectionTask {
    async fn run(mut self) {
        loop {
            // Idle until someone asks to connect
            if !self.wait_for_connect().await {
                return;
            }

            loop {
                let link = match self.establish().await {
                    Ok(link) => link,
                    Err(Outcome::Exhausted) => {
                        warn!(
                            "Giving up after {} connection attempts",
                            self.config.max_attempts
                        );
                        self.set_state(ConnectionState::Error);
                        break;
                    }
                    Err(Outcome::Shutdown) => return,
                    Err(_) => {
                        self.set_state(ConnectionState::Disconnected);
                        break;
                    }
                };

                let outcome = self.serve(link).await;
                self.set_state(ConnectionState::Disconnected);
                self.shared.dispatch(events::DISCONNECT, &Value::Null);

                match outcome {
                    Outcome::Dropped => {
                        info!("Push connection dropped, reconnecting");
                        continue;
                    }
                    Outcome::Shutdown => return,
                    _ => break,
                }
            }
        }
    }

    /// Wait in `Disconnected`/`Error` for a connect command
    ///
    /// Returns `false` when every handle is gone.
    async fn wait_for_connect(&mut self) -> bool {
        loop {
            match self.commands.recv().await {
                Some(Command::Connect) => return true,
                Some(Command::Send(envelope)) => {
                    debug!("Not connected; dropping {} event", envelope.event);
                }
                // Subscription set already updated by the handle
                Some(Command::Join(_)) | Some(Command::Leave(_)) | Some(Command::Disconnect) => {}
                None => return false,
            }
        }
    }

    /// Try to open a link within the attempt budget
    async fn establish(&mut self) -> Result<Link, Outcome> {
        let max_attempts = self.config.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            self.set_state(ConnectionState::Connecting);
            debug!("Connection attempt {}/{}", attempt, max_attempts);

            let transport = Arc::clone(&self.transport);
            let connect = transport.connect();
            tokio::pin!(connect);

            let result = loop {
                tokio::select! {
                    result = &mut connect => break result,
                    cmd = self.commands.recv() => {
                        if let Some(stop) = self.handle_offline_command(cmd) {
                            return Err(stop);
                        }
                    }
                }
            };

            match result {
                Ok(link) => return Ok(link),
                Err(e) => {
                    warn!("Connection attempt {} failed: {}", attempt, e);
                    self.shared
                        .dispatch(events::CONNECT_ERROR, &json!({ "message": e.to_string() }));
                }
            }

            if attempt == max_attempts {
                break;
            }

            let delay = tokio::time::sleep(self.config.retry_delay);
            tokio::pin!(delay);
            loop {
                tokio::select! {
                    _ = &mut delay => break,
                    cmd = self.commands.recv() => {
                        if let Some(stop) = self.handle_offline_command(cmd) {
                            return Err(stop);
                        }
                    }
                }
            }
        }

        Err(Outcome::Exhausted)
    }

    /// Handle a command that arrives while no link is open
    fn handle_offline_command(&mut self, cmd: Option<Command>) -> Option<Outcome> {
        match cmd {
            None => Some(Outcome::Shutdown),
            Some(Command::Disconnect) => Some(Outcome::Disconnected),
            Some(Command::Send(envelope)) => {
                debug!("Not connected; dropping {} event", envelope.event);
                None
            }
            Some(Command::Connect) | Some(Command::Join(_)) | Some(Command::Leave(_)) => None,
        }
    }

    /// Run an open link until it drops or we are told to stop
    async fn serve(&mut self, mut link: Link) -> Outcome {
        self.set_state(ConnectionState::Connected);

        let mut joined = HashSet::new();
        if !self.rejoin(&link, &mut joined) {
            return Outcome::Dropped;
        }
        self.shared.dispatch(events::CONNECT, &Value::Null);

        loop {
            tokio::select! {
                cmd = self.commands.recv() => {
                    let sent = match cmd {
                        None => return Outcome::Shutdown,
                        Some(Command::Disconnect) => return Outcome::Disconnected,
                        Some(Command::Connect) => true,
                        Some(Command::Join(thread_id)) => {
                            if joined.insert(thread_id.clone()) {
                                send(&link, ClientEvent::JoinThread { thread_id }.to_envelope())
                            } else {
                                true
                            }
                        }
                        Some(Command::Leave(thread_id)) => {
                            if joined.remove(&thread_id) {
                                send(&link, ClientEvent::LeaveThread { thread_id }.to_envelope())
                            } else {
                                true
                            }
                        }
                        Some(Command::Send(envelope)) => send(&link, envelope),
                    };
                    if !sent {
                        return Outcome::Dropped;
                    }
                }
                frame = link.inbound.recv() => {
                    match frame {
                        Some(envelope) => self.shared.dispatch(&envelope.event, &envelope.data),
                        None => return Outcome::Dropped,
                    }
                }
            }
        }
    }

    /// Join the user room and every subscribed thread on a fresh link
    fn rejoin(&self, link: &Link, joined: &mut HashSet<String>) -> bool {
        if let Some(user_id) = &self.config.user_id {
            let event = ClientEvent::JoinUserRoom {
                user_id: user_id.clone(),
            };
            if !send(link, event.to_envelope()) {
                return false;
            }
        }

        let threads = self.shared.subscriptions();
        debug!("Re-joining {} thread room(s)", threads.len());
        for thread_id in threads {
            joined.insert(thread_id.clone());
            if !send(link, ClientEvent::JoinThread { thread_id }.to_envelope()) {
                return false;
            }
        }
        true
    }

    fn set_state(&self, state: ConnectionState) {
        let changed = *self.state_tx.borrow() != state;
        if changed {
            debug!("Connection state -> {:?}", state);
            let _ = self.state_tx.send(state);
        }
    }
}

fn send(link: &Link, envelope: Envelope) -> bool {
    link.outbound.send(envelope).is_ok()
}
