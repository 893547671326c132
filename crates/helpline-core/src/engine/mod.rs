//! Sync Engine
//!
//! Combines three data paths into one ordered view per thread:
//! - REST snapshots from the [`SupportApi`] (authoritative)
//! - live push events from the [`ConnectionManager`]
//! - the [`LocalStore`] cache (instant display)
//!
//! All state lives behind one lock that is never held across an await.
//! Every mutation republishes an [`EngineSnapshot`] on a watch channel
//! and is persisted while the lock is held, so writes to a cache key land
//! in the order the mutations happened.
//!
//! ## Usage
//!
//! ```ignore
//! let engine = SyncEngine::new(api, store, connection, typing_idle);
//! engine.start().await?;
//! let mut ui = engine.subscribe();
//! engine.select_thread("t-1").await?;
//! engine.send_message("t-1", "Hello").await?;
//! ```

mod state;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::{ApiError, SupportApi, ThreadDetail};
use crate::connection::{events, ConnectionManager, ServerEvent, Subscription};
use crate::dedup::signature;
use crate::error::{RemoteOp, SyncError, ValidationError};
use crate::models::{Message, Sender, Thread, ThreadStatus};
use crate::storage::LocalStore;
use crate::typing::TypingCoordinator;

pub use state::EngineSnapshot;
use state::EngineState;

/// Proof that the caller confirmed closing a thread
///
/// Only [`SyncEngine::request_close`] creates one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseRequest {
    thread_id: String,
}

impl CloseRequest {
    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }
}

struct EngineInner {
    api: Arc<dyn SupportApi>,
    store: Arc<dyn LocalStore>,
    connection: ConnectionManager,
    typing: TypingCoordinator,
    state: Mutex<EngineState>,
    snapshot_tx: watch::Sender<EngineSnapshot>,
    handlers: Mutex<Vec<Subscription>>,
}

/// The orchestrator behind the chat UI
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    /// Build the engine and register its push handlers
    ///
    /// Must be called within a tokio runtime.
    pub fn new(
        api: Arc<dyn SupportApi>,
        store: Arc<dyn LocalStore>,
        connection: ConnectionManager,
        typing_idle: Duration,
    ) -> Self {
        let typing = TypingCoordinator::new(Arc::new(connection.clone()), typing_idle);
        let (snapshot_tx, _) = watch::channel(EngineSnapshot::default());

        let engine = Self {
            inner: Arc::new(EngineInner {
                api,
                store,
                connection,
                typing,
                state: Mutex::new(EngineState::default()),
                snapshot_tx,
                handlers: Mutex::new(Vec::new()),
            }),
        };

        engine.register_handlers();
        engine.watch_connection();
        engine
    }

    fn register_handlers(&self) {
        let names = [
            events::NEW_MESSAGE,
            events::NEW_THREAD,
            events::ADMIN_TYPING,
            events::ADMIN_STOP_TYPING,
        ];

        let mut subscriptions = Vec::with_capacity(names.len());
        for name in names {
            let weak = Arc::downgrade(&self.inner);
            let subscription = self.inner.connection.on(name, move |data: &Value| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                match ServerEvent::parse(name, data) {
                    Ok(Some(event)) => SyncEngine { inner }.apply_server_event(event),
                    Ok(None) => {}
                    Err(e) => warn!("Ignoring malformed {} event: {}", name, e),
                }
            });
            subscriptions.push(subscription);
        }

        *self.handlers() = subscriptions;
    }

    /// Republish the snapshot whenever the connection state changes
    fn watch_connection(&self) {
        let mut state_rx = self.inner.connection.subscribe_state();
        let weak: Weak<EngineInner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while state_rx.changed().await.is_ok() {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let engine = SyncEngine { inner };
                {
                    let state = engine.lock();
                    engine.publish(&state);
                }
            }
        });
    }

    // ==================== Observation ====================

    /// Current state
    pub fn snapshot(&self) -> EngineSnapshot {
        self.inner.snapshot_tx.borrow().clone()
    }

    /// Watch state changes
    pub fn subscribe(&self) -> watch::Receiver<EngineSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.inner.connection
    }

    pub fn typing(&self) -> &TypingCoordinator {
        &self.inner.typing
    }

    // ==================== Lifecycle ====================

    /// Restore cached state, connect and load the authoritative thread list
    ///
    /// The last selected thread is shown from cache immediately and then
    /// refreshed. A failed list fetch leaves the cached list in place.
    pub async fn start(&self) -> Result<(), SyncError> {
        let restored = {
            let mut state = self.lock();
            if let Some(threads) = self.load_cached_threads() {
                state.threads = threads;
            }

            let selected = match self.inner.store.load_selected_thread() {
                Ok(selected) => selected,
                Err(e) => {
                    warn!("Failed to read selected thread from cache: {}", e);
                    None
                }
            };

            let restored = selected.map(|thread_id| {
                let cached = self.load_cached_messages(&thread_id);
                state.select_seq += 1;
                state.replace_messages(&thread_id, cached);
                state.selected = Some(thread_id.clone());
                (thread_id, state.select_seq)
            });
            self.publish(&state);
            restored
        };

        if let Some((thread_id, _)) = &restored {
            self.inner.connection.join_thread(thread_id);
        }
        self.inner.connection.connect();

        let listed = self.load_thread_list().await.map(|_| ());
        if let Some((thread_id, seq)) = restored {
            self.fetch_messages(&thread_id, seq).await?;
        }
        listed
    }

    /// Caller-invoked manual retry of the REST loads
    ///
    /// Both loads run even if the first fails; the first error is returned.
    pub async fn refresh(&self) -> Result<(), SyncError> {
        let listed = self.load_thread_list().await.map(|_| ());

        let selected = {
            let mut state = self.lock();
            let selected = state.selected.clone().map(|id| (id, state.select_seq));
            if selected.is_some() {
                state.loading_messages = true;
                self.publish(&state);
            }
            selected
        };

        let fetched = match selected {
            Some((thread_id, seq)) => self.fetch_messages(&thread_id, seq).await,
            None => Ok(()),
        };
        listed.and(fetched)
    }

    /// Explicit reconnect after the retry budget ran out
    pub fn retry_connection(&self) {
        info!("Manual reconnect requested");
        self.inner.connection.retry();
    }

    pub fn clear_error(&self) {
        let mut state = self.lock();
        if state.error.take().is_some() {
            self.publish(&state);
        }
    }

    /// Unregister push handlers, stop typing timers and disconnect
    pub fn shutdown(&self) {
        let handlers = std::mem::take(&mut *self.handlers());
        for subscription in &handlers {
            self.inner.connection.off(subscription);
        }
        self.inner.typing.shutdown();
        self.inner.connection.disconnect();
    }

    // ==================== Thread list ====================

    /// Show the cached list immediately, then replace it with the server's
    ///
    /// On failure the existing list is kept and the error is surfaced.
    pub async fn load_thread_list(&self) -> Result<Vec<Thread>, SyncError> {
        let seq = {
            let mut state = self.lock();
            if state.threads.is_empty() {
                if let Some(cached) = self.load_cached_threads() {
                    state.threads = cached;
                }
            }
            state.list_seq += 1;
            state.loading_threads = true;
            self.publish(&state);
            state.list_seq
        };

        let result = self.inner.api.list_threads().await;

        let threads = {
            let mut state = self.lock();
            if state.list_seq != seq {
                debug!("Discarding superseded thread list fetch");
                return Ok(state.threads.clone());
            }
            state.loading_threads = false;

            match result {
                Ok(mut threads) => {
                    for thread in &mut threads {
                        if let Some(local) = state.thread(&thread.id) {
                            thread.unread_count = thread.unread_count.max(local.unread_count);
                        }
                        if state.is_selected(&thread.id) {
                            thread.unread_count = 0;
                        }
                    }
                    state.threads = threads;
                    self.persist_threads(&state);
                    self.publish(&state);
                    state.threads.clone()
                }
                Err(source) => {
                    let err = SyncError::remote(RemoteOp::LoadThreads, source);
                    warn!("{}", err);
                    state.error = Some(err.to_string());
                    self.publish(&state);
                    return Err(err);
                }
            }
        };

        for thread in &threads {
            self.inner.connection.join_thread(&thread.id);
        }
        Ok(threads)
    }

    /// Create a thread, prepend it to the list and select it
    pub async fn create_thread(&self, subject: &str) -> Result<Thread, SyncError> {
        let subject = subject.trim();
        if subject.is_empty() {
            return Err(ValidationError::EmptySubject.into());
        }

        let thread = match self.inner.api.create_thread(subject).await {
            Ok(thread) => thread,
            Err(source) => return Err(self.fail(RemoteOp::CreateThread, source)),
        };
        info!("Created thread {}", thread.id);

        {
            let mut state = self.lock();
            if state.thread(&thread.id).is_none() {
                state.threads.insert(0, thread.clone());
            }
            self.persist_threads(&state);
            self.publish(&state);
        }

        // A fetch failure leaves the error visible; the thread itself exists
        if let Err(e) = self.select_thread(&thread.id).await {
            debug!("Initial fetch for new thread {} failed: {}", thread.id, e);
        }
        Ok(thread)
    }

    /// Ask to close a thread; hand the result to [`close_thread`](Self::close_thread)
    pub fn request_close(&self, thread_id: &str) -> Result<CloseRequest, SyncError> {
        let state = self.lock();
        if state.thread(thread_id).is_none() {
            return Err(SyncError::UnknownThread(thread_id.to_string()));
        }
        Ok(CloseRequest {
            thread_id: thread_id.to_string(),
        })
    }

    /// Close a confirmed thread; message history is kept
    pub async fn close_thread(&self, request: CloseRequest) -> Result<(), SyncError> {
        let thread_id = request.thread_id;
        if let Err(source) = self.inner.api.close_thread(&thread_id).await {
            return Err(self.fail(RemoteOp::CloseThread, source));
        }

        let mut state = self.lock();
        if let Some(thread) = state.thread_mut(&thread_id) {
            thread.status = ThreadStatus::Closed;
        }
        self.persist_threads(&state);
        self.publish(&state);
        info!("Closed thread {}", thread_id);
        Ok(())
    }

    // ==================== Messages ====================

    /// Switch the visible thread
    ///
    /// Cached messages show immediately; the server's list replaces them when
    /// the fetch lands, unless another thread was selected in the meantime.
    pub async fn select_thread(&self, thread_id: &str) -> Result<(), SyncError> {
        let (previous, seq) = {
            let mut state = self.lock();
            if state.is_selected(thread_id) {
                return Ok(());
            }

            let previous = state.selected.replace(thread_id.to_string());
            if let Some(prev) = &previous {
                state.dedup.reset(prev);
            }
            state.select_seq += 1;

            let cached = self.load_cached_messages(thread_id);
            state.replace_messages(thread_id, cached);
            state.loading_messages = true;

            let was_unread = match state.thread_mut(thread_id) {
                Some(thread) if thread.unread_count > 0 => {
                    thread.unread_count = 0;
                    true
                }
                _ => false,
            };
            if was_unread {
                self.persist_threads(&state);
            }
            if let Err(e) = self.inner.store.save_selected_thread(thread_id) {
                warn!("Failed to cache selected thread: {}", e);
            }

            self.publish(&state);
            // Listed threads stay subscribed for unread updates
            let previous = previous.map(|prev| {
                let listed = state.thread(&prev).is_some();
                (prev, listed)
            });
            (previous, state.select_seq)
        };

        if let Some((prev, listed)) = previous {
            self.inner.typing.clear_local(&prev);
            self.inner.typing.clear_remote(&prev);
            if !listed {
                self.inner.connection.leave_thread(&prev);
            }
        }
        // Join before the fetch is trusted; the fetch does not wait for an ack
        self.inner.connection.join_thread(thread_id);

        self.fetch_messages(thread_id, seq).await
    }

    /// Per-thread fetch tagged with the selection it was issued for
    async fn fetch_messages(&self, thread_id: &str, seq: u64) -> Result<(), SyncError> {
        let result = match self.inner.api.get_thread(thread_id).await {
            // A brand-new thread has no messages yet
            Err(ApiError::NotFound) => Ok(ThreadDetail::default()),
            other => other,
        };

        let mut state = self.lock();
        if state.select_seq != seq || !state.is_selected(thread_id) {
            debug!("Discarding stale message fetch for {}", thread_id);
            return Ok(());
        }
        state.loading_messages = false;

        match result {
            Ok(detail) => {
                let fetched = detail
                    .messages
                    .into_iter()
                    .map(|mut m| {
                        m.thread_id = thread_id.to_string();
                        m.pending = false;
                        m
                    })
                    .collect();
                state.replace_messages(thread_id, fetched);
                self.persist_messages(thread_id, &state.messages);
                self.publish(&state);
                Ok(())
            }
            Err(source) => {
                let err = SyncError::remote(RemoteOp::LoadMessages, source);
                warn!("{} ({})", err, thread_id);
                state.error = Some(err.to_string());
                self.publish(&state);
                Err(err)
            }
        }
    }

    /// Send to the selected thread
    pub async fn send_to_selected(&self, content: &str) -> Result<Message, SyncError> {
        let selected = self.lock().selected.clone();
        match selected {
            Some(thread_id) => self.send_message(&thread_id, content).await,
            None => Err(SyncError::NoThreadSelected),
        }
    }

    /// Optimistic send
    ///
    /// The message appears as pending before the request goes out. Success
    /// swaps it for the server's copy in the same position; failure removes
    /// it.
    pub async fn send_message(&self, thread_id: &str, content: &str) -> Result<Message, SyncError> {
        if thread_id.is_empty() {
            return Err(SyncError::NoThreadSelected);
        }
        let content = content.trim();
        if content.is_empty() {
            return Err(ValidationError::EmptyMessage.into());
        }

        let optimistic = Message::optimistic(thread_id, content);
        let local_id = optimistic.local_id.unwrap_or_else(Uuid::new_v4);
        {
            let mut state = self.lock();
            if !state.is_selected(thread_id) {
                return Err(SyncError::ThreadNotSelected(thread_id.to_string()));
            }
            if state.thread(thread_id).is_some_and(Thread::is_closed) {
                return Err(ValidationError::ThreadClosed.into());
            }
            if state.begin_send(optimistic.clone()) {
                self.persist_messages(thread_id, &state.messages);
                self.publish(&state);
            }
        }
        self.inner.typing.clear_local(thread_id);

        match self.inner.api.post_message(thread_id, content).await {
            Ok(mut confirmed) => {
                confirmed.thread_id = thread_id.to_string();
                confirmed.pending = false;
                confirmed.local_id = None;
                self.confirm_send(thread_id, local_id, &optimistic, &confirmed);
                Ok(confirmed)
            }
            Err(source) => {
                self.rollback_send(thread_id, local_id, &optimistic);
                Err(self.fail(RemoteOp::SendMessage, source))
            }
        }
    }

    fn confirm_send(&self, thread_id: &str, local_id: Uuid, optimistic: &Message, confirmed: &Message) {
        let mut state = self.lock();
        state.end_send(thread_id, local_id);

        if state.is_selected(thread_id) {
            let position = state
                .messages
                .iter()
                .position(|m| m.local_id == Some(local_id));
            if let Some(pos) = position {
                let pending = state.messages[pos].clone();
                state.dedup.forget(thread_id, &pending);
            }

            let admitted = state.dedup.try_admit(thread_id, confirmed);
            match (position, admitted) {
                (Some(pos), true) => state.messages[pos] = confirmed.clone(),
                (None, true) => state.messages.push(confirmed.clone()),
                // Already delivered by push: drop the pending copy
                (Some(pos), false) => {
                    state.messages.remove(pos);
                }
                (None, false) => {}
            }
            self.persist_messages(thread_id, &state.messages);
        } else {
            // Selection moved on; fix up the cached list instead
            let mut cached = self.load_cached_messages(thread_id);
            cached.retain(|m| signature(m) != signature(optimistic));
            if !cached.iter().any(|m| signature(m) == signature(confirmed)) {
                cached.push(confirmed.clone());
            }
            self.persist_messages(thread_id, &cached);
            // Reseeded from the cache on the next background push
            state.dedup.reset(thread_id);
        }

        if let Some(thread) = state.thread_mut(thread_id) {
            thread.touch(confirmed.timestamp);
        }
        self.persist_threads(&state);
        self.publish(&state);
    }

    fn rollback_send(&self, thread_id: &str, local_id: Uuid, optimistic: &Message) {
        let mut state = self.lock();
        state.end_send(thread_id, local_id);

        if state.is_selected(thread_id) {
            let before = state.messages.len();
            state.messages.retain(|m| m.local_id != Some(local_id));
            if state.messages.len() != before {
                state.dedup.forget(thread_id, optimistic);
            }
            self.persist_messages(thread_id, &state.messages);
        } else {
            // Cached pending entries are dropped on load
            let cached = self.load_cached_messages(thread_id);
            self.persist_messages(thread_id, &cached);
        }
        self.publish(&state);
    }

    /// Forward compose-box input to the typing coordinator
    pub fn on_local_input(&self, thread_id: &str, text: &str) {
        self.inner.typing.on_local_input(thread_id, text);
    }

    // ==================== Push events ====================

    /// Apply one event received on the push connection
    pub fn apply_server_event(&self, event: ServerEvent) {
        match event {
            ServerEvent::NewMessage { thread_id, message } => self.on_new_message(&thread_id, message),
            ServerEvent::NewThread { thread } => self.on_new_thread(thread),
            ServerEvent::AdminTyping { thread_id } => self.on_admin_typing(&thread_id, true),
            ServerEvent::AdminStopTyping { thread_id } => self.on_admin_typing(&thread_id, false),
        }
    }

    fn on_new_message(&self, thread_id: &str, mut message: Message) {
        message.thread_id = thread_id.to_string();
        message.pending = false;
        message.local_id = None;
        let timestamp = message.timestamp;
        let sender = message.sender;

        let mut state = self.lock();
        if state.is_selected(thread_id) {
            if !state.admit(thread_id, message) {
                debug!("Duplicate push message for {} ignored", thread_id);
                return;
            }
            self.persist_messages(thread_id, &state.messages);
        } else {
            let cached = self.load_cached_messages(thread_id);
            match state.admit_background(thread_id, cached, message) {
                Some(cached) => self.persist_messages(thread_id, &cached),
                None => {
                    debug!("Duplicate push message for {} ignored", thread_id);
                    return;
                }
            }
        }

        let selected = state.is_selected(thread_id);
        match state.thread_mut(thread_id) {
            Some(thread) => {
                thread.touch(timestamp);
                if !selected && sender != Sender::User {
                    thread.unread_count += 1;
                }
            }
            None => debug!("Message for unknown thread {}", thread_id),
        }
        self.persist_threads(&state);
        self.publish(&state);
    }

    fn on_new_thread(&self, thread: Thread) {
        let thread_id = thread.id.clone();
        {
            let mut state = self.lock();
            if state.thread(&thread_id).is_some() {
                return;
            }
            info!("New thread {} pushed", thread_id);
            state.threads.insert(0, thread);
            self.persist_threads(&state);
            self.publish(&state);
        }
        self.inner.connection.join_thread(&thread_id);
    }

    fn on_admin_typing(&self, thread_id: &str, typing: bool) {
        let state = self.lock();
        if !state.is_selected(thread_id) {
            return;
        }
        self.inner.typing.set_remote_typing(thread_id, typing);
        self.publish(&state);
    }

    // ==================== Internals ====================

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handlers(&self) -> MutexGuard<'_, Vec<Subscription>> {
        self.inner.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &EngineState) {
        let admin_is_typing = state
            .selected
            .as_deref()
            .is_some_and(|id| self.inner.typing.remote_is_typing(id));
        let snapshot = state.to_snapshot(self.inner.connection.state(), admin_is_typing);
        self.inner.snapshot_tx.send_replace(snapshot);
    }

    /// Record a remote failure in the snapshot and return it
    fn fail(&self, op: RemoteOp, source: ApiError) -> SyncError {
        let err = SyncError::remote(op, source);
        warn!("{}", err);
        let mut state = self.lock();
        state.error = Some(err.to_string());
        self.publish(&state);
        err
    }

    fn load_cached_threads(&self) -> Option<Vec<Thread>> {
        match self.inner.store.load_threads() {
            Ok(threads) => threads,
            Err(e) => {
                warn!("Failed to read cached threads: {}", e);
                None
            }
        }
    }

    fn load_cached_messages(&self, thread_id: &str) -> Vec<Message> {
        match self.inner.store.load_messages(thread_id) {
            Ok(messages) => messages.unwrap_or_default(),
            Err(e) => {
                warn!("Failed to read cached messages for {}: {}", thread_id, e);
                Vec::new()
            }
        }
    }

    fn persist_threads(&self, state: &EngineState) {
        if let Err(e) = self.inner.store.save_threads(&state.threads) {
            warn!("Failed to cache thread list: {}", e);
        }
    }

    fn persist_messages(&self, thread_id: &str, messages: &[Message]) {
        if let Err(e) = self.inner.store.save_messages(thread_id, messages) {
            warn!("Failed to cache messages for {}: {}", thread_id, e);
        }
    }
}
