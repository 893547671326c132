//! Typing Coordinator
//!
//! Local typing state is debounced: the first non-empty input emits
//! `user_typing`, clearing the input emits `user_stop_typing`, and an
//! inactivity timer emits the stop if nothing else does. Remote typing
//! state is purely event driven and trusts the agent's stop signal.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::connection::{ClientEvent, EventSink};

/// Default inactivity delay before an automatic stop
pub const DEFAULT_TYPING_IDLE: Duration = Duration::from_secs(2);

#[derive(Default)]
struct LocalSlot {
    typing: bool,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

impl LocalSlot {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

#[derive(Default)]
struct TypingState {
    local: HashMap<String, LocalSlot>,
    remote: HashSet<String>,
}

struct Inner {
    sink: Arc<dyn EventSink>,
    idle: Duration,
    state: Mutex<TypingState>,
}

impl Inner {
    fn expire(&self, thread_id: &str, generation: u64) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        let Some(slot) = state.local.get_mut(thread_id) else {
            return;
        };
        // A newer input rescheduled the timer
        if slot.generation != generation {
            return;
        }
        slot.timer = None;
        if slot.typing {
            debug!("Typing idle on {}", thread_id);
            slot.typing = false;
            self.sink.emit(ClientEvent::UserStopTyping {
                thread_id: thread_id.to_string(),
            });
        }
    }
}

/// Per-thread typing state, local and remote
#[derive(Clone)]
pub struct TypingCoordinator {
    inner: Arc<Inner>,
}

impl TypingCoordinator {
    pub fn new(sink: Arc<dyn EventSink>, idle: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                sink,
                idle,
                state: Mutex::new(TypingState::default()),
            }),
        }
    }

    /// Feed the current contents of the compose box
    ///
    /// Must be called within a tokio runtime (schedules the idle timer).
    pub fn on_local_input(&self, thread_id: &str, text: &str) {
        let Ok(mut state) = self.inner.state.lock() else {
            return;
        };
        let slot = state.local.entry(thread_id.to_string()).or_default();
        let has_text = !text.trim().is_empty();

        if has_text && !slot.typing {
            slot.typing = true;
            self.inner.sink.emit(ClientEvent::UserTyping {
                thread_id: thread_id.to_string(),
            });
        } else if !has_text && slot.typing {
            slot.typing = false;
            self.inner.sink.emit(ClientEvent::UserStopTyping {
                thread_id: thread_id.to_string(),
            });
        }

        slot.generation += 1;
        slot.cancel_timer();

        let generation = slot.generation;
        let idle = self.inner.idle;
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let thread_id = thread_id.to_string();
        slot.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(idle).await;
            if let Some(inner) = weak.upgrade() {
                inner.expire(&thread_id, generation);
            }
        }));
    }

    /// Stop typing immediately (message sent or thread left)
    pub fn clear_local(&self, thread_id: &str) {
        let Ok(mut state) = self.inner.state.lock() else {
            return;
        };
        if let Some(mut slot) = state.local.remove(thread_id) {
            slot.cancel_timer();
            if slot.typing {
                self.inner.sink.emit(ClientEvent::UserStopTyping {
                    thread_id: thread_id.to_string(),
                });
            }
        }
    }

    pub fn is_typing_locally(&self, thread_id: &str) -> bool {
        self.inner
            .state
            .lock()
            .map(|state| state.local.get(thread_id).is_some_and(|s| s.typing))
            .unwrap_or(false)
    }

    /// Record the agent's typing state for a thread
    pub fn set_remote_typing(&self, thread_id: &str, typing: bool) {
        if let Ok(mut state) = self.inner.state.lock() {
            if typing {
                state.remote.insert(thread_id.to_string());
            } else {
                state.remote.remove(thread_id);
            }
        }
    }

    pub fn remote_is_typing(&self, thread_id: &str) -> bool {
        self.inner
            .state
            .lock()
            .map(|state| state.remote.contains(thread_id))
            .unwrap_or(false)
    }

    /// Forget the agent's typing state (thread deselected)
    pub fn clear_remote(&self, thread_id: &str) {
        self.set_remote_typing(thread_id, false);
    }

    /// Cancel every pending timer without emitting
    pub fn shutdown(&self) {
        if let Ok(mut state) = self.inner.state.lock() {
            for slot in state.local.values_mut() {
                slot.cancel_timer();
            }
            state.local.clear();
            state.remote.clear();
        }
    }
}
