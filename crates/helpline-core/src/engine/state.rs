//! Engine state and the snapshot exposed to the UI

use std::collections::HashMap;

use serde::Serialize;
use uuid::Uuid;

use crate::connection::ConnectionState;
use crate::dedup::DedupIndex;
use crate::models::{Message, Thread};

/// Everything the UI needs to render one frame
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSnapshot {
    pub threads: Vec<Thread>,
    pub selected_thread_id: Option<String>,
    /// Messages of the selected thread, in append order
    pub messages: Vec<Message>,
    #[serde(serialize_with = "serialize_connection_state")]
    pub connection_state: ConnectionState,
    pub admin_is_typing: bool,
    pub loading_threads: bool,
    pub loading_messages: bool,
    pub error: Option<String>,
}

impl Default for EngineSnapshot {
    fn default() -> Self {
        Self {
            threads: Vec::new(),
            selected_thread_id: None,
            messages: Vec::new(),
            connection_state: ConnectionState::Disconnected,
            admin_is_typing: false,
            loading_threads: false,
            loading_messages: false,
            error: None,
        }
    }
}

impl EngineSnapshot {
    pub fn selected_thread(&self) -> Option<&Thread> {
        let id = self.selected_thread_id.as_deref()?;
        self.threads.iter().find(|t| t.id == id)
    }

    pub fn has_pending(&self) -> bool {
        self.messages.iter().any(|m| m.pending)
    }
}

fn serialize_connection_state<S>(state: &ConnectionState, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    let name = match state {
        ConnectionState::Disconnected => "disconnected",
        ConnectionState::Connecting => "connecting",
        ConnectionState::Connected => "connected",
        ConnectionState::Error => "error",
    };
    serializer.serialize_str(name)
}

/// Authoritative in-memory state, guarded by the engine's lock
#[derive(Debug, Default)]
pub(crate) struct EngineState {
    pub threads: Vec<Thread>,
    pub selected: Option<String>,
    /// Messages of `selected`
    pub messages: Vec<Message>,
    pub dedup: DedupIndex,
    /// Optimistic messages awaiting the server, per thread, in send order
    pub in_flight: HashMap<String, Vec<Message>>,
    /// Bumped on every selection; tags in-flight per-thread fetches
    pub select_seq: u64,
    /// Bumped on every list fetch; only the newest result lands
    pub list_seq: u64,
    pub loading_threads: bool,
    pub loading_messages: bool,
    pub error: Option<String>,
}

impl EngineState {
    pub fn is_selected(&self, thread_id: &str) -> bool {
        self.selected.as_deref() == Some(thread_id)
    }

    pub fn thread_mut(&mut self, thread_id: &str) -> Option<&mut Thread> {
        self.threads.iter_mut().find(|t| t.id == thread_id)
    }

    pub fn thread(&self, thread_id: &str) -> Option<&Thread> {
        self.threads.iter().find(|t| t.id == thread_id)
    }

    /// Append to the selected thread's messages if the signature is new
    pub fn admit(&mut self, thread_id: &str, message: Message) -> bool {
        if !self.is_selected(thread_id) || !self.dedup.try_admit(thread_id, &message) {
            return false;
        }
        self.messages.push(message);
        true
    }

    /// Track an optimistic message and show it if its thread is selected
    pub fn begin_send(&mut self, message: Message) -> bool {
        let thread_id = message.thread_id.clone();
        if !self.admit(&thread_id, message.clone()) {
            return false;
        }
        self.in_flight.entry(thread_id).or_default().push(message);
        true
    }

    /// Stop tracking an optimistic message once the server answered
    pub fn end_send(&mut self, thread_id: &str, local_id: Uuid) {
        if let Some(sends) = self.in_flight.get_mut(thread_id) {
            sends.retain(|m| m.local_id != Some(local_id));
            if sends.is_empty() {
                self.in_flight.remove(thread_id);
            }
        }
    }

    /// Replace the selected thread's messages, keeping in-flight sends
    ///
    /// In-flight messages go after `base` so their confirmation can still
    /// replace them in place.
    pub fn replace_messages(&mut self, thread_id: &str, base: Vec<Message>) {
        let mut messages = self.dedup.rebuild(thread_id, base);
        for message in self.in_flight.get(thread_id).into_iter().flatten() {
            if self.dedup.try_admit(thread_id, message) {
                messages.push(message.clone());
            }
        }
        self.messages = messages;
    }

    /// Record a push for a thread that is not on screen
    ///
    /// The thread's signatures are seeded from `cached` the first time. Returns
    /// the cached list with the message appended, or `None` for a duplicate.
    pub fn admit_background(
        &mut self,
        thread_id: &str,
        mut cached: Vec<Message>,
        message: Message,
    ) -> Option<Vec<Message>> {
        if !self.dedup.tracks(thread_id) {
            cached = self.dedup.rebuild(thread_id, cached);
        }
        if !self.dedup.try_admit(thread_id, &message) {
            return None;
        }
        cached.push(message);
        Some(cached)
    }

    pub fn to_snapshot(
        &self,
        connection_state: ConnectionState,
        admin_is_typing: bool,
    ) -> EngineSnapshot {
        EngineSnapshot {
            threads: self.threads.clone(),
            selected_thread_id: self.selected.clone(),
            messages: self.messages.clone(),
            connection_state,
            admin_is_typing,
            loading_threads: self.loading_threads,
            loading_messages: self.loading_messages,
            error: self.error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Sender;
    use chrono::{TimeZone, Utc};

    fn msg(content: &str, secs: u32) -> Message {
        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, secs).unwrap();
        Message::new("t-1", Sender::Agent, content, ts)
    }

    fn selected_state() -> EngineState {
        EngineState {
            selected: Some("t-1".to_string()),
            threads: vec![Thread::new("t-1", "Help")],
            ..EngineState::default()
        }
    }

    #[test]
    fn test_admit_ignores_unselected_thread() {
        let mut state = selected_state();
        let mut other = msg("hi", 1);
        other.thread_id = "t-2".to_string();
        assert!(!state.admit("t-2", other));
        assert!(state.messages.is_empty());
    }

    #[test]
    fn test_admit_dedups() {
        let mut state = selected_state();
        assert!(state.admit("t-1", msg("hi", 1)));
        assert!(!state.admit("t-1", msg("hi", 1)));
        assert_eq!(state.messages.len(), 1);
    }

    #[test]
    fn test_replace_messages_keeps_pending_after_fetched() {
        let mut state = selected_state();
        state.admit("t-1", msg("old", 1));
        let pending = Message::optimistic("t-1", "in flight");
        assert!(state.begin_send(pending.clone()));

        state.replace_messages("t-1", vec![msg("a", 2), msg("b", 3), msg("a", 2)]);

        let contents: Vec<&str> = state.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["a", "b", "in flight"]);
        assert!(state.messages[2].pending);
        assert_eq!(state.dedup.len("t-1"), 3);
    }

    #[test]
    fn test_in_flight_survives_deselect() {
        let mut state = selected_state();
        let pending = Message::optimistic("t-1", "in flight");
        let local_id = pending.local_id.unwrap();
        state.begin_send(pending);

        state.selected = Some("t-2".to_string());
        state.dedup.reset("t-1");
        state.replace_messages("t-2", vec![]);
        assert!(state.messages.is_empty());

        state.selected = Some("t-1".to_string());
        state.replace_messages("t-1", vec![msg("cached", 1)]);
        assert_eq!(state.messages.len(), 2);
        assert!(state.messages[1].pending);

        state.end_send("t-1", local_id);
        assert!(state.in_flight.is_empty());
    }

    #[test]
    fn test_admit_background_seeds_from_cache() {
        let mut state = selected_state();
        let cached = vec![msg("seen", 1)];

        assert!(state
            .admit_background("t-2", cached.clone(), msg("seen", 1))
            .is_none());
        let updated = state
            .admit_background("t-2", cached, msg("new", 2))
            .unwrap();
        assert_eq!(updated.len(), 2);
        assert!(state
            .admit_background("t-2", updated, msg("new", 2))
            .is_none());
    }

    #[test]
    fn test_snapshot_selected_thread() {
        let state = selected_state();
        let snapshot = state.to_snapshot(ConnectionState::Connected, true);
        assert_eq!(snapshot.selected_thread().unwrap().subject, "Help");
        assert!(snapshot.admin_is_typing);
        assert!(!snapshot.has_pending());

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["connectionState"], "connected");
        assert_eq!(json["selectedThreadId"], "t-1");
    }
}
