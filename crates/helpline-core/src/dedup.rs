//! Message identity and deduplication
//!
//! A message is identified by its (sender, content, timestamp) triple. The
//! same message can reach us three ways: the per-thread REST fetch, a
//! `new_message` push and our own optimistic write. Every append goes
//! through [`DedupIndex::try_admit`] so each signature is inserted once.

use std::collections::{HashMap, HashSet};

use crate::models::Message;

/// Deterministic signature of a message
///
/// Content goes last so separators inside it cannot make two different
/// triples collide.
pub fn signature(message: &Message) -> String {
    format!(
        "{}|{}|{}",
        message.sender,
        message.timestamp_iso(),
        message.content
    )
}

/// Per-thread sets of admitted signatures
#[derive(Debug, Default)]
pub struct DedupIndex {
    threads: HashMap<String, HashSet<String>>,
}

impl DedupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the message unless its signature was already admitted
    ///
    /// Returns `false` (and changes nothing) for a duplicate.
    pub fn try_admit(&mut self, thread_id: &str, message: &Message) -> bool {
        self.threads
            .entry(thread_id.to_string())
            .or_default()
            .insert(signature(message))
    }

    /// Whether the message's signature is already admitted
    pub fn contains(&self, thread_id: &str, message: &Message) -> bool {
        self.threads
            .get(thread_id)
            .is_some_and(|set| set.contains(&signature(message)))
    }

    /// Drop a single signature (rollback or confirmation replacement)
    pub fn forget(&mut self, thread_id: &str, message: &Message) -> bool {
        self.threads
            .get_mut(thread_id)
            .is_some_and(|set| set.remove(&signature(message)))
    }

    /// Whether a set exists for the thread
    pub fn tracks(&self, thread_id: &str) -> bool {
        self.threads.contains_key(thread_id)
    }

    /// Clear a thread's set
    pub fn reset(&mut self, thread_id: &str) {
        self.threads.remove(thread_id);
    }

    /// Rebuild a thread's set from scratch, returning only the admitted messages
    ///
    /// Used whenever a thread's full message list is replaced.
    pub fn rebuild<I>(&mut self, thread_id: &str, messages: I) -> Vec<Message>
    where
        I: IntoIterator<Item = Message>,
    {
        self.reset(thread_id);
        messages
            .into_iter()
            .filter(|m| self.try_admit(thread_id, m))
            .collect()
    }

    pub fn len(&self, thread_id: &str) -> usize {
        self.threads.get(thread_id).map_or(0, HashSet::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Sender;
    use chrono::{TimeZone, Utc};

    fn msg(sender: Sender, content: &str, secs: u32) -> Message {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, secs).unwrap();
        Message::new("t-1", sender, content, ts)
    }

    #[test]
    fn test_signature_is_deterministic() {
        let a = msg(Sender::User, "hello", 1);
        let b = msg(Sender::User, "hello", 1);
        assert_eq!(signature(&a), signature(&b));
        assert_eq!(signature(&a), "user|2024-05-01T12:00:01Z|hello");
    }

    #[test]
    fn test_signature_ignores_transient_fields() {
        let confirmed = msg(Sender::User, "hello", 1);
        let mut flagged = confirmed.clone();
        flagged.pending = true;
        flagged.local_id = Some(uuid::Uuid::new_v4());
        assert_eq!(signature(&confirmed), signature(&flagged));
    }

    #[test]
    fn test_signature_distinguishes_each_field() {
        let base = msg(Sender::User, "hello", 1);
        assert_ne!(signature(&base), signature(&msg(Sender::Agent, "hello", 1)));
        assert_ne!(signature(&base), signature(&msg(Sender::User, "hello!", 1)));
        assert_ne!(signature(&base), signature(&msg(Sender::User, "hello", 2)));
    }

    #[test]
    fn test_try_admit_rejects_duplicates() {
        let mut index = DedupIndex::new();
        let m = msg(Sender::Agent, "hi", 3);

        assert!(index.try_admit("t-1", &m));
        assert!(!index.try_admit("t-1", &m));
        assert!(!index.try_admit("t-1", &m.clone()));
        assert_eq!(index.len("t-1"), 1);
    }

    #[test]
    fn test_sets_are_per_thread() {
        let mut index = DedupIndex::new();
        let m = msg(Sender::Agent, "hi", 3);

        assert!(index.try_admit("t-1", &m));
        assert!(index.try_admit("t-2", &m));
        assert!(index.contains("t-2", &m));
    }

    #[test]
    fn test_forget_allows_readmission() {
        let mut index = DedupIndex::new();
        let m = msg(Sender::User, "retry", 4);

        index.try_admit("t-1", &m);
        assert!(index.forget("t-1", &m));
        assert!(!index.forget("t-1", &m));
        assert!(index.try_admit("t-1", &m));
    }

    #[test]
    fn test_rebuild_drops_duplicates_and_replaces_set() {
        let mut index = DedupIndex::new();
        let stale = msg(Sender::System, "old", 0);
        index.try_admit("t-1", &stale);

        let a = msg(Sender::User, "a", 1);
        let b = msg(Sender::Agent, "b", 2);
        let admitted = index.rebuild("t-1", vec![a.clone(), b.clone(), a.clone()]);

        assert_eq!(admitted, vec![a, b]);
        assert_eq!(index.len("t-1"), 2);
        assert!(!index.contains("t-1", &stale));
    }
}
