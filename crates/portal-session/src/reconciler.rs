use portal_core::ids::MessageId;
use portal_core::messages::{ChatMessage, Citation, ContextUsed, Message, Role};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryState {
    /// Shown locally, write not yet confirmed.
    Optimistic,
    /// Assistant reply still receiving content.
    Streaming,
    /// Stream ended; write pending or failed.
    Completed,
    /// Durable id swapped in.
    Persisted,
}

#[derive(Clone, Debug)]
pub struct Entry {
    key: MessageId,
    pub message: Message,
    pub state: EntryState,
}

impl Entry {
    /// The id the entry was inserted with. Stable across the id swap.
    pub fn key(&self) -> &MessageId {
        &self.key
    }

    pub fn is_temporary(&self) -> bool {
        self.state != EntryState::Persisted
    }
}

/// The displayed message list.
///
/// Entries never move: transitions only replace an entry's id, content, or
/// terminal fields. Lookups accept either the insertion key or the current id.
#[derive(Debug, Default)]
pub struct MessageReconciler {
    entries: Vec<Entry>,
}

impl MessageReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the list with already persisted history.
    pub fn replace_all(&mut self, messages: Vec<Message>) {
        self.entries = messages
            .into_iter()
            .map(|message| Entry {
                key: message.id.clone(),
                message,
                state: EntryState::Persisted,
            })
            .collect();
    }

    pub fn insert_optimistic(&mut self, message: Message) -> usize {
        self.push(message, EntryState::Optimistic)
    }

    /// Empty assistant entry shown while the reply streams in.
    pub fn insert_placeholder(&mut self, message: Message) -> usize {
        self.push(message, EntryState::Streaming)
    }

    fn push(&mut self, message: Message, state: EntryState) -> usize {
        self.entries.push(Entry {
            key: message.id.clone(),
            message,
            state,
        });
        self.entries.len() - 1
    }

    pub fn position(&self, id: &MessageId) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.key == *id || e.message.id == *id)
    }

    pub fn get(&self, id: &MessageId) -> Option<&Entry> {
        self.position(id).map(|i| &self.entries[i])
    }

    /// Apply a content flush to a streaming entry.
    pub fn update_content(
        &mut self,
        id: &MessageId,
        content: &str,
        citations: &[Citation],
        contexts: &[ContextUsed],
    ) -> bool {
        let Some(entry) = self.entry_mut(id) else {
            return false;
        };
        if entry.state != EntryState::Streaming {
            return false;
        }
        entry.message.content.clear();
        entry.message.content.push_str(content);
        entry.message.citations = citations.to_vec();
        entry.message.contexts_used = contexts.to_vec();
        true
    }

    pub fn update<F: FnOnce(&mut Message)>(&mut self, id: &MessageId, f: F) -> bool {
        match self.entry_mut(id) {
            Some(entry) => {
                f(&mut entry.message);
                true
            }
            None => false,
        }
    }

    /// The stream ended normally.
    pub fn mark_completed(&mut self, id: &MessageId) -> bool {
        match self.entry_mut(id) {
            Some(entry) if entry.state == EntryState::Streaming => {
                entry.state = EntryState::Completed;
                true
            }
            _ => false,
        }
    }

    /// Swap in the durable id. Returns false when the entry is gone (rolled
    /// back) or still streaming. Repeating a swap is a no-op.
    pub fn confirm(&mut self, id: &MessageId, durable: MessageId) -> bool {
        let Some(entry) = self.entry_mut(id) else {
            return false;
        };
        match entry.state {
            EntryState::Optimistic | EntryState::Completed => {
                entry.message.id = durable;
                entry.state = EntryState::Persisted;
                true
            }
            EntryState::Persisted => entry.message.id == durable,
            EntryState::Streaming => false,
        }
    }

    /// Remove an entry outright.
    pub fn rollback(&mut self, id: &MessageId) -> Option<Message> {
        self.position(id).map(|i| self.entries.remove(i).message)
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn messages(&self) -> Vec<Message> {
        self.entries.iter().map(|e| e.message.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Wire history for the next request. Empty assistant placeholders are
    /// left out.
    pub fn history(&self) -> Vec<ChatMessage> {
        self.entries
            .iter()
            .filter(|e| !(e.message.role == Role::Assistant && e.message.content.is_empty()))
            .map(|e| e.message.to_chat())
            .collect()
    }

    fn entry_mut(&mut self, id: &MessageId) -> Option<&mut Entry> {
        self.entries
            .iter_mut()
            .find(|e| e.key == *id || e.message.id == *id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_core::ids::ConversationId;

    fn msg(role: Role, content: &str) -> Message {
        Message::new(
            MessageId::temporary(),
            Some(ConversationId::from_raw("conv_1")),
            role,
            content,
        )
    }

    #[test]
    fn swap_preserves_length_order_and_content() {
        let mut r = MessageReconciler::new();
        let user = msg(Role::User, "What is 2+2?");
        let assistant = msg(Role::Assistant, "");
        let user_key = user.id.clone();
        let assistant_key = assistant.id.clone();
        let _ = r.insert_optimistic(user);
        let _ = r.insert_placeholder(assistant);
        assert!(r.update_content(&assistant_key, "4", &[], &[]));
        assert!(r.mark_completed(&assistant_key));

        let before: Vec<_> = r.messages().iter().map(|m| m.content.clone()).collect();
        assert!(r.confirm(&assistant_key, MessageId::from_raw("msg_2")));
        assert!(r.confirm(&user_key, MessageId::from_raw("msg_1")));
        let after: Vec<_> = r.messages().iter().map(|m| m.content.clone()).collect();

        assert_eq!(before, after);
        assert_eq!(r.len(), 2);
        assert_eq!(r.entries()[0].message.id.as_str(), "msg_1");
        assert_eq!(r.entries()[1].message.id.as_str(), "msg_2");
        assert!(r.entries().iter().all(|e| !e.is_temporary()));
    }

    #[test]
    fn confirm_is_idempotent() {
        let mut r = MessageReconciler::new();
        let user = msg(Role::User, "hi");
        let key = user.id.clone();
        let _ = r.insert_optimistic(user);
        let durable = MessageId::from_raw("msg_9");
        assert!(r.confirm(&key, durable.clone()));
        assert!(r.confirm(&key, durable.clone()));
        assert!(r.confirm(&durable, durable.clone()));
        assert_eq!(r.len(), 1);
        assert_eq!(r.get(&key).unwrap().key(), &key);
    }

    #[test]
    fn confirm_after_rollback_reports_missing() {
        let mut r = MessageReconciler::new();
        let assistant = msg(Role::Assistant, "");
        let key = assistant.id.clone();
        let _ = r.insert_placeholder(assistant);
        assert!(r.update_content(&key, "Hello wor", &[], &[]));
        let removed = r.rollback(&key).unwrap();
        assert_eq!(removed.content, "Hello wor");
        assert!(r.is_empty());
        assert!(!r.confirm(&key, MessageId::from_raw("msg_late")));
    }

    #[test]
    fn streaming_entry_cannot_be_confirmed() {
        let mut r = MessageReconciler::new();
        let assistant = msg(Role::Assistant, "");
        let key = assistant.id.clone();
        let _ = r.insert_placeholder(assistant);
        assert!(!r.confirm(&key, MessageId::from_raw("msg_1")));
        assert_eq!(r.get(&key).unwrap().state, EntryState::Streaming);
    }

    #[test]
    fn completed_entry_ignores_late_flushes() {
        let mut r = MessageReconciler::new();
        let assistant = msg(Role::Assistant, "");
        let key = assistant.id.clone();
        let _ = r.insert_placeholder(assistant);
        assert!(r.update_content(&key, "4", &[], &[]));
        assert!(r.mark_completed(&key));
        assert!(!r.update_content(&key, "stale", &[], &[]));
        assert_eq!(r.get(&key).unwrap().message.content, "4");
    }

    #[test]
    fn history_skips_empty_placeholder() {
        let mut r = MessageReconciler::new();
        let _ = r.insert_optimistic(msg(Role::User, "What is 2+2?"));
        let _ = r.insert_placeholder(msg(Role::Assistant, ""));
        let history = r.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "What is 2+2?");
    }

    #[test]
    fn replace_all_marks_history_persisted() {
        let mut r = MessageReconciler::new();
        let _ = r.insert_optimistic(msg(Role::User, "draft"));
        r.replace_all(vec![
            Message::new(MessageId::from_raw("msg_1"), None, Role::User, "old question"),
            Message::new(MessageId::from_raw("msg_2"), None, Role::Assistant, "old answer"),
        ]);
        assert_eq!(r.len(), 2);
        assert!(r.entries().iter().all(|e| e.state == EntryState::Persisted));
        assert_eq!(r.position(&MessageId::from_raw("msg_2")), Some(1));
    }
}
