//! In-memory message log for a chat session
//!
//! The store is append-only. Every append is fanned out to all live observers
//! as a full snapshot of the sequence; nothing is persisted.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::Stream;
use tokio::sync::mpsc;

use crate::conversation::{Message, Snapshot};

struct Inner {
    messages: Vec<Message>,
    observers: Vec<mpsc::UnboundedSender<Snapshot>>,
    closed: bool,
}

impl Inner {
    fn snapshot(&self) -> Snapshot {
        Arc::from(self.messages.as_slice())
    }
}

/// Ordered, observable log of the messages in one session
pub struct MessageStore {
    inner: Mutex<Inner>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                messages: Vec::new(),
                observers: Vec::new(),
                closed: false,
            }),
        }
    }

    // Critical sections never panic, so a poisoned lock still holds a consistent log.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a message and notify every observer with the updated sequence.
    ///
    /// Appends to a closed store are dropped.
    pub fn append(&self, message: Message) {
        let mut inner = self.lock();
        if inner.closed {
            tracing::debug!(id = %message.id(), "Discarding message for closed session");
            return;
        }

        inner.messages.push(message);
        let snapshot = inner.snapshot();
        inner
            .observers
            .retain(|tx| tx.send(Arc::clone(&snapshot)).is_ok());
    }

    /// Subscribe to the message sequence.
    ///
    /// The stream yields the current sequence immediately, then one snapshot
    /// per subsequent append. It ends when the store is closed.
    pub fn observe(&self) -> impl Stream<Item = Snapshot> + Send + 'static {
        let (tx, mut rx) = mpsc::unbounded_channel();

        {
            // Registration happens under the same lock as the initial send so
            // no append can slip in between the two.
            let mut inner = self.lock();
            let _ = tx.send(inner.snapshot());
            if !inner.closed {
                inner.observers.push(tx);
            }
        }

        async_stream::stream! {
            while let Some(snapshot) = rx.recv().await {
                yield snapshot;
            }
        }
    }

    /// Current sequence without subscribing
    pub fn snapshot(&self) -> Snapshot {
        self.lock().snapshot()
    }

    pub fn len(&self) -> usize {
        self.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// End the session: later appends are discarded and observer streams finish.
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        inner.observers.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Author;
    use futures::StreamExt;

    fn texts(snapshot: &Snapshot) -> Vec<&str> {
        snapshot.iter().map(|m| m.text()).collect()
    }

    #[tokio::test]
    async fn test_observe_yields_appends_in_order() {
        let store = MessageStore::new();
        for text in ["one", "two", "three", "four"] {
            store.append(Message::user(text));
        }

        let mut stream = Box::pin(store.observe());
        let first = stream.next().await.unwrap();
        assert_eq!(texts(&first), vec!["one", "two", "three", "four"]);
    }

    #[tokio::test]
    async fn test_late_subscriber_receives_history_first() {
        let store = MessageStore::new();
        store.append(Message::user("Hello"));
        store.append(Message::assistant("Hi there!"));

        let mut stream = Box::pin(store.observe());
        store.append(Message::user("How are you?"));

        let history = stream.next().await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].author(), Author::Assistant);

        let next = stream.next().await.unwrap();
        assert_eq!(texts(&next), vec!["Hello", "Hi there!", "How are you?"]);
    }

    #[tokio::test]
    async fn test_every_append_is_delivered() {
        let store = MessageStore::new();
        let mut stream = Box::pin(store.observe());

        store.append(Message::user("a"));
        store.append(Message::assistant("b"));
        store.append(Message::user("c"));

        let mut lengths = Vec::new();
        for _ in 0..4 {
            lengths.push(stream.next().await.unwrap().len());
        }
        assert_eq!(lengths, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_close_ends_streams_and_discards_appends() {
        let store = MessageStore::new();
        store.append(Message::user("before"));
        let mut stream = Box::pin(store.observe());
        assert_eq!(stream.next().await.unwrap().len(), 1);

        store.close();
        store.append(Message::assistant("late reply"));

        assert!(stream.next().await.is_none());
        assert_eq!(store.len(), 1);
        assert!(store.is_closed());
    }

    #[tokio::test]
    async fn test_dropped_observers_are_pruned() {
        let store = MessageStore::new();
        let stream = store.observe();
        drop(stream);

        store.append(Message::user("ping"));
        assert!(store.lock().observers.is_empty());
    }

    #[test]
    fn test_snapshot_without_observers() {
        let store = MessageStore::new();
        assert!(store.is_empty());
        store.append(Message::user("x"));
        assert_eq!(texts(&store.snapshot()), vec!["x"]);
    }
}
