//! Chat session orchestration
//!
//! A [`ChatSession`] ties the message log to a reply fetcher:
//! 1. The user's text is appended immediately as a User message
//! 2. The text is queued for the session's turn worker
//! 3. The worker fetches the reply and appends it as an Assistant message
//!
//! Turns are handled one at a time, so replies land in submission order even
//! when the user submits again before the previous reply has arrived.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use futures::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

use crate::conversation::{Message, Snapshot};
use crate::providers::ReplyFetcher;

use super::store::MessageStore;

/// One live conversation, bounded by the lifetime of its screen
pub struct ChatSession {
    id: Uuid,
    store: Arc<MessageStore>,
    turns: mpsc::UnboundedSender<String>,
    worker: JoinHandle<()>,
}

impl ChatSession {
    /// Start a session. Must be called from within a Tokio runtime.
    pub fn new(fetcher: Arc<dyn ReplyFetcher>) -> Self {
        let id = Uuid::new_v4();
        let store = Arc::new(MessageStore::new());
        let (turns, queue) = mpsc::unbounded_channel();

        let worker = tokio::spawn(
            run_turns(Arc::clone(&store), fetcher, queue)
                .instrument(tracing::info_span!("chat_session", %id)),
        );

        tracing::debug!(%id, "Chat session started");

        Self {
            id,
            store,
            turns,
            worker,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Submit user text. The User message is appended before this returns;
    /// the Assistant reply follows asynchronously.
    pub fn send_message(&self, text: impl Into<String>) -> Message {
        let text = text.into();
        let message = Message::user(text.clone());
        self.store.append(message.clone());

        if self.turns.send(text).is_err() {
            tracing::debug!(id = %self.id, "Session closed, reply will not be fetched");
        }

        message
    }

    /// Live view of the message sequence
    pub fn observe(&self) -> impl Stream<Item = Snapshot> + Send + 'static {
        self.store.observe()
    }

    pub fn messages(&self) -> Snapshot {
        self.store.snapshot()
    }

    /// Tear the session down. In-flight replies are discarded.
    pub fn close(&self) {
        if self.store.is_closed() {
            return;
        }
        self.worker.abort();
        self.store.close();
        tracing::debug!(id = %self.id, "Chat session closed");
    }

    pub fn is_closed(&self) -> bool {
        self.store.is_closed()
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_turns(
    store: Arc<MessageStore>,
    fetcher: Arc<dyn ReplyFetcher>,
    mut queue: mpsc::UnboundedReceiver<String>,
) {
    while let Some(text) = queue.recv().await {
        let started = Instant::now();
        let reply = fetcher.fetch_reply(&text).await;

        if store.is_closed() {
            tracing::debug!("Discarding reply for closed session");
            break;
        }

        tracing::debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            reply_chars = reply.chars().count(),
            messages = store.len() + 1,
            "Reply received"
        );
        store.append(Message::assistant(reply));
    }
}

/// Holds the process's current chat session
pub struct SessionSlot {
    fetcher: Arc<dyn ReplyFetcher>,
    current: Mutex<Arc<ChatSession>>,
}

impl SessionSlot {
    /// Must be called from within a Tokio runtime.
    pub fn new(fetcher: Arc<dyn ReplyFetcher>) -> Self {
        let session = Arc::new(ChatSession::new(Arc::clone(&fetcher)));
        Self {
            fetcher,
            current: Mutex::new(session),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Arc<ChatSession>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn current(&self) -> Arc<ChatSession> {
        Arc::clone(&self.lock())
    }

    /// Close the current session and start an empty one
    pub fn reset(&self) -> Arc<ChatSession> {
        let fresh = Arc::new(ChatSession::new(Arc::clone(&self.fetcher)));
        let previous = std::mem::replace(&mut *self.lock(), Arc::clone(&fresh));
        previous.close();
        tracing::info!(previous = %previous.id(), current = %fresh.id(), "Chat session reset");
        fresh
    }
}
