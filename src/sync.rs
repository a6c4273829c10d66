//! Client-side synchronization
//!
//! Each client keeps a local copy of its conversation list and of the open
//! conversation's messages. A background task polls the server on a fixed
//! interval and folds the results into that copy:
//!
//! - the conversation list is replaced only when it differs structurally
//! - messages are merged by id, so a record is never present twice
//! - an already-known message only ever picks up a read-flag transition;
//!   text, sender and timestamp are immutable once seen
//! - the merged list is kept sorted by `(created_at, id)`
//!
//! The merge is transport independent: a push channel could feed the same
//! [`merge_messages`] function instead of the poll loop.
//!
//! Failed polls are dropped for that tick. User-initiated operations on
//! [`ChatSession`] always report their failures.

use crate::{
    conversation::{self, ConversationSummary, LastMessage},
    messaging,
    pager::{self, MessagePage},
    storage::{DirectMessage, Settings, Storage, UserId},
    Error, Result,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch, Mutex, RwLock, RwLockWriteGuard};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Interval between polls when none is configured
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Number of newest messages fetched for the open conversation on each poll
pub const DEFAULT_POLL_SLICE: usize = 10;

/// Server operations a client needs, bound to one authenticated viewer
pub trait MessagesApi: Send + Sync + 'static {
    /// The viewer every call acts on behalf of
    fn viewer(&self) -> UserId;

    /// Conversation summaries, most recent first
    fn conversations(&self) -> impl Future<Output = Result<Vec<ConversationSummary>>> + Send;

    /// One page of a conversation; acknowledges the counterpart's messages
    fn messages(
        &self,
        counterpart: &UserId,
        page: usize,
        page_size: usize,
    ) -> impl Future<Output = Result<MessagePage>> + Send;

    /// Send a text message
    fn send(&self, receiver: &UserId, text: &str) -> impl Future<Output = Result<DirectMessage>> + Send;

    /// Acknowledge the counterpart's unread messages
    fn mark_read(&self, counterpart: &UserId) -> impl Future<Output = Result<usize>> + Send;

    /// Remove the whole conversation
    fn delete_conversation(&self, counterpart: &UserId) -> impl Future<Output = Result<usize>> + Send;

    /// Resolve a conversation summary before opening it
    fn start_conversation(
        &self,
        counterpart: &UserId,
    ) -> impl Future<Output = Result<ConversationSummary>> + Send;
}

/// In-process API over a shared store
#[derive(Clone)]
pub struct LocalApi {
    store: Arc<Mutex<Storage>>,
    viewer: UserId,
    max_page_size: usize,
}

impl LocalApi {
    /// Create an API acting as `viewer`
    pub fn new(store: Arc<Mutex<Storage>>, viewer: UserId) -> Self {
        Self {
            store,
            viewer,
            max_page_size: pager::MAX_PAGE_SIZE,
        }
    }

    /// Override the page size bound
    pub fn with_max_page_size(mut self, max_page_size: usize) -> Self {
        self.max_page_size = max_page_size;
        self
    }
}

impl MessagesApi for LocalApi {
    fn viewer(&self) -> UserId {
        self.viewer
    }

    async fn conversations(&self) -> Result<Vec<ConversationSummary>> {
        let store = self.store.lock().await;
        conversation::list_conversations(&store, &*store, &self.viewer)
    }

    async fn messages(&self, counterpart: &UserId, page: usize, page_size: usize) -> Result<MessagePage> {
        let store = self.store.lock().await;
        pager::page_bounded(
            &store,
            &*store,
            &self.viewer,
            counterpart,
            page,
            page_size,
            self.max_page_size,
        )
    }

    async fn send(&self, receiver: &UserId, text: &str) -> Result<DirectMessage> {
        let store = self.store.lock().await;
        messaging::send(&store, &*store, &self.viewer, receiver, text)
    }

    async fn mark_read(&self, counterpart: &UserId) -> Result<usize> {
        let store = self.store.lock().await;
        messaging::mark_read(&store, &self.viewer, counterpart)
    }

    async fn delete_conversation(&self, counterpart: &UserId) -> Result<usize> {
        let store = self.store.lock().await;
        messaging::delete_conversation(&store, &self.viewer, counterpart)
    }

    async fn start_conversation(&self, counterpart: &UserId) -> Result<ConversationSummary> {
        let store = self.store.lock().await;
        conversation::start_conversation(&store, &*store, &self.viewer, counterpart)
    }
}

/// Local view state of one client session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientState {
    /// Conversation summaries, most recent first
    pub conversations: Vec<ConversationSummary>,
    /// Counterpart of the conversation currently open, if any
    pub open_conversation: Option<UserId>,
    /// Messages of the open conversation, oldest first
    pub messages: Vec<DirectMessage>,
    /// Whether older history can still be loaded
    pub has_more: bool,
    /// Highest history page loaded so far
    pub current_page: usize,
}

impl ClientState {
    /// Summary for a counterpart
    pub fn conversation(&self, counterpart: &UserId) -> Option<&ConversationSummary> {
        self.conversations
            .iter()
            .find(|c| c.counterpart_id == *counterpart)
    }

    /// Total unread count across all conversations
    pub fn total_unread(&self) -> usize {
        self.conversations.iter().map(|c| c.unread_count).sum()
    }

    /// Conversations whose counterpart name, username or last message text
    /// contains `query`, ignoring case
    ///
    /// A blank query matches every conversation.
    pub fn filter_conversations(&self, query: &str) -> Vec<&ConversationSummary> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return self.conversations.iter().collect();
        }

        let matches = |field: &str| field.to_lowercase().contains(&query);
        self.conversations
            .iter()
            .filter(|c| {
                matches(&c.counterpart.name)
                    || matches(&c.counterpart.username)
                    || c.last_message.as_ref().is_some_and(|m| matches(&m.text))
            })
            .collect()
    }

    /// Replace the conversation list if it differs; returns whether it did
    pub fn apply_conversations(&mut self, fetched: Vec<ConversationSummary>) -> bool {
        if self.conversations == fetched {
            return false;
        }
        self.conversations = fetched;
        true
    }

    /// Insert or replace one summary and restore most-recent-first order
    pub fn upsert_conversation(&mut self, summary: ConversationSummary) {
        match self
            .conversations
            .iter_mut()
            .find(|c| c.counterpart_id == summary.counterpart_id)
        {
            Some(existing) => *existing = summary,
            None => self.conversations.push(summary),
        }
        self.conversations
            .sort_by(|a, b| b.last_activity().cmp(&a.last_activity()));
    }

    fn open(&mut self, counterpart: UserId) {
        self.open_conversation = Some(counterpart);
        self.messages.clear();
        self.has_more = false;
        self.current_page = 0;
    }

    fn close(&mut self) {
        self.open_conversation = None;
        self.messages.clear();
        self.has_more = false;
        self.current_page = 0;
    }
}

/// What a merge changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Messages that were not present before
    pub inserted: usize,
    /// Known messages whose read flag flipped to true
    pub read_updates: usize,
}

impl MergeOutcome {
    /// Whether anything visible changed
    pub fn changed(&self) -> bool {
        self.inserted > 0 || self.read_updates > 0
    }
}

/// Merge fetched messages into a local list
///
/// Keyed by message id: unknown ids are inserted, known ids only take a
/// read-flag transition from false to true. The list is re-sorted by
/// `(created_at, id)` when anything was inserted. Merging the same input
/// twice changes nothing the second time.
pub fn merge_messages<I>(local: &mut Vec<DirectMessage>, fetched: I) -> MergeOutcome
where
    I: IntoIterator<Item = DirectMessage>,
{
    let mut index: HashMap<i64, usize> = local
        .iter()
        .enumerate()
        .map(|(i, m)| (m.id, i))
        .collect();
    let mut outcome = MergeOutcome::default();

    for message in fetched {
        match index.get(&message.id) {
            Some(&i) => {
                // Read flags never go back to false; a stale poll must not undo a receipt
                if message.read && !local[i].read {
                    local[i].read = true;
                    outcome.read_updates += 1;
                }
            }
            None => {
                index.insert(message.id, local.len());
                local.push(message);
                outcome.inserted += 1;
            }
        }
    }

    if outcome.inserted > 0 {
        local.sort_by_key(|m| m.order_key());
    }
    outcome
}

/// Where the poll loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Waiting for the next tick
    Idle,
    /// Requests in flight
    Polling,
    /// Folding results into local state
    Merging,
}

/// Result of one poll
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickOutcome {
    /// Whether the conversation list was replaced
    pub conversations_changed: bool,
    /// Changes to the open conversation's messages
    pub merge: MergeOutcome,
}

impl TickOutcome {
    /// Whether rendered state changed
    pub fn changed(&self) -> bool {
        self.conversations_changed || self.merge.changed()
    }
}

struct SyncShared {
    state: RwLock<ClientState>,
    revision: watch::Sender<u64>,
    phase: watch::Sender<SyncPhase>,
    // Incremented under the state write lock by every session-side change
    local_edits: AtomicU64,
}

impl SyncShared {
    fn bump(&self) {
        self.revision.send_modify(|r| *r += 1);
    }

    /// Write access for a session-side change
    async fn edit(&self) -> RwLockWriteGuard<'_, ClientState> {
        let state = self.state.write().await;
        self.local_edits.fetch_add(1, Ordering::SeqCst);
        state
    }
}

/// Polls the server and merges results into local state
pub struct Reconciler<A: MessagesApi> {
    api: Arc<A>,
    shared: Arc<SyncShared>,
    slice_size: usize,
}

impl<A: MessagesApi> Clone for Reconciler<A> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
            shared: Arc::clone(&self.shared),
            slice_size: self.slice_size,
        }
    }
}

impl<A: MessagesApi> Reconciler<A> {
    /// Create a reconciler with empty local state
    pub fn new(api: Arc<A>) -> Self {
        let (revision, _) = watch::channel(0);
        let (phase, _) = watch::channel(SyncPhase::Idle);
        Self {
            api,
            shared: Arc::new(SyncShared {
                state: RwLock::new(ClientState::default()),
                revision,
                phase,
                local_edits: AtomicU64::new(0),
            }),
            slice_size: DEFAULT_POLL_SLICE,
        }
    }

    /// Set how many recent messages each poll fetches for the open conversation
    pub fn with_slice_size(mut self, slice_size: usize) -> Self {
        self.slice_size = slice_size.max(1);
        self
    }

    /// The API this reconciler polls
    pub fn api(&self) -> &Arc<A> {
        &self.api
    }

    /// Copy of the current local state
    pub async fn snapshot(&self) -> ClientState {
        self.shared.state.read().await.clone()
    }

    /// Current loop phase
    pub fn phase(&self) -> SyncPhase {
        *self.shared.phase.borrow()
    }

    /// Revision counter that increments whenever rendered state changes
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.shared.revision.subscribe()
    }

    /// Current revision
    pub fn revision(&self) -> u64 {
        *self.shared.revision.borrow()
    }

    /// Run one Idle → Polling → Merging → Idle pass
    pub async fn tick(&self) -> Result<TickOutcome> {
        self.shared.phase.send_replace(SyncPhase::Polling);
        let result = self.poll_and_merge().await;
        self.shared.phase.send_replace(SyncPhase::Idle);
        result
    }

    async fn poll_and_merge(&self) -> Result<TickOutcome> {
        let edits_before = self.shared.local_edits.load(Ordering::SeqCst);
        let conversations = self.api.conversations().await?;

        let open = self.shared.state.read().await.open_conversation;
        let slice = match open {
            Some(counterpart) => Some((
                counterpart,
                self.api.messages(&counterpart, 1, self.slice_size).await?,
            )),
            None => None,
        };

        self.shared.phase.send_replace(SyncPhase::Merging);
        let mut state = self.shared.state.write().await;

        // A local send or open during the fetch is newer than the fetched list
        let conversations_changed =
            if self.shared.local_edits.load(Ordering::SeqCst) == edits_before {
                state.apply_conversations(conversations)
            } else {
                debug!("Keeping locally edited conversation list until the next poll");
                false
            };

        let mut merge = MergeOutcome::default();
        if let Some((counterpart, page)) = slice {
            // The user may have switched conversations while the request was in flight
            if state.open_conversation == Some(counterpart) {
                merge = merge_messages(&mut state.messages, page.messages);
            } else {
                debug!("Discarding poll result for closed conversation {}", counterpart);
            }
        }
        drop(state);

        let outcome = TickOutcome {
            conversations_changed,
            merge,
        };
        if outcome.changed() {
            self.shared.bump();
        }
        Ok(outcome)
    }

    /// Run a tick, logging and dropping any failure
    async fn tick_logged(&self) {
        match self.tick().await {
            Ok(outcome) if outcome.changed() => {
                debug!(
                    "Sync tick: conversations_changed={} inserted={} read_updates={}",
                    outcome.conversations_changed, outcome.merge.inserted, outcome.merge.read_updates
                );
            }
            Ok(_) => {}
            Err(e) if e.is_transient() => {
                debug!("Sync tick dropped: {}", e);
            }
            Err(e) => {
                warn!("Sync tick failed: {}", e);
            }
        }
    }

    /// Start polling every `period` on the current tokio runtime
    ///
    /// The first poll happens one period after the call. The task runs until
    /// the returned handle is cancelled or dropped.
    pub fn spawn(&self, period: Duration) -> SyncHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let reconciler = self.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    // Also fires when the handle is dropped
                    _ = &mut shutdown_rx => break,
                    _ = async {
                        ticker.tick().await;
                        reconciler.tick_logged().await;
                    } => {}
                }
            }

            reconciler.shared.phase.send_replace(SyncPhase::Idle);
            debug!("Sync loop for {} stopped", reconciler.api.viewer());
        });

        info!("Sync loop started for {} every {:?}", self.api.viewer(), period);
        SyncHandle {
            shutdown: Some(shutdown_tx),
            task,
        }
    }
}

/// Handle to a running poll loop
///
/// Dropping the handle stops the loop as well; [`SyncHandle::cancel`]
/// additionally waits for it to finish.
pub struct SyncHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    /// Stop the loop, interrupting an in-flight poll, and wait for it to exit
    pub async fn cancel(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Err(e) = (&mut self.task).await {
            if !e.is_cancelled() {
                warn!("Sync loop ended abnormally: {}", e);
            }
        }
    }

    /// Whether the loop has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// One client's messaging session
///
/// Wraps a [`Reconciler`] with the user-initiated operations. Writes from the
/// same session are serialized so that rapid sends keep their order.
pub struct ChatSession<A: MessagesApi> {
    reconciler: Reconciler<A>,
    writes: Mutex<()>,
    page_size: usize,
    poll_interval: Duration,
}

impl<A: MessagesApi> ChatSession<A> {
    /// Create a session with default page and poll-slice sizes
    pub fn new(api: A) -> Self {
        Self {
            reconciler: Reconciler::new(Arc::new(api)),
            writes: Mutex::new(()),
            page_size: pager::DEFAULT_PAGE_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Create a session using the configured page size, slice size and poll interval
    pub fn with_settings(api: A, settings: &Settings) -> Self {
        let mut session = Self::new(api)
            .with_page_size(settings.effective_page_size(None))
            .with_slice_size(settings.poll_slice_size);
        session.poll_interval = settings.poll_interval();
        session
    }

    /// Set the history page size
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Set the poll slice size
    pub fn with_slice_size(mut self, slice_size: usize) -> Self {
        self.reconciler = self.reconciler.with_slice_size(slice_size);
        self
    }

    /// The underlying reconciler
    pub fn reconciler(&self) -> &Reconciler<A> {
        &self.reconciler
    }

    /// Copy of the current local state
    pub async fn snapshot(&self) -> ClientState {
        self.reconciler.snapshot().await
    }

    /// Configured interval between polls
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Start background polling
    pub fn start_sync(&self, period: Duration) -> SyncHandle {
        self.reconciler.spawn(period)
    }

    fn shared(&self) -> &SyncShared {
        &self.reconciler.shared
    }

    fn api(&self) -> &A {
        &self.reconciler.api
    }

    /// Load the conversation list
    pub async fn refresh_conversations(&self) -> Result<bool> {
        let conversations = self.api().conversations().await?;
        let changed = self
            .shared()
            .state
            .write()
            .await
            .apply_conversations(conversations);
        if changed {
            self.shared().bump();
        }
        Ok(changed)
    }

    /// Open a conversation and load its newest page
    ///
    /// Loading the page acknowledges the counterpart's messages, so the local
    /// unread count for the conversation drops to zero.
    pub async fn open_conversation(&self, counterpart: &UserId) -> Result<MessagePage> {
        self.shared().edit().await.open(*counterpart);
        self.shared().bump();

        let page = self.api().messages(counterpart, 1, self.page_size).await?;

        let mut state = self.shared().edit().await;
        if state.open_conversation == Some(*counterpart) {
            merge_messages(&mut state.messages, page.messages.iter().cloned());
            state.has_more = page.has_more;
            state.current_page = 1;
            if let Some(summary) = state
                .conversations
                .iter_mut()
                .find(|c| c.counterpart_id == *counterpart)
            {
                summary.unread_count = 0;
            }
        }
        drop(state);
        self.shared().bump();
        Ok(page)
    }

    /// Resolve and open a conversation, adding it to the list if new
    pub async fn start_conversation(&self, counterpart: &UserId) -> Result<ConversationSummary> {
        let summary = self.api().start_conversation(counterpart).await?;
        {
            let mut state = self.shared().edit().await;
            if state.conversation(counterpart).is_none() {
                state.upsert_conversation(summary.clone());
            }
        }
        self.open_conversation(counterpart).await?;
        Ok(summary)
    }

    /// Close the open conversation (view teardown)
    pub async fn close_conversation(&self) {
        self.shared().edit().await.close();
        self.shared().bump();
    }

    /// Load the next older page of the open conversation
    ///
    /// Returns `None` when no conversation is open or there is nothing older.
    pub async fn load_older(&self) -> Result<Option<MergeOutcome>> {
        let (counterpart, next_page) = {
            let state = self.shared().state.read().await;
            match state.open_conversation {
                Some(c) if state.has_more => (c, state.current_page + 1),
                _ => return Ok(None),
            }
        };

        let page = self.api().messages(&counterpart, next_page, self.page_size).await?;

        let mut state = self.shared().edit().await;
        if state.open_conversation != Some(counterpart) {
            return Ok(None);
        }
        let outcome = merge_messages(&mut state.messages, page.messages);
        state.has_more = page.has_more;
        state.current_page = next_page;
        drop(state);

        self.shared().bump();
        Ok(Some(outcome))
    }

    /// Send a message and apply it locally right away
    ///
    /// The returned record is merged by id, so the poll that later fetches
    /// the same message does not duplicate it.
    pub async fn send(&self, receiver: &UserId, text: &str) -> Result<DirectMessage> {
        let _serialized = self.writes.lock().await;

        if text.trim().is_empty() {
            return Err(Error::Validation("Message text is required".to_string()));
        }
        let message = self.api().send(receiver, text).await?;

        {
            let mut state = self.shared().edit().await;
            if state.open_conversation == Some(*receiver) {
                merge_messages(&mut state.messages, [message.clone()]);
            }
            let unread_count = state
                .conversation(receiver)
                .map(|c| c.unread_count)
                .unwrap_or(0);
            state.upsert_conversation(ConversationSummary {
                counterpart_id: *receiver,
                counterpart: message.receiver.clone(),
                last_message: Some(LastMessage {
                    text: message.text.clone(),
                    created_at: message.created_at,
                    sender_id: message.sender_id(),
                }),
                unread_count,
            });
        }
        self.shared().bump();
        Ok(message)
    }

    /// Acknowledge a counterpart's messages and update local state
    pub async fn mark_read(&self, counterpart: &UserId) -> Result<usize> {
        let _serialized = self.writes.lock().await;

        let modified = self.api().mark_read(counterpart).await?;

        {
            let mut state = self.shared().edit().await;
            if let Some(summary) = state
                .conversations
                .iter_mut()
                .find(|c| c.counterpart_id == *counterpart)
            {
                summary.unread_count = 0;
            }
            for message in state
                .messages
                .iter_mut()
                .filter(|m| m.sender_id() == *counterpart)
            {
                message.read = true;
            }
        }
        self.shared().bump();
        Ok(modified)
    }

    /// Delete a conversation and drop it from local state
    pub async fn delete_conversation(&self, counterpart: &UserId) -> Result<usize> {
        let _serialized = self.writes.lock().await;

        let deleted = self.api().delete_conversation(counterpart).await?;

        {
            let mut state = self.shared().edit().await;
            state
                .conversations
                .retain(|c| c.counterpart_id != *counterpart);
            if state.open_conversation == Some(*counterpart) {
                state.close();
            }
        }
        self.shared().bump();
        Ok(deleted)
    }
}
