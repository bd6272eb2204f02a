//! Message holder - the reconciliation engine
//!
//! Owns the authoritative in-memory ordered history for one chat: the
//! paged-in older history, the live snapshot region, and the set of
//! optimistic pending sends awaiting server acknowledgement. Every
//! operation returns the list of [`HistoryEvent`]s it produced; the
//! session dispatches those to registered listeners after releasing its
//! lock, so the holder itself stays a synchronous state machine that can
//! be exercised directly in tests.
//!
//! All mutation paths are idempotent with respect to replay: applying the
//! same payload twice yields the same observable history and produces no
//! duplicate events, because the transport may redeliver.

pub mod diff;

use tokio::sync::oneshot;
use tracing::debug;

use crate::message::{Message, SendError, SendStatus};
use diff::{diff_messages, EditOp};

/// A change to the reconciled history, in the order it was produced
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryEvent {
    /// A message appeared, after the given predecessor (`None` = first)
    Added {
        /// The new message
        message: Message,
        /// Its predecessor in the final history
        after: Option<Message>,
    },
    /// A message was removed
    Removed(Message),
    /// The whole history was cleared
    RemovedAll,
    /// A message's content changed in place
    Changed {
        /// Previous content
        old: Message,
        /// New content
        new: Message,
    },
}

/// Outcome of [`MessageHolder::begin_paging`]
#[derive(Debug)]
pub enum PagingTicket {
    /// No request was in flight for this anchor: the caller must perform
    /// the network call and feed the result to [`MessageHolder::complete_paging`]
    Start {
        /// Token identifying this in-flight request
        generation: u64,
        /// Resolves once the page has been applied (or the request failed)
        done: oneshot::Receiver<()>,
    },
    /// A request for the same anchor is already in flight: wait for it
    Join {
        /// Resolves once the shared page has been applied
        done: oneshot::Receiver<()>,
    },
}

struct PagingState {
    anchor: String,
    generation: u64,
    waiters: Vec<oneshot::Sender<()>>,
}

/// The reconciliation engine for one chat's message history
pub struct MessageHolder {
    /// Reconciled history: `[0, live_start)` is paged-in older history,
    /// `[live_start, ..)` is the live chat snapshot region plus pending sends
    history: Vec<Message>,
    live_start: usize,
    /// Client-side ids of optimistic entries awaiting acknowledgement
    pending: Vec<String>,
    /// True once the true start of history has been reached
    history_fully_loaded: bool,
    paging: Option<PagingState>,
    next_generation: u64,
}

impl MessageHolder {
    /// Create an empty holder
    pub fn new() -> Self {
        Self {
            history: Vec::new(),
            live_start: 0,
            pending: Vec::new(),
            history_fully_loaded: false,
            paging: None,
            next_generation: 0,
        }
    }

    /// The current reconciled history, oldest first
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Id of the oldest locally known message, the paging anchor
    pub fn oldest_id(&self) -> Option<&str> {
        self.history.first().map(|m| m.id.as_str())
    }

    /// Whether the true start of history has been paged in
    pub fn history_fully_loaded(&self) -> bool {
        self.history_fully_loaded
    }

    /// Messages strictly older than `cursor`, at most `count`, oldest first
    ///
    /// `cursor = None` reads from the newest end. A cursor that is no
    /// longer present reads as exhausted.
    pub fn messages_before(&self, cursor: Option<&str>, count: usize) -> Vec<Message> {
        let end = match cursor {
            None => self.history.len(),
            Some(id) => self
                .history
                .iter()
                .position(|m| m.id == id)
                .unwrap_or(0),
        };
        let start = end.saturating_sub(count);
        self.history[start..end].to_vec()
    }

    /// How many messages are held strictly older than `cursor`
    pub fn count_before(&self, cursor: Option<&str>) -> usize {
        match cursor {
            None => self.history.len(),
            Some(id) => self.history.iter().position(|m| m.id == id).unwrap_or(0),
        }
    }

    // ---- full snapshot reconciliation ----

    /// Reconcile a complete chat snapshot against the current history
    ///
    /// Called on session (re)connect and whenever the backend replaces the
    /// whole chat. The live region is diffed by id against the snapshot:
    /// entries only in the old live region are removed, entries only in
    /// the snapshot are added with their correct predecessor, entries in
    /// both with different content are changed. Paged-in older history is
    /// kept untouched, and optimistic pending sends not yet covered by the
    /// snapshot survive at the end of the history.
    pub fn receive_full_update(&mut self, snapshot: Vec<Message>) -> Vec<HistoryEvent> {
        let paged: Vec<Message> = self.history[..self.live_start].to_vec();
        let live_old: Vec<Message> = self.history[self.live_start..].to_vec();

        // Snapshot entries can overlap messages we already paged in; those
        // move into the diffed window so they are not re-reported as added.
        let mut paged_keep = Vec::new();
        let mut overlap = Vec::new();
        for message in paged {
            if snapshot.iter().any(|m| m.id == message.id) {
                overlap.push(message);
            } else {
                paged_keep.push(message);
            }
        }

        // Pending sends the snapshot does not know about yet stay visible.
        let surviving_pending: Vec<Message> = live_old
            .iter()
            .filter(|m| {
                m.is_pending()
                    && !snapshot.iter().any(|n| {
                        n.id == m.id
                            || (!m.client_side_id.is_empty()
                                && n.client_side_id == m.client_side_id)
                    })
            })
            .cloned()
            .collect();

        let mut old_window = overlap;
        old_window.extend(live_old);

        // A pending send the snapshot confirms under a fresh server id
        // must diff as an in-place change, not as removed-plus-added.
        for message in &mut old_window {
            if message.is_pending() && !message.client_side_id.is_empty() {
                if let Some(server_copy) = snapshot
                    .iter()
                    .find(|n| n.client_side_id == message.client_side_id)
                {
                    message.id = server_copy.id.clone();
                }
            }
        }

        let mut new_window = snapshot;
        new_window.extend(surviving_pending.iter().cloned());

        let ops = diff_messages(&old_window, &new_window);

        let live_start = paged_keep.len();
        let mut history = paged_keep;
        history.extend(new_window);
        self.history = history;
        self.live_start = live_start;
        self.pending
            .retain(|csid| surviving_pending.iter().any(|m| &m.client_side_id == csid));

        self.events_from_ops(ops)
    }

    // ---- incremental deltas ----

    /// Apply an "added" delta
    ///
    /// Insertion point is after the server-declared predecessor when that
    /// id is known locally; an unknown predecessor appends at the end to
    /// preserve total ordering. A delta matching a pending optimistic
    /// entry (same client-side id) replaces it in place instead of
    /// appending a duplicate. A delta whose id is already present is a
    /// no-op.
    pub fn receive_added(
        &mut self,
        message: Message,
        after_id: Option<&str>,
    ) -> Vec<HistoryEvent> {
        if !message.client_side_id.is_empty()
            && self.pending.iter().any(|c| c == &message.client_side_id)
        {
            let csid = message.client_side_id.clone();
            let index = self
                .history
                .iter()
                .position(|m| m.client_side_id == csid && m.is_pending());
            if let Some(index) = index {
                let old = self.history[index].clone();
                self.history[index] = message.clone();
                self.pending.retain(|c| c != &csid);
                return vec![HistoryEvent::Changed { old, new: message }];
            }
        }

        if self.history.iter().any(|m| m.id == message.id) {
            debug!("duplicate added delta for {} ignored", message.id);
            return Vec::new();
        }

        let index = match after_id.and_then(|id| self.history.iter().position(|m| m.id == id)) {
            Some(i) => i + 1,
            None => self.history.len(),
        };
        self.history.insert(index, message.clone());
        if index < self.live_start {
            self.live_start += 1;
        }
        let after = index.checked_sub(1).map(|i| self.history[i].clone());
        vec![HistoryEvent::Added { message, after }]
    }

    /// Apply a "changed" delta; unknown ids and identical content are no-ops
    pub fn receive_changed(&mut self, message: Message) -> Vec<HistoryEvent> {
        match self.history.iter().position(|m| m.id == message.id) {
            Some(index) => {
                let old = self.history[index].clone();
                if old == message {
                    return Vec::new();
                }
                self.history[index] = message.clone();
                vec![HistoryEvent::Changed { old, new: message }]
            }
            None => {
                debug!("changed delta for unknown message {} ignored", message.id);
                Vec::new()
            }
        }
    }

    /// Apply a "removed" delta; unknown ids are no-ops
    pub fn receive_removed(&mut self, id: &str) -> Vec<HistoryEvent> {
        match self.history.iter().position(|m| m.id == id) {
            Some(index) => {
                let removed = self.history.remove(index);
                if index < self.live_start {
                    self.live_start -= 1;
                }
                self.pending.retain(|c| c != &removed.client_side_id);
                vec![HistoryEvent::Removed(removed)]
            }
            None => {
                debug!("removed delta for unknown message {} ignored", id);
                Vec::new()
            }
        }
    }

    /// Apply a "removed all" delta: clears history and pending set
    /// atomically, notifying once. Clearing an already empty history is a
    /// no-op.
    pub fn receive_removed_all(&mut self) -> Vec<HistoryEvent> {
        if self.history.is_empty() && self.pending.is_empty() {
            return Vec::new();
        }
        self.history.clear();
        self.live_start = 0;
        self.pending.clear();
        vec![HistoryEvent::RemovedAll]
    }

    // ---- optimistic sends ----

    /// Append an optimistic pending message at the end of the history
    ///
    /// Re-appending the same client-side id is a no-op.
    pub fn append_pending(&mut self, message: Message) -> Vec<HistoryEvent> {
        if self.pending.iter().any(|c| c == &message.client_side_id) {
            return Vec::new();
        }
        self.pending.push(message.client_side_id.clone());
        let after = self.history.last().cloned();
        self.history.push(message.clone());
        vec![HistoryEvent::Added { message, after }]
    }

    /// Retract a pending message whose send failed
    ///
    /// The removal event carries the message tagged with the failure
    /// reason. Retracting an already reconciled or unknown entry is a
    /// no-op.
    pub fn retract_pending(
        &mut self,
        client_side_id: &str,
        reason: SendError,
    ) -> Vec<HistoryEvent> {
        if !self.pending.iter().any(|c| c == client_side_id) {
            return Vec::new();
        }
        self.pending.retain(|c| c != client_side_id);
        match self
            .history
            .iter()
            .position(|m| m.client_side_id == client_side_id && m.is_pending())
        {
            Some(index) => {
                let mut removed = self.history.remove(index);
                removed.send_status = SendStatus::Failed(reason);
                vec![HistoryEvent::Removed(removed)]
            }
            None => Vec::new(),
        }
    }

    // ---- history paging ----

    /// Start or join a page-backward request anchored at `anchor`
    ///
    /// Concurrent requests for the same anchor coalesce into one in-flight
    /// network call: the first caller gets [`PagingTicket::Start`] and
    /// performs the call, later callers get [`PagingTicket::Join`] and
    /// share its outcome. A request for a different anchor supersedes the
    /// previous in-flight one, whose late response will be ignored.
    pub fn begin_paging(&mut self, anchor: &str) -> PagingTicket {
        let (tx, rx) = oneshot::channel();
        match &mut self.paging {
            Some(state) if state.anchor == anchor => {
                state.waiters.push(tx);
                PagingTicket::Join { done: rx }
            }
            _ => {
                self.next_generation += 1;
                let generation = self.next_generation;
                if let Some(stale) = self.paging.take() {
                    debug!(
                        "paging request for anchor {} superseded by {}",
                        stale.anchor, anchor
                    );
                    // Waking stale waiters lets them re-read local state.
                    for waiter in stale.waiters {
                        let _ = waiter.send(());
                    }
                }
                self.paging = Some(PagingState {
                    anchor: anchor.to_string(),
                    generation,
                    waiters: vec![tx],
                });
                PagingTicket::Start {
                    generation,
                    done: rx,
                }
            }
        }
    }

    /// Apply a history page fetched for `generation`
    ///
    /// Prepends the page (oldest first) ahead of the locally known window,
    /// deduplicating ids that arrived concurrently through deltas, and
    /// advances the history-gap marker. A stale generation (superseded
    /// request) is ignored. Returns the waiters to wake after the lock is
    /// released.
    pub fn complete_paging(
        &mut self,
        generation: u64,
        page: Vec<Message>,
        has_more: bool,
    ) -> Vec<oneshot::Sender<()>> {
        match &self.paging {
            Some(state) if state.generation == generation => {
                let fresh: Vec<Message> = page
                    .into_iter()
                    .filter(|m| !self.history.iter().any(|held| held.id == m.id))
                    .collect();
                let added = fresh.len();
                self.history.splice(0..0, fresh);
                self.live_start += added;
                self.history_fully_loaded = !has_more;
                let state = self.paging.take().expect("paging state checked above");
                state.waiters
            }
            _ => {
                debug!("stale history page for generation {} ignored", generation);
                Vec::new()
            }
        }
    }

    /// Abandon an in-flight page request that failed, waking its waiters
    pub fn fail_paging(&mut self, generation: u64) -> Vec<oneshot::Sender<()>> {
        match &self.paging {
            Some(state) if state.generation == generation => {
                let state = self.paging.take().expect("paging state checked above");
                state.waiters
            }
            _ => Vec::new(),
        }
    }

    // ---- internal ----

    /// Turn a diff edit script into events, resolving each addition's
    /// predecessor against the final assembled history
    fn events_from_ops(&self, ops: Vec<EditOp>) -> Vec<HistoryEvent> {
        ops.into_iter()
            .map(|op| match op {
                EditOp::Removed(message) => HistoryEvent::Removed(message),
                EditOp::Changed { old, new } => HistoryEvent::Changed { old, new },
                EditOp::Added { message, .. } => {
                    let after = self
                        .history
                        .iter()
                        .position(|m| m.id == message.id)
                        .and_then(|i| i.checked_sub(1))
                        .map(|i| self.history[i].clone());
                    HistoryEvent::Added { message, after }
                }
            })
            .collect()
    }
}

impl Default for MessageHolder {
    fn default() -> Self {
        Self::new()
    }
}
