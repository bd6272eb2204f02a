//! History paging and change tracking
//!
//! A [`MessageTracker`] is the read side of a session: it registers a
//! [`MessageListener`] for live reconciliation events and pages older
//! history on demand. Paging serves from local state whenever enough is
//! held; otherwise it fetches older messages over the transport, with
//! concurrent requests for the same anchor coalesced into one network
//! call through the holder's ticket mechanism.

use std::sync::Arc;

use tracing::warn;

use crate::holder::PagingTicket;
use crate::message::Message;
use crate::session::SessionInner;

/// Observer of reconciliation events on the message history
///
/// Callbacks arrive in reconciliation order, after the session's internal
/// lock has been released. Implementations must not block.
pub trait MessageListener: Send + Sync {
    /// `message` appeared after `after`; `None` means it is now first
    fn added(&self, message: &Message, after: Option<&Message>);
    /// `message` is no longer part of the history
    fn removed(&self, message: &Message);
    /// The whole history was cleared
    fn removed_all(&self);
    /// `old` was replaced in place by `new`
    fn changed(&self, old: &Message, new: &Message);
}

/// Pages a session's history backwards and tracks its changes
///
/// The tracker keeps a cursor at the oldest message it has handed out;
/// each [`MessageTracker::get_next_messages`] call pages further into the
/// past from there.
pub struct MessageTracker {
    inner: Arc<SessionInner>,
    listener_id: Option<u64>,
    cursor: Option<String>,
}

impl MessageTracker {
    pub(crate) fn new(inner: Arc<SessionInner>) -> Self {
        Self {
            inner,
            listener_id: None,
            cursor: None,
        }
    }

    /// Register the listener, replacing any previous one on this tracker
    pub async fn set_listener(&mut self, listener: Arc<dyn MessageListener>) {
        let mut core = self.inner.core.lock().await;
        if let Some(id) = self.listener_id {
            core.listeners.retain(|(existing, _)| *existing != id);
        }
        let id = core.next_listener_id;
        core.next_listener_id += 1;
        core.listeners.push((id, listener));
        self.listener_id = Some(id);
    }

    /// Remove this tracker's listener
    pub async fn unregister(&mut self) {
        if let Some(id) = self.listener_id.take() {
            self.inner
                .core
                .lock()
                .await
                .listeners
                .retain(|(existing, _)| *existing != id);
        }
    }

    /// The newest `count` messages, oldest first
    ///
    /// Resets the paging cursor to just before the returned page.
    pub async fn get_last_messages(&mut self, count: usize) -> Vec<Message> {
        let core = self.inner.core.lock().await;
        let page = core.holder.messages_before(None, count);
        if let Some(first) = page.first() {
            self.cursor = Some(first.id.clone());
        }
        page
    }

    /// Up to `count` messages older than the cursor, oldest first
    ///
    /// Serves from local state when enough is held or the start of
    /// history has been reached; otherwise fetches older pages over the
    /// transport first. Returns fewer than `count` (possibly zero) only
    /// when history is exhausted or the fetch failed.
    pub async fn get_next_messages(&mut self, count: usize) -> Vec<Message> {
        if count == 0 {
            return Vec::new();
        }
        loop {
            let (anchor, ticket) = {
                let mut core = self.inner.core.lock().await;

                // A cursor whose message vanished from the history reads
                // as exhausted rather than restarting from the newest end.
                if let Some(cursor) = &self.cursor {
                    if !core.holder.history().iter().any(|m| &m.id == cursor) {
                        return Vec::new();
                    }
                }

                if core.holder.count_before(self.cursor.as_deref()) >= count
                    || core.holder.history_fully_loaded()
                {
                    let page = core.holder.messages_before(self.cursor.as_deref(), count);
                    if let Some(first) = page.first() {
                        self.cursor = Some(first.id.clone());
                    }
                    return page;
                }

                let anchor = match core.holder.oldest_id() {
                    Some(id) => id.to_string(),
                    // Nothing local to anchor a backwards fetch on.
                    None => return Vec::new(),
                };
                let ticket = core.holder.begin_paging(&anchor);
                (anchor, ticket)
            };

            match ticket {
                PagingTicket::Join { done } => {
                    // Another caller is fetching this page; share its outcome.
                    let _ = done.await;
                }
                PagingTicket::Start { generation, done } => {
                    let limit = count.min(self.inner.config.history_page_limit);
                    let fetched = self
                        .inner
                        .transport
                        .request_history_before(&anchor, limit)
                        .await;
                    match fetched {
                        Ok(page) => {
                            let has_more = page.has_more;
                            let waiters = {
                                let mut core = self.inner.core.lock().await;
                                let mapped =
                                    self.inner.map_history_payloads(&core, &page.messages);
                                core.holder.complete_paging(generation, mapped, has_more)
                            };
                            for waiter in waiters {
                                let _ = waiter.send(());
                            }
                            drop(done);

                            // A page that moved the anchor nowhere cannot
                            // make progress; serve what is held.
                            let stuck = {
                                let core = self.inner.core.lock().await;
                                core.holder.oldest_id() == Some(anchor.as_str())
                                    && !core.holder.history_fully_loaded()
                            };
                            if stuck {
                                let core = self.inner.core.lock().await;
                                let page =
                                    core.holder.messages_before(self.cursor.as_deref(), count);
                                if let Some(first) = page.first() {
                                    self.cursor = Some(first.id.clone());
                                }
                                return page;
                            }
                        }
                        Err(error) => {
                            warn!("history fetch before {} failed: {}", anchor, error);
                            let waiters = {
                                let mut core = self.inner.core.lock().await;
                                core.holder.fail_paging(generation)
                            };
                            for waiter in waiters {
                                let _ = waiter.send(());
                            }
                            drop(done);
                            let core = self.inner.core.lock().await;
                            let page =
                                core.holder.messages_before(self.cursor.as_deref(), count);
                            if let Some(first) = page.first() {
                                self.cursor = Some(first.id.clone());
                            }
                            return page;
                        }
                    }
                }
            }
        }
    }
}
