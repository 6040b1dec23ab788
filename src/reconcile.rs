//! Reconciliation: bringing the thread store in line with the server.
//!
//! The server is authoritative. Both entry points replace the store
//! wholesale instead of merging, and a reload that finishes after a newer
//! one has already been applied is dropped.

use crate::error::Result;
use crate::notify::Notification;
use crate::session::ChatSession;
use crate::threads::Thread;
use std::sync::atomic::Ordering;
use tracing::{debug, info, instrument, warn};

/// What [`ChatSession::load_threads`] ended up with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadSummary {
    pub thread_count: usize,
    /// Whether a previously active thread was selected again.
    pub restored: bool,
    /// The listing failed and the store was left empty.
    pub failed: bool,
}

impl ChatSession {
    /// Initial load of the thread list.
    ///
    /// Consumes the "just logged in" flag: right after a login the user
    /// lands on a fresh chat, otherwise the last active thread (if the
    /// server still has it) is selected again. A failed listing leaves an
    /// empty store and raises a warning instead of an error.
    #[instrument(skip(self))]
    pub async fn load_threads(&self) -> Result<LoadSummary> {
        let just_logged_in = self.persistence.take_just_logged_in();
        let ticket = self.issue_reload();

        let threads = match self
            .transport
            .list_conversations(self.config.conversation_limit)
            .await
        {
            Ok(summaries) => summaries
                .into_iter()
                .map(|s| s.into_thread())
                .collect::<Vec<Thread>>(),
            Err(e) => {
                warn!(error = %e, "Could not list conversations");
                self.apply_reload(ticket, Vec::new());
                self.notifier.notify(Notification::warning(
                    "Couldn't load your chats",
                    "Starting with an empty chat list.",
                ));
                return Ok(LoadSummary {
                    thread_count: 0,
                    restored: false,
                    failed: true,
                });
            }
        };

        let thread_count = threads.len();
        if !self.apply_reload(ticket, threads) {
            return Ok(LoadSummary {
                thread_count,
                restored: false,
                failed: false,
            });
        }
        info!(count = thread_count, "Threads loaded");

        if just_logged_in {
            debug!("Fresh login; not restoring the last active thread");
            self.set_active(None);
            return Ok(LoadSummary {
                thread_count,
                restored: false,
                failed: false,
            });
        }

        let restored = match self.persistence.last_active_thread() {
            Some(id) if self.with_store(|s| s.contains(&id)) => {
                self.select_thread(&id).await?;
                true
            }
            Some(id) => {
                debug!(thread = %id, "Last active thread no longer exists");
                self.set_active(None);
                false
            }
            None => false,
        };

        Ok(LoadSummary {
            thread_count,
            restored,
            failed: false,
        })
    }

    /// Refetch the thread list and replace the store with it.
    ///
    /// Returns `Ok(false)` when a newer reload was applied first and this
    /// result was dropped. A listing failure is returned to the caller and
    /// leaves the store untouched.
    #[instrument(skip(self))]
    pub async fn reload(&self) -> std::result::Result<bool, crate::error::TransportError> {
        let ticket = self.issue_reload();
        let summaries = self
            .transport
            .list_conversations(self.config.conversation_limit)
            .await?;
        let threads = summaries.into_iter().map(|s| s.into_thread()).collect();
        Ok(self.apply_reload(ticket, threads))
    }

    fn issue_reload(&self) -> u64 {
        self.reloads_issued.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Install `threads` unless a newer reload got there first.
    fn apply_reload(&self, ticket: u64, threads: Vec<Thread>) -> bool {
        let applied = self.with_store(|s| {
            // Checked under the store lock so two reloads can't interleave
            if self.reloads_applied.load(Ordering::SeqCst) > ticket {
                return false;
            }
            self.reloads_applied.store(ticket, Ordering::SeqCst);
            s.replace_all(threads);
            true
        });
        if !applied {
            debug!(ticket, "Dropping stale reload");
            return false;
        }

        // The active thread may have been removed on the server
        if let Some(active) = self.active_thread() {
            if !self.with_store(|s| s.contains(&active)) {
                self.set_active(None);
            }
        }
        true
    }
}
