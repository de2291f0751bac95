//! Initial full-state fetch per scope and its handoff to the live stream.
//!
//! A load opens a window in the store before fetching. Live changes that
//! land while the window is open are recorded, and when the snapshot
//! arrives those records keep their live state: the snapshot neither
//! overwrites them nor resurrects ones deleted live. A failed fetch closes
//! the window and leaves the store untouched. A window cancelled by logout
//! or scope teardown discards its snapshot when it arrives.

use crate::capabilities::DataAccess;
use crate::config::SyncConfig;
use crate::entities::{Conversation, ConversationSummary, EventSnapshot, SyncEntity};
use crate::error::{Result, SyncError};
use crate::reconcile::{self, Counting, Reconcile};
use crate::store::{EntityStore, LoadTicket, StoreState};
use crate::types::{CounterKey, Domain, EntityId, Scope, Timestamp, UserId};
use crate::watch::CacheEvent;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Runs bulk loads against the data-access capability.
pub struct BulkLoader {
    store: Arc<EntityStore>,
    data: Arc<dyn DataAccess>,
    config: SyncConfig,
}

impl BulkLoader {
    pub fn new(store: Arc<EntityStore>, data: Arc<dyn DataAccess>, config: SyncConfig) -> Self {
        Self {
            store,
            data,
            config,
        }
    }

    /// Load one domain under one scope. Returns how many snapshot rows
    /// were applied.
    pub async fn load_all(&self, domain: Domain, scope: &Scope) -> Result<usize> {
        match (domain, scope) {
            (Domain::Conversations, Scope::Viewer) => self.load_conversations().await,
            (Domain::Notifications, Scope::Viewer) => self.load_notifications().await,
            (Domain::Friendships, Scope::Viewer) => self.load_friendships().await,
            (Domain::PendingRequests, Scope::Viewer) => self.load_pending_requests().await,
            (Domain::Messages, Scope::Conversation(id)) => self.load_messages(id).await,
            (Domain::Participants | Domain::Comments | Domain::Contributions, Scope::Event(id)) => {
                self.load_event(id).await
            }
            _ => Err(SyncError::Load {
                domain,
                reason: format!("not loadable under scope {}", scope),
            }),
        }
    }

    pub async fn load_friendships(&self) -> Result<usize> {
        let viewer = self.viewer()?;
        self.load(Scope::Viewer, Counting::Diff, self.data.load_friendships(&viewer))
            .await
    }

    /// Conversations are filtered by the friendship set, so friendships are
    /// loaded first when they are not already.
    pub async fn load_conversations(&self) -> Result<usize> {
        let viewer = self.viewer()?;
        if !self
            .store
            .read(|state| state.is_loaded(Domain::Friendships, &Scope::Viewer))
        {
            debug!("loading friendships before conversations");
            self.load_friendships().await?;
        }

        let ticket = self
            .store
            .write(|state| state.begin_load(Domain::Conversations, Scope::Viewer));
        match self.data.load_conversations(&viewer).await {
            Ok(summaries) => {
                let applied = self
                    .store
                    .write(|state| merge_summaries(state, &ticket, summaries))
                    .ok_or_else(|| cancelled(&ticket))?;
                info!(domain = ?Domain::Conversations, applied, "bulk load complete");
                Ok(applied)
            }
            Err(e) => Err(self.abort(&ticket, e)),
        }
    }

    pub async fn load_notifications(&self) -> Result<usize> {
        let viewer = self.viewer()?;
        let limit = self.config.notification_retention;
        self.load(
            Scope::Viewer,
            Counting::Diff,
            self.data.load_notifications(&viewer, limit),
        )
        .await
    }

    pub async fn load_pending_requests(&self) -> Result<usize> {
        let viewer = self.viewer()?;
        self.load(Scope::Viewer, Counting::Diff, self.data.load_pending_requests(&viewer))
            .await
    }

    /// Messages of one conversation. Unread counters come from the
    /// conversation summaries, so messages do not move them.
    pub async fn load_messages(&self, conversation: &EntityId) -> Result<usize> {
        self.load(
            Scope::Conversation(conversation.clone()),
            Counting::Skip,
            self.data.load_messages(conversation),
        )
        .await
    }

    /// Participants, comments and contributions of one event, fetched
    /// together.
    pub async fn load_event(&self, event: &EntityId) -> Result<usize> {
        let scope = Scope::Event(event.clone());
        let tickets = self.store.write(|state| {
            [
                state.begin_load(Domain::Participants, scope.clone()),
                state.begin_load(Domain::Comments, scope.clone()),
                state.begin_load(Domain::Contributions, scope.clone()),
            ]
        });

        match self.data.load_event(event).await {
            Ok(snapshot) => {
                let EventSnapshot {
                    participants,
                    comments,
                    contributions,
                } = snapshot;
                let [participants_ticket, comments_ticket, contributions_ticket] = &tickets;
                let applied = self
                    .store
                    .write(|state| {
                        Some(
                            merge_snapshot(state, participants_ticket, participants, Counting::Diff)?
                                .len()
                                + merge_snapshot(state, comments_ticket, comments, Counting::Diff)?
                                    .len()
                                + merge_snapshot(
                                    state,
                                    contributions_ticket,
                                    contributions,
                                    Counting::Diff,
                                )?
                                .len(),
                        )
                    })
                    .ok_or_else(|| cancelled(participants_ticket))?;
                info!(event = %event, applied, "event load complete");
                Ok(applied)
            }
            Err(e) => {
                let [first, rest @ ..] = &tickets;
                self.store.write(|state| {
                    for ticket in rest {
                        state.abort_load(ticket);
                    }
                });
                Err(self.abort(first, e))
            }
        }
    }

    async fn load<E, F>(&self, scope: Scope, counting: Counting, fetch: F) -> Result<usize>
    where
        E: Reconcile,
        F: Future<Output = Result<Vec<E>>>,
    {
        let ticket = self.store.write(|state| state.begin_load(E::DOMAIN, scope));
        match fetch.await {
            Ok(rows) => {
                let applied = self
                    .store
                    .write(|state| merge_snapshot(state, &ticket, rows, counting))
                    .ok_or_else(|| cancelled(&ticket))?
                    .len();
                info!(domain = ?E::DOMAIN, scope = %ticket.scope, applied, "bulk load complete");
                Ok(applied)
            }
            Err(e) => Err(self.abort(&ticket, e)),
        }
    }

    fn abort(&self, ticket: &LoadTicket, error: SyncError) -> SyncError {
        self.store.write(|state| state.abort_load(ticket));
        warn!(domain = ?ticket.domain, scope = %ticket.scope, error = %error, "bulk load failed");
        SyncError::Load {
            domain: ticket.domain,
            reason: error.to_string(),
        }
    }

    fn viewer(&self) -> Result<UserId> {
        self.store
            .read(|state| state.viewer().cloned())
            .ok_or(SyncError::NotAuthenticated)
    }
}

fn cancelled(ticket: &LoadTicket) -> SyncError {
    info!(domain = ?ticket.domain, scope = %ticket.scope, "bulk load cancelled, snapshot discarded");
    SyncError::ScopeInactive(ticket.scope.to_string())
}

/// Merge a snapshot into the cache and close its load window.
///
/// Returns the ids written from the snapshot, or `None` without touching
/// the cache when the window was cancelled while the fetch was in flight.
pub(crate) fn merge_snapshot<E: Reconcile>(
    state: &mut StoreState,
    ticket: &LoadTicket,
    rows: Vec<E>,
    counting: Counting,
) -> Option<Vec<EntityId>> {
    let touched = state.finish_load(ticket)?;
    let now = Timestamp::now();
    let in_snapshot: HashSet<&EntityId> = rows.iter().map(SyncEntity::id).collect();

    let stale: Vec<EntityId> = E::collection(state)
        .ids(&ticket.scope)
        .iter()
        .filter(|id| {
            !in_snapshot.contains(id)
                && !touched.contains_key(*id)
                && state.pending().get(E::DOMAIN, id, now).is_none()
        })
        .cloned()
        .collect();
    drop(in_snapshot);
    for id in &stale {
        reconcile::remove_record::<E>(state, id);
    }

    let mut applied = Vec::with_capacity(rows.len());
    for row in rows {
        if let Some(touch) = touched.get(row.id()) {
            debug!(domain = ?E::DOMAIN, id = %row.id(), ?touch, "live change wins over snapshot");
            continue;
        }
        if state.pending().get(E::DOMAIN, row.id(), now).is_some() || !row.admit(state) {
            continue;
        }

        let row = match E::collection(state).get(row.id()) {
            Some(existing) => row.merge(existing),
            None => row,
        };
        let id = row.id().clone();
        if reconcile::store_record(state, row, counting) {
            applied.push(id);
        }
    }

    let count = E::collection(state).ids(&ticket.scope).len();
    state.emit(CacheEvent::Reloaded {
        domain: E::DOMAIN,
        scope: ticket.scope.clone(),
        count,
    });
    Some(applied)
}

/// Merge conversation summaries and seed unread counters from them.
fn merge_summaries(
    state: &mut StoreState,
    ticket: &LoadTicket,
    summaries: Vec<ConversationSummary>,
) -> Option<usize> {
    let counts: HashMap<EntityId, u32> = summaries
        .iter()
        .map(|summary| (summary.conversation.id.clone(), summary.unread_count))
        .collect();
    let rows: Vec<Conversation> = summaries.into_iter().map(|summary| summary.conversation).collect();

    let applied = merge_snapshot(state, ticket, rows, Counting::Diff)?;
    for id in &applied {
        let unread = if state.active_conversation() == Some(id) {
            0
        } else {
            counts.get(id).copied().unwrap_or(0)
        };
        state.set_counter(&CounterKey::ConversationUnread(id.clone()), unread);
    }
    Some(applied.len())
}
