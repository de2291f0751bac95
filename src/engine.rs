//! The sync engine: wires the entity store, channels, routers and loader
//! together behind the operations the application calls.

use crate::capabilities::{AuthSession, ChangeFeed, DataAccess};
use crate::config::SyncConfig;
use crate::entities::SyncEntity;
use crate::error::{Result, SyncError};
use crate::loader::BulkLoader;
use crate::reconcile::{self, Change, Outcome, Reconcile};
use crate::router::{
    ConversationsRouter, EventRouter, FriendshipsRouter, MessagesRouter, NotificationsRouter,
    ProfileCache, RequestsRouter, Router, RouterContext,
};
use crate::store::EntityStore;
use crate::subscriptions::{ChannelHandle, SubscriptionManager};
use crate::types::{CounterKey, EntityId, Scope, UserId};
use crate::watch::{WatchConfig, WatchFilter, WatchHandle};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Realtime sync for one signed-in client.
pub struct SyncEngine {
    config: SyncConfig,
    store: Arc<EntityStore>,
    channels: SubscriptionManager,
    loader: BulkLoader,
    data: Arc<dyn DataAccess>,
    auth: Arc<dyn AuthSession>,
    profiles: Arc<ProfileCache>,
}

impl SyncEngine {
    pub fn new(
        config: SyncConfig,
        feed: Arc<dyn ChangeFeed>,
        data: Arc<dyn DataAccess>,
        auth: Arc<dyn AuthSession>,
    ) -> Self {
        let store = Arc::new(EntityStore::new(&config));
        let channels = SubscriptionManager::new(feed, auth.clone(), config.clone());
        let loader = BulkLoader::new(store.clone(), data.clone(), config.clone());
        let profiles = Arc::new(ProfileCache::new(config.profile_cache_size));

        Self {
            config,
            store,
            channels,
            loader,
            data,
            auth,
            profiles,
        }
    }

    pub fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    pub fn channels(&self) -> &SubscriptionManager {
        &self.channels
    }

    pub fn loader(&self) -> &BulkLoader {
        &self.loader
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Activate the viewer scope: open the user-wide channels, then load
    /// friendships, conversations, notifications and pending requests.
    pub async fn start(&self) -> Result<()> {
        let viewer = self.session_user()?;
        self.store.activate_viewer(viewer.clone());

        let ctx = self.context();
        self.open(ConversationsRouter::new(ctx.clone(), viewer.clone()))?;
        self.open(NotificationsRouter::new(ctx.clone(), viewer.clone()))?;
        self.open(FriendshipsRouter::new(ctx.clone(), viewer.clone()))?;
        self.open(RequestsRouter::new(ctx, viewer.clone()))?;

        self.loader.load_friendships().await?;
        self.loader.load_conversations().await?;
        self.loader.load_notifications().await?;
        self.loader.load_pending_requests().await?;

        info!(viewer = %viewer, "sync started");
        Ok(())
    }

    /// Show a conversation: stream and load its messages, then mark it read.
    pub async fn open_conversation(&self, conversation: &EntityId) -> Result<()> {
        let viewer = self.session_user()?;

        let previous = self.store.read(|state| state.active_conversation().cloned());
        if let Some(previous) = previous.filter(|previous| previous != conversation) {
            self.close_conversation(&previous);
        }

        let scope = Scope::Conversation(conversation.clone());
        self.store.write(|state| {
            state.activate_scope(scope);
            state.set_active_conversation(Some(conversation.clone()));
            state.set_counter(&CounterKey::ConversationUnread(conversation.clone()), 0);
        });

        self.open(MessagesRouter::new(self.context(), conversation.clone()))?;
        self.loader.load_messages(conversation).await?;

        self.store
            .write(|state| reconcile::mark_conversation_read(state, conversation));
        if let Err(e) = self.data.mark_conversation_read(conversation, &viewer).await {
            warn!(conversation = %conversation, error = %e, "read confirmation failed");
        }
        Ok(())
    }

    pub fn close_conversation(&self, conversation: &EntityId) {
        let scope = Scope::Conversation(conversation.clone());
        self.channels.close_scope(&scope);
        self.store.write(|state| state.deactivate_scope(&scope));
    }

    /// Show an event page. Returns how many rows the initial load applied.
    pub async fn open_event(&self, event: &EntityId) -> Result<usize> {
        self.session_user()?;
        let scope = Scope::Event(event.clone());
        self.store.write(|state| state.activate_scope(scope));

        self.open(EventRouter::new(self.context(), event.clone()))?;
        self.loader.load_event(event).await
    }

    pub fn close_event(&self, event: &EntityId) {
        let scope = Scope::Event(event.clone());
        self.channels.close_scope(&scope);
        self.store.write(|state| state.deactivate_scope(&scope));
    }

    /// Optimistically mark every notification read and persist it.
    pub async fn mark_notifications_read(&self) -> Result<()> {
        let viewer = self.session_user()?;
        let changed = self.store.write(reconcile::mark_all_read);
        if changed.is_empty() {
            return Ok(());
        }
        self.data.mark_notifications_read(&viewer).await
    }

    /// Tear down every channel and forget everything cached.
    pub fn logout(&self) {
        self.channels.shutdown();
        self.store.clear();
        self.profiles.clear();
        info!("logged out");
    }

    // --- Derived views ---

    pub fn entities<E: SyncEntity>(&self, scope: &Scope) -> Vec<E> {
        self.store.entities(scope)
    }

    pub fn counter(&self, key: &CounterKey) -> u32 {
        self.store.counter(key)
    }

    pub fn total_unread_messages(&self) -> u32 {
        self.store.total_unread_messages()
    }

    pub fn watch(&self, filter: WatchFilter) -> WatchHandle {
        self.store.watch(WatchConfig {
            buffer_size: self.config.watch_buffer_size,
            filter,
        })
    }

    // --- Optimistic local actions ---

    pub fn apply_local_insert<E: Reconcile>(&self, entity: E) -> Outcome {
        self.store.apply(Change::insert(entity).local())
    }

    pub fn apply_local_update<E: Reconcile>(&self, entity: E) -> Outcome {
        self.store.apply(Change::update(entity).local())
    }

    pub fn apply_local_delete<E: Reconcile>(&self, id: EntityId) -> Outcome {
        self.store.apply(Change::<E>::delete(id).local())
    }

    fn open<R: Router>(&self, router: R) -> Result<ChannelHandle> {
        let spec = router.spec();
        self.channels.open(spec, Arc::new(router))
    }

    fn context(&self) -> RouterContext {
        RouterContext::new(self.store.clone(), self.data.clone(), self.profiles.clone())
    }

    fn session_user(&self) -> Result<UserId> {
        self.auth.current_user().ok_or_else(|| {
            error!("no authenticated session");
            SyncError::NotAuthenticated
        })
    }
}
