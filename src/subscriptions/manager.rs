//! Owns the lifecycle of every named change-feed channel.

use crate::capabilities::{AuthSession, ChangeFeed, FeedChannel};
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::types::{Operation, Scope};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::types::{
    ChangeHandler, ChannelHandle, ChannelSpec, ChannelState, ChannelStatus, FeedEvent, FeedSink,
    RawChange,
};

/// Internal channel state.
struct Channel {
    spec: ChannelSpec,
    handler: Arc<dyn ChangeHandler>,
    state: ChannelState,
    /// Distinguishes this open from earlier opens of the same name.
    generation: u64,
    /// Bumped on every (re)subscribe; statuses from older transports are ignored.
    attempt: u64,
    transport: Option<Box<dyn FeedChannel>>,
    pumps: Vec<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
    /// Consecutive failures since the last SUBSCRIBED.
    failures: u32,
}

impl Channel {
    fn new(spec: ChannelSpec, handler: Arc<dyn ChangeHandler>, generation: u64) -> Self {
        Self {
            spec,
            handler,
            state: ChannelState::Idle,
            generation,
            attempt: 0,
            transport: None,
            pumps: Vec::new(),
            reconnect: None,
            failures: 0,
        }
    }

    fn transition(&mut self, next: ChannelState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(SyncError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        trace!(channel = %self.spec.name, from = %self.state, to = %next, "channel transition");
        self.state = next;
        Ok(())
    }

    /// Close the transport, cancel timers and stop delivering events.
    fn tear_down(&mut self) {
        if self.state == ChannelState::TornDown {
            return;
        }
        self.state = ChannelState::TornDown;
        if let Some(timer) = self.reconnect.take() {
            timer.abort();
        }
        for pump in self.pumps.drain(..) {
            pump.abort();
        }
        if let Some(mut transport) = self.transport.take() {
            transport.unsubscribe();
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.tear_down();
    }
}

struct Shared {
    feed: Arc<dyn ChangeFeed>,
    auth: Arc<dyn AuthSession>,
    config: SyncConfig,
    channels: Mutex<HashMap<String, Channel>>,
    next_generation: AtomicU64,
    live: AtomicBool,
}

/// Opens, supervises and tears down change-feed channels.
///
/// At most one channel exists per name. Failures schedule a single
/// reconnect timer per channel; teardown cancels it. Must be used from
/// within a tokio runtime.
#[derive(Clone)]
pub struct SubscriptionManager {
    shared: Arc<Shared>,
}

impl SubscriptionManager {
    pub fn new(feed: Arc<dyn ChangeFeed>, auth: Arc<dyn AuthSession>, config: SyncConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                feed,
                auth,
                config,
                channels: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
                live: AtomicBool::new(true),
            }),
        }
    }

    /// Open a channel, replacing any channel with the same name.
    ///
    /// Fails with [`SyncError::NotAuthenticated`] without touching the feed
    /// when there is no session. Transport failures are not returned; they
    /// are retried in the background.
    pub fn open(&self, spec: ChannelSpec, handler: Arc<dyn ChangeHandler>) -> Result<ChannelHandle> {
        if !self.shared.auth.has_session() {
            error!(channel = %spec.name, "cannot open channel without an authenticated session");
            return Err(SyncError::NotAuthenticated);
        }
        self.shared.live.store(true, Ordering::SeqCst);

        let name = spec.name.clone();
        let generation = self.shared.next_generation.fetch_add(1, Ordering::SeqCst);

        let superseded = self
            .shared
            .channels
            .lock()
            .insert(name.clone(), Channel::new(spec, handler, generation));
        if let Some(mut previous) = superseded {
            info!(channel = %name, "superseding open channel");
            previous.tear_down();
        }

        info!(channel = %name, "opening channel");
        self.shared.connect(&name, generation);
        Ok(ChannelHandle { name, generation })
    }

    /// Close the channel a handle refers to. Returns false if it was
    /// already closed or superseded.
    pub fn close(&self, handle: &ChannelHandle) -> bool {
        let removed = {
            let mut channels = self.shared.channels.lock();
            match channels.get(&handle.name) {
                Some(channel) if channel.generation == handle.generation => {
                    channels.remove(&handle.name)
                }
                _ => None,
            }
        };

        match removed {
            Some(mut channel) => {
                channel.tear_down();
                info!(channel = %handle.name, "channel closed");
                true
            }
            None => false,
        }
    }

    /// Close every channel owned by a scope. Returns how many were closed.
    pub fn close_scope(&self, scope: &Scope) -> usize {
        let mut removed: Vec<Channel> = {
            let mut channels = self.shared.channels.lock();
            let names: Vec<String> = channels
                .iter()
                .filter(|(_, channel)| &channel.spec.scope == scope)
                .map(|(name, _)| name.clone())
                .collect();
            names.iter().filter_map(|name| channels.remove(name)).collect()
        };

        for channel in removed.iter_mut() {
            channel.tear_down();
            info!(channel = %channel.spec.name, "channel closed");
        }
        removed.len()
    }

    /// Tear down every channel and stop all reconnects.
    pub fn shutdown(&self) {
        self.shared.live.store(false, Ordering::SeqCst);
        let channels: Vec<Channel> = self.shared.channels.lock().drain().map(|(_, c)| c).collect();
        let count = channels.len();
        for mut channel in channels {
            channel.tear_down();
        }
        info!(channels = count, "subscription manager shut down");
    }

    // --- Introspection ---

    pub fn state(&self, name: &str) -> Option<ChannelState> {
        self.shared.channels.lock().get(name).map(|channel| channel.state)
    }

    pub fn active_channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shared.channels.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of channels with a reconnect timer pending.
    pub fn pending_reconnects(&self) -> usize {
        self.shared
            .channels
            .lock()
            .values()
            .filter(|channel| channel.reconnect.is_some())
            .count()
    }

    /// Consecutive failures of a channel since it was last subscribed.
    pub fn failures(&self, name: &str) -> Option<u32> {
        self.shared.channels.lock().get(name).map(|channel| channel.failures)
    }

    pub fn is_live(&self) -> bool {
        self.shared.live.load(Ordering::SeqCst)
    }
}

impl Shared {
    /// Attach the channel's transport and start delivering its events.
    fn connect(self: &Arc<Self>, name: &str, generation: u64) {
        let (spec, attempt) = {
            let mut channels = self.channels.lock();
            let Some(channel) = current(&mut channels, name, generation) else {
                return;
            };
            if let Err(e) = channel.transition(ChannelState::Subscribing) {
                debug!(channel = %name, error = %e, "not subscribing");
                return;
            }
            channel.attempt += 1;
            (channel.spec.clone(), channel.attempt)
        };

        let (sender, receiver) = unbounded_channel();
        let result = self.feed.subscribe(&spec, FeedSink::new(sender));

        let mut channels = self.channels.lock();
        let Some(channel) = current(&mut channels, name, generation) else {
            // Closed while subscribing.
            if let Ok(mut transport) = result {
                transport.unsubscribe();
            }
            return;
        };

        match result {
            Ok(transport) => {
                channel.transport = Some(transport);
                channel.pumps.retain(|pump| !pump.is_finished());
                channel.pumps.push(tokio::spawn(pump(
                    Arc::downgrade(self),
                    name.to_string(),
                    generation,
                    attempt,
                    receiver,
                )));
            }
            Err(e) => {
                warn!(channel = %name, error = %e, "channel subscribe failed");
                self.fail(channel, ChannelStatus::ChannelError);
            }
        }
    }

    fn on_status(self: &Arc<Self>, name: &str, generation: u64, attempt: u64, status: ChannelStatus) {
        let mut channels = self.channels.lock();
        let Some(channel) = current(&mut channels, name, generation) else {
            return;
        };
        if channel.attempt != attempt {
            debug!(channel = %name, ?status, "ignoring status from replaced transport");
            return;
        }

        match status {
            ChannelStatus::Subscribed => {
                if let Some(timer) = channel.reconnect.take() {
                    timer.abort();
                }
                channel.failures = 0;
                if channel.transition(ChannelState::Subscribed).is_ok() {
                    info!(channel = %name, "channel subscribed");
                }
            }
            failure => self.fail(channel, failure),
        }
    }

    /// Record a failure and schedule a reconnect unless one is pending.
    fn fail(self: &Arc<Self>, channel: &mut Channel, status: ChannelStatus) {
        channel.failures += 1;
        let name = channel.spec.name.clone();

        if channel.failures >= self.config.persistent_failure_threshold {
            warn!(channel = %name, failures = channel.failures, ?status, "channel failing persistently");
        } else {
            info!(channel = %name, failures = channel.failures, ?status, "channel failed");
        }

        if channel.reconnect.is_some() {
            debug!(channel = %name, "reconnect already scheduled");
            return;
        }
        if channel.transition(ChannelState::Failed(status)).is_err()
            || channel.transition(ChannelState::ReconnectScheduled).is_err()
        {
            return;
        }

        let shared = Arc::downgrade(self);
        let delay = self.config.reconnect_delay;
        let generation = channel.generation;
        channel.reconnect = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(shared) = shared.upgrade() {
                shared.resubscribe(&name, generation);
            }
        }));
    }

    fn resubscribe(self: &Arc<Self>, name: &str, generation: u64) {
        if !self.live.load(Ordering::SeqCst) {
            debug!(channel = %name, "manager shut down, not reconnecting");
            return;
        }
        {
            let mut channels = self.channels.lock();
            let Some(channel) = current(&mut channels, name, generation) else {
                return;
            };
            channel.reconnect = None;
            if let Some(mut transport) = channel.transport.take() {
                transport.unsubscribe();
            }
        }

        info!(channel = %name, "reconnecting channel");
        self.connect(name, generation);
    }
}

/// The live channel for `name`, if it is still the one opened as `generation`.
fn current<'a>(
    channels: &'a mut HashMap<String, Channel>,
    name: &str,
    generation: u64,
) -> Option<&'a mut Channel> {
    channels
        .get_mut(name)
        .filter(|channel| channel.generation == generation && channel.state != ChannelState::TornDown)
}

/// Deliver one transport's events, one at a time, until it closes or the
/// channel is torn down.
async fn pump(
    shared: Weak<Shared>,
    name: String,
    generation: u64,
    attempt: u64,
    mut events: UnboundedReceiver<FeedEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(manager) = shared.upgrade() else {
            break;
        };

        match event {
            FeedEvent::Status(status) => manager.on_status(&name, generation, attempt, status),
            FeedEvent::Change(change) => {
                let handler = {
                    let mut channels = manager.channels.lock();
                    let Some(channel) = current(&mut channels, &name, generation) else {
                        break;
                    };
                    if !channel.spec.accepts(&change) {
                        trace!(channel = %name, table = %change.table, "change not bound on channel");
                        continue;
                    }
                    channel.handler.clone()
                };
                drop(manager);
                dispatch(&name, handler.as_ref(), change).await;
            }
        }
    }
    trace!(channel = %name, attempt, "channel pump finished");
}

async fn dispatch(channel: &str, handler: &dyn ChangeHandler, change: RawChange) {
    let table = change.table.clone();
    let operation = change.operation;

    let result = match operation {
        Operation::Insert => handler.on_insert(change).await,
        Operation::Update => handler.on_update(change).await,
        Operation::Delete => handler.on_delete(change).await,
    };

    if let Err(e) = result {
        warn!(channel = %channel, %table, ?operation, error = %e, "dropping change");
    }
}
