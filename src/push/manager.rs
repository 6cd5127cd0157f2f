//! Shared push connection with reconnect, backoff and heartbeat.

use crate::clock::SharedClock;
use crate::config::ConnectionConfig;
use crossbeam_channel::{bounded, TrySendError};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::transport::{PushConnection, Transport, TransportFrame};
use super::types::{
    ChannelStats, ConnectionState, PushEvent, PushHandler, SubscriptionHandle, SubscriptionId,
};

/// Mutable channel state, guarded by one lock.
struct ChannelInner {
    state: ConnectionState,
    connection: Option<Box<dyn PushConnection>>,
    /// Ordered by subscription id so delivery order is stable.
    handlers: BTreeMap<SubscriptionId, PushHandler>,
    /// See every event before subscribers; never keep the connection open.
    observers: Vec<PushHandler>,
    /// Consecutive failures since the last `Online`.
    attempt: u32,
    reconnect_at: Option<Instant>,
    last_delay: Option<Duration>,
    last_activity: Instant,
    last_heartbeat_check: Instant,
    connect_started: Option<Instant>,
    teardown_at: Option<Instant>,
    stats: ChannelStats,
}

/// Owns the single physical push connection and fans events out to every
/// subscriber.
///
/// The manager does no I/O of its own: the host loop calls [`pump`] to
/// dispatch received frames and [`tick`] to run timers.
///
/// [`pump`]: PushChannelManager::pump
/// [`tick`]: PushChannelManager::tick
pub struct PushChannelManager {
    config: ConnectionConfig,
    transport: Arc<dyn Transport>,
    clock: SharedClock,
    inner: Mutex<ChannelInner>,
    next_id: AtomicU64,
}

impl PushChannelManager {
    pub fn new(config: ConnectionConfig, transport: Arc<dyn Transport>, clock: SharedClock) -> Self {
        let now = clock.now();
        Self {
            config,
            transport,
            clock,
            inner: Mutex::new(ChannelInner {
                state: ConnectionState::Offline,
                connection: None,
                handlers: BTreeMap::new(),
                observers: Vec::new(),
                attempt: 0,
                reconnect_at: None,
                last_delay: None,
                last_activity: now,
                last_heartbeat_check: now,
                connect_started: None,
                teardown_at: None,
                stats: ChannelStats::default(),
            }),
            next_id: AtomicU64::new(1),
        }
    }

    // --- Subscriptions ---

    /// Register a handler. Connects if no connection is open or pending.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&PushEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let now = self.clock.now();

        let mut inner = self.inner.lock();
        inner.handlers.insert(id, Arc::new(handler));

        if inner.teardown_at.take().is_some() {
            debug!(subscription = id.0, "resubscribed during grace window, keeping connection");
        }

        let idle = inner.state == ConnectionState::Offline && inner.reconnect_at.is_none();
        if idle {
            self.connect_locked(&mut inner, now);
        }
        id
    }

    /// Subscribe through a bounded channel. Events that do not fit are dropped.
    pub fn subscribe_channel(&self, buffer_size: usize) -> SubscriptionHandle {
        let (sender, receiver) = bounded(buffer_size.max(1));
        let id = self.subscribe(move |event| match sender.try_send(event.clone()) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(_)) => {
                warn!(collection = %event.collection, "subscriber buffer full, dropping push event");
            }
        });
        SubscriptionHandle { id, receiver }
    }

    /// Register a handler that sees every event ahead of the subscribers.
    ///
    /// Observers do not count as subscribers: they neither open the
    /// connection nor keep it alive.
    pub fn observe<F>(&self, handler: F)
    where
        F: Fn(&PushEvent) + Send + Sync + 'static,
    {
        self.inner.lock().observers.push(Arc::new(handler));
    }

    /// Remove a handler. The last one out schedules connection teardown
    /// after the grace window.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        if inner.handlers.remove(&id).is_none() {
            return false;
        }

        if inner.handlers.is_empty() {
            let grace = self.config.teardown_grace();
            debug!(?grace, "last subscriber left, scheduling teardown");
            inner.teardown_at = Some(now + grace);
        }
        true
    }

    // --- Host loop ---

    /// Drain received frames and deliver decoded events. Returns the number
    /// of events delivered to subscribers.
    pub fn pump(&self) -> usize {
        let now = self.clock.now();

        let (events, observers, handlers) = {
            let mut inner = self.inner.lock();
            let mut events = Vec::new();

            loop {
                let frame = match inner.connection.as_mut().and_then(|c| c.try_next()) {
                    Some(frame) => frame,
                    None => break,
                };
                inner.last_activity = now;

                match frame {
                    TransportFrame::Opened => {
                        if inner.state != ConnectionState::Online {
                            info!(after_attempts = inner.attempt, "push channel online");
                        }
                        inner.state = ConnectionState::Online;
                        inner.attempt = 0;
                        inner.last_delay = None;
                    }
                    TransportFrame::Keepalive => {}
                    TransportFrame::Message(text) => match PushEvent::parse(&text) {
                        Ok(event) => events.push(event),
                        Err(e) => {
                            inner.stats.dropped_messages += 1;
                            warn!(error = %e, "dropping unreadable push message");
                        }
                    },
                    TransportFrame::Error(reason) => {
                        warn!(%reason, "push transport error");
                        self.fail_locked(&mut inner, now);
                        break;
                    }
                    TransportFrame::Closed => {
                        warn!("push stream closed");
                        self.fail_locked(&mut inner, now);
                        break;
                    }
                }
            }

            let handlers: Vec<PushHandler> = inner.handlers.values().cloned().collect();
            if !handlers.is_empty() {
                inner.stats.delivered += events.len() as u64;
            }
            let observers = inner.observers.clone();
            (events, observers, handlers)
        };

        // Handlers run unlocked so they may subscribe or unsubscribe.
        for event in &events {
            for handler in observers.iter().chain(&handlers) {
                handler(event);
            }
        }

        if handlers.is_empty() {
            0
        } else {
            events.len()
        }
    }

    /// Run due timers: idle teardown, backoff reconnect and heartbeat.
    pub fn tick(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        if let Some(at) = inner.teardown_at {
            if now >= at {
                inner.teardown_at = None;
                if inner.handlers.is_empty() {
                    debug!("grace window over with no subscribers, closing push channel");
                    Self::shutdown_locked(&mut inner);
                }
            }
        }

        if let Some(at) = inner.reconnect_at {
            if now >= at && !inner.handlers.is_empty() {
                debug!(attempt = inner.attempt, "backoff elapsed, reconnecting");
                self.connect_locked(&mut inner, now);
            }
        }

        let interval = self.config.heartbeat_interval();
        if now.saturating_duration_since(inner.last_heartbeat_check) >= interval {
            inner.last_heartbeat_check = now;

            let live = matches!(
                inner.state,
                ConnectionState::Online | ConnectionState::Connecting
            );
            let silence = now.saturating_duration_since(inner.last_activity);
            if live && silence > self.config.heartbeat_timeout() {
                warn!(?silence, "push channel stalled, forcing reconnect");
                inner.stats.forced_reconnects += 1;
                self.fail_locked(&mut inner, now);
            }
        }
    }

    // --- External triggers ---

    /// The network came back. Stalled connections are common after this.
    pub fn notify_online(&self) {
        self.force_reconnect("network online");
    }

    /// The page became visible again (e.g. resume from sleep).
    pub fn notify_visible(&self) {
        self.force_reconnect("page visible");
    }

    /// Tear down and reconnect immediately, whatever the current state.
    ///
    /// Triggers arriving while a connection opened less than the debounce
    /// window ago is still pending are coalesced into that attempt.
    pub fn force_reconnect(&self, reason: &str) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        if inner.handlers.is_empty() {
            return;
        }

        let debounce = self.config.force_reconnect_debounce();
        let fresh = inner.state == ConnectionState::Connecting
            && inner
                .connect_started
                .is_some_and(|t| now.saturating_duration_since(t) < debounce);
        if fresh {
            debug!(reason, "reconnect already in progress, coalescing");
            return;
        }

        info!(reason, "forcing push channel reconnect");
        inner.stats.forced_reconnects += 1;
        Self::close_locked(&mut inner);
        self.connect_locked(&mut inner, now);
    }

    /// Close the connection and forget every subscriber.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        inner.handlers.clear();
        Self::shutdown_locked(&mut inner);
    }

    // --- Introspection ---

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().handlers.len()
    }

    /// Consecutive failed attempts since the channel was last online.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.lock().attempt
    }

    /// Delay chosen for the pending reconnect, if one is scheduled.
    pub fn next_reconnect_delay(&self) -> Option<Duration> {
        let inner = self.inner.lock();
        inner.reconnect_at.and(inner.last_delay)
    }

    pub fn is_teardown_pending(&self) -> bool {
        self.inner.lock().teardown_at.is_some()
    }

    pub fn stats(&self) -> ChannelStats {
        self.inner.lock().stats.clone()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Delay before reconnect attempt number `attempt` (0-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.config
            .reconnect_delay()
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.config.max_reconnect_delay())
    }

    // --- Internals (lock held) ---

    fn connect_locked(&self, inner: &mut ChannelInner, now: Instant) {
        Self::close_locked(inner);

        inner.state = ConnectionState::Connecting;
        inner.reconnect_at = None;
        inner.connect_started = Some(now);
        inner.last_activity = now;
        inner.last_heartbeat_check = now;

        match self.transport.open(&self.config.topics) {
            Ok(connection) => {
                inner.stats.connects += 1;
                inner.connection = Some(connection);
                debug!(topics = ?self.config.topics, "push connection opening");
            }
            Err(e) => {
                warn!(error = %e, "push connection failed to open");
                self.fail_locked(inner, now);
            }
        }
    }

    fn fail_locked(&self, inner: &mut ChannelInner, now: Instant) {
        Self::close_locked(inner);
        inner.stats.failures += 1;

        if inner.handlers.is_empty() {
            inner.reconnect_at = None;
            inner.last_delay = None;
            return;
        }

        let delay = self.backoff_delay(inner.attempt);
        inner.attempt = inner.attempt.saturating_add(1);
        inner.reconnect_at = Some(now + delay);
        inner.last_delay = Some(delay);
        debug!(attempt = inner.attempt, ?delay, "scheduled push reconnect");
    }

    fn close_locked(inner: &mut ChannelInner) {
        if let Some(mut connection) = inner.connection.take() {
            connection.close();
        }
        inner.state = ConnectionState::Offline;
        inner.connect_started = None;
    }

    fn shutdown_locked(inner: &mut ChannelInner) {
        Self::close_locked(inner);
        inner.reconnect_at = None;
        inner.last_delay = None;
        inner.teardown_at = None;
        inner.attempt = 0;
    }
}

impl Drop for PushChannelManager {
    fn drop(&mut self) {
        Self::close_locked(self.inner.get_mut());
    }
}
