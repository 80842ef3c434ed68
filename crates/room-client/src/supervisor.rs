//! Client connection supervisor.
//!
//! Owns the lifetime of the signaling channel:
//!
//! ```text
//! Disconnected -> Connecting -> Connected
//!                    ^  |           |
//!                    |  v           v (unexpected drop)
//!               Reconnecting <------+
//!                    |
//!                    v (retries exhausted)
//!                  Failed
//! ```
//!
//! # Retry policy
//!
//! 1. On an unexpected drop the automatic schedule runs first: one attempt
//!    after each delay in `auto_schedule` (default 0s, 2s, 10s, 30s).
//! 2. If that schedule is exhausted the manual loop takes over: up to
//!    `max_attempts` attempts, waiting `2^attempt` seconds after each failed
//!    attempt. An attempt that finds the transport mid-handshake waits
//!    `transitional_poll` and re-polls instead of opening a second channel.
//! 3. When the manual loop is exhausted the state becomes `Failed` and
//!    `SupervisorEvent::SignalingConnectionFailed` is emitted.
//!
//! A single async mutex is held for the whole of any connect or reconnect
//! attempt. A caller that finds it taken waits for the attempt in flight and
//! then reports its outcome instead of starting a duplicate attempt. The
//! guard is released on every exit path.
//!
//! Inbound messages from every channel incarnation are forwarded into one
//! stable queue, so consumers are unaffected by reconnects.

use crate::config::ClientConfig;
use crate::errors::ClientError;
use crate::transport::{SignalingLink, SignalingTransport};
use common::protocol::{ClientMessage, ServerMessage};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Capacity of the stable inbound queue.
const INBOUND_BUFFER: usize = 256;

/// Capacity of the supervisor event broadcast.
const EVENT_BUFFER: usize = 64;

/// State of the signaling channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting between reconnect attempts.
    Reconnecting,
    /// Retries exhausted. Terminal until `connect` is called again.
    Failed,
}

impl ChannelState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ChannelState::Disconnected => "disconnected",
            ChannelState::Connecting => "connecting",
            ChannelState::Connected => "connected",
            ChannelState::Reconnecting => "reconnecting",
            ChannelState::Failed => "failed",
        }
    }
}

/// Events published by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    StateChanged(ChannelState),
    /// A dropped channel was re-established.
    Reconnected,
    /// Every attempt failed.
    SignalingConnectionFailed { attempts: u32 },
}

/// Reconnect policy values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Manual attempts before giving up.
    pub max_attempts: u32,
    /// Delay before each automatic attempt after an unexpected drop.
    pub auto_schedule: Vec<Duration>,
    /// Re-poll interval while the transport is mid-handshake.
    pub transitional_poll: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

impl From<&ClientConfig> for ReconnectPolicy {
    fn from(config: &ClientConfig) -> Self {
        Self {
            max_attempts: config.max_reconnect_attempts,
            auto_schedule: config.auto_reconnect_schedule.clone(),
            transitional_poll: config.transitional_poll_interval,
        }
    }
}

impl ReconnectPolicy {
    /// Wait after failed manual attempt `attempt` (1-based): `2^attempt` s.
    #[must_use]
    pub fn manual_backoff(attempt: u32) -> Duration {
        Duration::from_secs(2u64.saturating_pow(attempt))
    }
}

/// Supervises the signaling channel. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionSupervisor {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn SignalingTransport>,
    policy: ReconnectPolicy,
    /// Held for the whole of any connect or reconnect attempt.
    attempt_lock: Mutex<()>,
    state: watch::Sender<ChannelState>,
    events: broadcast::Sender<SupervisorEvent>,
    /// Sender of the current channel, `None` while disconnected.
    outbound: StdMutex<Option<mpsc::Sender<ClientMessage>>>,
    /// Stable inbound queue shared by every channel incarnation.
    inbound: mpsc::Sender<ServerMessage>,
    /// Bumped per installed channel; closures of older channels are ignored.
    link_generation: AtomicU64,
    cancel_token: CancellationToken,
}

impl ConnectionSupervisor {
    /// Create a supervisor. Returns the stable inbound message queue.
    #[must_use]
    pub fn new(
        transport: Arc<dyn SignalingTransport>,
        policy: ReconnectPolicy,
    ) -> (Self, mpsc::Receiver<ServerMessage>) {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER);
        let (state, _) = watch::channel(ChannelState::Disconnected);
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        let inner = Inner {
            transport,
            policy,
            attempt_lock: Mutex::new(()),
            state,
            events,
            outbound: StdMutex::new(None),
            inbound: inbound_tx,
            link_generation: AtomicU64::new(0),
            cancel_token: CancellationToken::new(),
        };

        (
            Self {
                inner: Arc::new(inner),
            },
            inbound_rx,
        )
    }

    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.inner.current_state()
    }

    /// Receiver that observes every state change.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.inner.state.subscribe()
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.inner.events.subscribe()
    }

    #[must_use]
    pub fn policy(&self) -> &ReconnectPolicy {
        &self.inner.policy
    }

    /// Open the signaling channel, retrying per the manual policy.
    ///
    /// If another attempt is in flight this waits for it and reports its
    /// outcome without starting a second attempt.
    ///
    /// # Errors
    ///
    /// `ClientError::SignalingConnectionFailed` after retry exhaustion,
    /// `ClientError::Closed` after shutdown.
    #[instrument(skip_all, name = "client.supervisor.connect")]
    pub async fn connect(&self) -> Result<(), ClientError> {
        let inner = &self.inner;
        if inner.cancel_token.is_cancelled() {
            return Err(ClientError::Closed);
        }

        let Ok(_guard) = inner.attempt_lock.try_lock() else {
            debug!(
                target: "client.supervisor",
                "Connection attempt in flight, waiting for its outcome"
            );
            let _settled = inner.attempt_lock.lock().await;
            return match inner.current_state() {
                ChannelState::Connected => Ok(()),
                ChannelState::Failed => Err(ClientError::SignalingConnectionFailed {
                    attempts: inner.policy.max_attempts,
                }),
                _ => Err(ClientError::NotConnected),
            };
        };

        if inner.current_state() == ChannelState::Connected {
            return Ok(());
        }
        inner.manual_retry().await
    }

    /// Foreground notification. When the channel is `Disconnected` this makes
    /// exactly one reconnect attempt, unless an attempt is already in flight.
    ///
    /// Returns `true` if the attempt connected.
    pub async fn on_visibility_change(&self, visible: bool) -> bool {
        let inner = &self.inner;
        if !visible
            || inner.cancel_token.is_cancelled()
            || inner.current_state() != ChannelState::Disconnected
        {
            return false;
        }

        let Ok(_guard) = inner.attempt_lock.try_lock() else {
            debug!(
                target: "client.supervisor",
                "Foregrounded during a reconnect attempt, not starting another"
            );
            return false;
        };
        if inner.current_state() != ChannelState::Disconnected {
            return false;
        }

        info!(
            target: "client.supervisor",
            "Foregrounded while disconnected, attempting reconnect"
        );
        if inner.try_open(1).await {
            inner.emit(SupervisorEvent::Reconnected);
            true
        } else {
            inner.set_state(ChannelState::Disconnected);
            false
        }
    }

    /// Send a message on the current channel.
    ///
    /// # Errors
    ///
    /// `ClientError::NotConnected` if no channel is open or it just closed.
    pub async fn send(&self, message: ClientMessage) -> Result<(), ClientError> {
        let sender = self
            .inner
            .current_outbound()
            .ok_or(ClientError::NotConnected)?;
        sender
            .send(message)
            .await
            .map_err(|_| ClientError::NotConnected)
    }

    /// Close the channel on purpose; no reconnect follows.
    ///
    /// A reconnect already in progress is not interrupted; use
    /// [`shutdown`](Self::shutdown) for that.
    pub fn disconnect(&self) {
        let inner = &self.inner;
        inner.link_generation.fetch_add(1, Ordering::SeqCst);
        inner.take_outbound();
        inner.set_state(ChannelState::Disconnected);
        info!(target: "client.supervisor", "Signaling channel closed by client");
    }

    /// Stop all attempts and close the channel.
    pub fn shutdown(&self) {
        self.inner.cancel_token.cancel();
        self.disconnect();
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.cancel_token.is_cancelled()
    }
}

impl Inner {
    fn current_state(&self) -> ChannelState {
        *self.state.borrow()
    }

    fn set_state(&self, next: ChannelState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(
                target: "client.supervisor",
                from = previous.as_str(),
                to = next.as_str(),
                "Channel state changed"
            );
            self.emit(SupervisorEvent::StateChanged(next));
        }
    }

    fn emit(&self, event: SupervisorEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn current_outbound(&self) -> Option<mpsc::Sender<ClientMessage>> {
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn take_outbound(&self) -> Option<mpsc::Sender<ClientMessage>> {
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Sleep unless shut down first. Returns `false` on shutdown.
    async fn sleep_or_cancelled(&self, duration: Duration) -> bool {
        tokio::select! {
            () = tokio::time::sleep(duration) => true,
            () = self.cancel_token.cancelled() => false,
        }
    }

    /// Bounded manual retry loop. Caller holds `attempt_lock`.
    async fn manual_retry(self: &Arc<Self>) -> Result<(), ClientError> {
        let max_attempts = self.policy.max_attempts;

        for attempt in 1..=max_attempts {
            if self.cancel_token.is_cancelled() {
                return Err(ClientError::Closed);
            }

            let status = self.transport.status();
            if status.is_transitional() {
                debug!(
                    target: "client.supervisor",
                    attempt,
                    max_attempts,
                    "Transport mid-handshake, re-polling"
                );
                if !self.sleep_or_cancelled(self.policy.transitional_poll).await {
                    return Err(ClientError::Closed);
                }
                continue;
            }

            if self.try_open(attempt).await {
                return Ok(());
            }

            if attempt < max_attempts {
                self.set_state(ChannelState::Reconnecting);
                let backoff = ReconnectPolicy::manual_backoff(attempt);
                debug!(
                    target: "client.supervisor",
                    attempt,
                    backoff_secs = backoff.as_secs(),
                    "Waiting before next connection attempt"
                );
                if !self.sleep_or_cancelled(backoff).await {
                    return Err(ClientError::Closed);
                }
            }
        }

        self.set_state(ChannelState::Failed);
        error!(
            target: "client.supervisor",
            attempts = max_attempts,
            "Signaling connection failed, retries exhausted"
        );
        self.emit(SupervisorEvent::SignalingConnectionFailed {
            attempts: max_attempts,
        });
        Err(ClientError::SignalingConnectionFailed {
            attempts: max_attempts,
        })
    }

    /// One open attempt. Returns `true` once the channel is installed.
    async fn try_open(self: &Arc<Self>, attempt: u32) -> bool {
        self.set_state(ChannelState::Connecting);
        match self.transport.open().await {
            Ok(link) => {
                self.install(link);
                self.set_state(ChannelState::Connected);
                info!(target: "client.supervisor", attempt, "Signaling channel connected");
                true
            }
            Err(e) => {
                warn!(
                    target: "client.supervisor",
                    attempt,
                    error = %e,
                    "Signaling connection attempt failed"
                );
                false
            }
        }
    }

    fn install(self: &Arc<Self>, link: SignalingLink) {
        let generation = self.link_generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.outbound.lock().unwrap_or_else(PoisonError::into_inner) = Some(link.outbound);

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            inner.pump(generation, link.inbound).await;
        });
    }

    /// Forward one channel's inbound messages into the stable queue until the
    /// channel ends.
    async fn pump(self: Arc<Self>, generation: u64, mut link_inbound: mpsc::Receiver<ServerMessage>) {
        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => return,
                message = link_inbound.recv() => match message {
                    Some(message) => {
                        // A dropped consumer only loses messages; closure
                        // detection continues.
                        let _ = self.inbound.send(message).await;
                    }
                    None => break,
                },
            }
        }

        self.on_link_closed(generation).await;
    }

    /// Whether `generation` is the installed channel and still counted as up.
    fn is_live_link(&self, generation: u64) -> bool {
        !self.cancel_token.is_cancelled()
            && generation == self.link_generation.load(Ordering::SeqCst)
            && self.current_state() == ChannelState::Connected
    }

    async fn on_link_closed(self: &Arc<Self>, generation: u64) {
        if !self.is_live_link(generation) {
            return;
        }

        // The attempt that installed this channel may still hold the lock. It
        // will not see the closure, so wait for it and check again.
        let guard = match self.attempt_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                let guard = tokio::select! {
                    guard = self.attempt_lock.lock() => guard,
                    () = self.cancel_token.cancelled() => return,
                };
                if !self.is_live_link(generation) {
                    debug!(
                        target: "client.supervisor",
                        generation,
                        "Channel closure already handled"
                    );
                    return;
                }
                guard
            }
        };

        self.take_outbound();
        self.recover(guard).await;
    }

    /// Automatic schedule, then the manual loop. Caller holds `attempt_lock`.
    #[instrument(skip_all, name = "client.supervisor.recover")]
    async fn recover(self: &Arc<Self>, _guard: MutexGuard<'_, ()>) {
        warn!(target: "client.supervisor", "Signaling channel dropped, reconnecting");
        self.set_state(ChannelState::Reconnecting);

        for (index, delay) in self.policy.auto_schedule.iter().enumerate() {
            if !self.sleep_or_cancelled(*delay).await {
                return;
            }
            let attempt = u32::try_from(index + 1).unwrap_or(u32::MAX);
            if self.try_open(attempt).await {
                self.emit(SupervisorEvent::Reconnected);
                return;
            }
            self.set_state(ChannelState::Reconnecting);
        }

        info!(
            target: "client.supervisor",
            automatic_attempts = self.policy.auto_schedule.len(),
            "Automatic reconnect schedule exhausted, starting manual retries"
        );
        if self.manual_retry().await.is_ok() {
            self.emit(SupervisorEvent::Reconnected);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_backoff_doubles() {
        let waits: Vec<u64> = (1..=5)
            .map(|attempt| ReconnectPolicy::manual_backoff(attempt).as_secs())
            .collect();
        assert_eq!(waits, vec![2, 4, 8, 16, 32]);
    }

    #[test]
    fn test_default_policy_matches_default_config() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.auto_schedule.len(), 4);
        assert_eq!(policy.transitional_poll, Duration::from_millis(500));
    }
}
