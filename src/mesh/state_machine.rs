//! Per-peer connection lifecycle
//!
//! One machine per remote peer. Transitions outside the table are rejected
//! and logged, never coerced. Reconnect timers are fire-and-forget tasks
//! that re-read the state when they fire, so a manual transition arriving
//! first silently invalidates the pending retry.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::constants::{BASE_RECONNECT_DELAY_MS, MAX_RECONNECT_ATTEMPTS, MAX_RECONNECT_DELAY_MS};
use crate::events::EventEmitter;
use crate::PeerId;

/// Connection lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
    Closed,
}

impl ConnectionState {
    fn can_transition_to(self, to: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, to),
            (Disconnected, Connecting)
                | (Connecting, Connected | Failed | Disconnected)
                | (Connected, Disconnected | Reconnecting | Closed)
                | (Reconnecting, Connected | Failed | Disconnected)
                | (Failed, Disconnected | Reconnecting)
                | (Closed, Disconnected)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Lifecycle events emitted by a state machine
#[derive(Debug, Clone, PartialEq)]
pub enum MachineEvent {
    StateChanged {
        peer_id: PeerId,
        from: ConnectionState,
        to: ConnectionState,
    },
    ReconnectScheduled {
        peer_id: PeerId,
        attempt: u32,
        delay: Duration,
    },
    ReconnectAttempt {
        peer_id: PeerId,
        attempt: u32,
    },
    /// Automatic retries are exhausted; the owner must decide what to do
    ReconnectExhausted {
        peer_id: PeerId,
    },
}

/// Exponential backoff parameters for automatic reconnection
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    /// `min(base * 2^(attempt - 1), max)` for 1-based attempts
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << (attempt.saturating_sub(1)).min(16);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RECONNECT_ATTEMPTS,
            base_delay: Duration::from_millis(BASE_RECONNECT_DELAY_MS),
            max_delay: Duration::from_millis(MAX_RECONNECT_DELAY_MS),
        }
    }
}

struct MachineInner {
    state: ConnectionState,
    attempts: u32,
    last_error: Option<String>,
}

/// Lifecycle state machine for one remote peer connection
pub struct ConnectionStateMachine {
    peer_id: PeerId,
    policy: ReconnectPolicy,
    inner: Mutex<MachineInner>,
    events: EventEmitter<MachineEvent>,
}

enum EntryAction {
    None,
    Schedule { attempt: u32, delay: Duration },
    Exhausted,
}

impl ConnectionStateMachine {
    pub fn new(peer_id: impl Into<PeerId>, policy: ReconnectPolicy) -> Arc<Self> {
        Arc::new(Self {
            peer_id: peer_id.into(),
            policy,
            inner: Mutex::new(MachineInner {
                state: ConnectionState::Disconnected,
                attempts: 0,
                last_error: None,
            }),
            events: EventEmitter::new(),
        })
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn events(&self) -> &EventEmitter<MachineEvent> {
        &self.events
    }

    /// Attempt a transition. Illegal transitions are rejected with a logged
    /// warning and leave the state unchanged.
    pub fn transition(self: &Arc<Self>, to: ConnectionState) -> bool {
        self.transition_with_error(to, None)
    }

    /// Transition carrying a failure description (kept as the last error)
    pub fn transition_with_error(self: &Arc<Self>, to: ConnectionState, error: Option<String>) -> bool {
        let (from, action) = {
            let mut inner = self.inner.lock();
            let from = inner.state;
            if !from.can_transition_to(to) {
                tracing::warn!("[{}] Invalid transition: {} -> {}", self.peer_id, from, to);
                return false;
            }

            inner.state = to;
            if let Some(error) = error {
                inner.last_error = Some(error);
            }

            let action = match to {
                ConnectionState::Connected => {
                    // A successful connection fully forgives prior failures
                    inner.attempts = 0;
                    inner.last_error = None;
                    EntryAction::None
                }
                ConnectionState::Closed => {
                    inner.attempts = 0;
                    inner.last_error = None;
                    EntryAction::None
                }
                ConnectionState::Failed => {
                    if inner.attempts < self.policy.max_attempts {
                        inner.attempts += 1;
                        EntryAction::Schedule {
                            attempt: inner.attempts,
                            delay: self.policy.delay_for(inner.attempts),
                        }
                    } else {
                        EntryAction::Exhausted
                    }
                }
                _ => EntryAction::None,
            };
            (from, action)
        };

        tracing::debug!("[{}] {} -> {}", self.peer_id, from, to);
        self.events.emit(&MachineEvent::StateChanged {
            peer_id: self.peer_id.clone(),
            from,
            to,
        });

        match action {
            EntryAction::None => {}
            EntryAction::Schedule { attempt, delay } => self.schedule_reconnect(attempt, delay),
            EntryAction::Exhausted => {
                tracing::error!("[{}] Max reconnection attempts reached", self.peer_id);
                self.events.emit(&MachineEvent::ReconnectExhausted {
                    peer_id: self.peer_id.clone(),
                });
            }
        }
        true
    }

    fn schedule_reconnect(self: &Arc<Self>, attempt: u32, delay: Duration) {
        tracing::info!(
            "[{}] Reconnecting in {:?} (attempt {}/{})",
            self.peer_id,
            delay,
            attempt,
            self.policy.max_attempts
        );
        self.events.emit(&MachineEvent::ReconnectScheduled {
            peer_id: self.peer_id.clone(),
            attempt,
            delay,
        });

        let machine = Arc::clone(self);
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("[{}] No runtime to schedule reconnect", self.peer_id);
            return;
        };
        handle.spawn(async move {
            tokio::time::sleep(delay).await;
            // A transition that happened in the meantime wins; the timer
            // only acts if the machine is still failed.
            if machine.state() == ConnectionState::Failed
                && machine.transition(ConnectionState::Reconnecting)
            {
                machine.events.emit(&MachineEvent::ReconnectAttempt {
                    peer_id: machine.peer_id.clone(),
                    attempt,
                });
            }
        });
    }

    /// Manual reconnect: resets the attempt counter, then forces a
    /// `reconnecting` transition. Refused while connected.
    pub fn request_reconnect(self: &Arc<Self>) -> bool {
        if self.state() == ConnectionState::Connected {
            tracing::warn!("[{}] Already connected", self.peer_id);
            return false;
        }
        self.inner.lock().attempts = 0;
        self.transition(ConnectionState::Reconnecting)
    }

    /// Force the machine back to `disconnected` for reuse
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = ConnectionState::Disconnected;
        inner.attempts = 0;
        inner.last_error = None;
        tracing::debug!("[{}] Reset to disconnected", self.peer_id);
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Connecting, connected, or reconnecting
    pub fn is_active(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::Connecting | ConnectionState::Connected | ConnectionState::Reconnecting
        )
    }

    pub fn attempts(&self) -> u32 {
        self.inner.lock().attempts
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.lock().last_error.clone()
    }
}
