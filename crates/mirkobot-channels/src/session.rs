use mirkobot_core::{Bus, MirkobotError, Result, SubscriptionId};
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

use crate::link::{ChannelLink, flatten_args};
#[cfg(test)]
use crate::link::RemoteActions;

/// `Disconnected → Connecting → Connected → Disconnected → ...`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionPhase::Disconnected => "disconnected",
            SessionPhase::Connecting => "connecting",
            SessionPhase::Connected => "connected",
        })
    }
}

/// Liveness of one session, shared with its link.
#[derive(Debug)]
pub struct SessionState {
    phase: Mutex<SessionPhase>,
    was_connected: AtomicBool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            phase: Mutex::new(SessionPhase::Disconnected),
            was_connected: AtomicBool::new(false),
        }
    }
}

impl SessionState {
    pub fn phase(&self) -> SessionPhase {
        *self.phase.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.phase() == SessionPhase::Connected
    }

    /// Set once the session first connects; never reset.
    pub fn was_connected(&self) -> bool {
        self.was_connected.load(Ordering::SeqCst)
    }

    pub fn mark_connecting(&self) {
        *self.phase.lock() = SessionPhase::Connecting;
    }

    /// `Connecting → Connected` only. False when the phase moved on (the
    /// link dropped or the session was torn down) before the handshake
    /// finished.
    pub fn finish_connecting(&self) -> bool {
        let mut phase = self.phase.lock();
        if *phase != SessionPhase::Connecting {
            return false;
        }
        *phase = SessionPhase::Connected;
        self.was_connected.store(true, Ordering::SeqCst);
        true
    }

    /// Returns true when this call took the session down from `Connected`.
    pub fn mark_disconnected(&self) -> bool {
        let mut phase = self.phase.lock();
        let was_up = *phase == SessionPhase::Connected;
        *phase = SessionPhase::Disconnected;
        was_up
    }
}

/// Result of handing an established link to its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    Attached,
    /// The session was disconnected while the link was being opened.
    Closed,
    /// The link went down before it could be attached.
    Dropped,
}

/// One supervised channel connection.
pub struct ChannelSession {
    name: String,
    login: String,
    state: Arc<SessionState>,
    link: Mutex<Option<Arc<dyn ChannelLink>>>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
    closed: AtomicBool,
}

impl ChannelSession {
    pub fn new(name: impl Into<String>, login: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            login: login.into(),
            state: Arc::new(SessionState::default()),
            link: Mutex::new(None),
            subscriptions: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn login(&self) -> &str {
        &self.login
    }

    pub fn state(&self) -> &Arc<SessionState> {
        &self.state
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.phase()
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn was_connected(&self) -> bool {
        self.state.was_connected()
    }

    /// True after [`disconnect`](Self::disconnect).
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Install an established link together with the channel-scoped bus
    /// subscriptions registered for it. Unless the outcome is `Attached`,
    /// the subscriptions are removed and the link is closed again.
    pub(crate) fn attach(
        &self,
        bus: &Bus,
        link: Arc<dyn ChannelLink>,
        subscriptions: Vec<SubscriptionId>,
    ) -> AttachOutcome {
        // Serialises against `disconnect`, which takes this lock first.
        let mut slot = self.link.lock();
        let outcome = if self.is_closed() {
            AttachOutcome::Closed
        } else if !self.state.finish_connecting() {
            AttachOutcome::Dropped
        } else {
            self.subscriptions.lock().extend(subscriptions);
            *slot = Some(link);
            return AttachOutcome::Attached;
        };
        drop(slot);

        for id in subscriptions {
            bus.unsubscribe(id);
        }
        link.close();
        self.state.mark_disconnected();
        outcome
    }

    pub fn send(&self, message: &str, priority: bool) -> Result<()> {
        if message.trim().is_empty() {
            return Err(MirkobotError::channel(&self.name, "refusing to send an empty message"));
        }
        if !self.is_connected() {
            return Err(MirkobotError::ChannelNotConnected(self.name.clone()));
        }
        let link = self.link.lock().clone();
        match link {
            Some(link) => link.send(message, priority),
            None => Err(MirkobotError::ChannelNotConnected(self.name.clone())),
        }
    }

    /// Run a remote action. `None` when the command resolves to nothing on
    /// this channel (or there is no link yet).
    pub fn execute(&self, command: &str, args: &[Value]) -> Option<Result<Value>> {
        let link = self.link.lock().clone()?;
        let Some(action) = link.resolve(command) else {
            debug!(channel = %self.name, command = %command, "no remote action for command");
            return None;
        };
        let args = flatten_args(args);
        debug!(channel = %self.name, action = %action, args = ?args, "executing remote action");
        Some(link.invoke(&action, args))
    }

    /// Drop bus subscriptions and close the link. Idempotent.
    pub fn disconnect(&self, bus: &Bus) {
        let link = {
            let mut slot = self.link.lock();
            if self.closed.swap(true, Ordering::SeqCst) {
                return;
            }
            for id in self.subscriptions.lock().drain(..) {
                bus.unsubscribe(id);
            }
            slot.take()
        };
        if let Some(link) = link {
            link.close();
        }
        self.state.mark_disconnected();
    }
}

impl fmt::Debug for ChannelSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSession")
            .field("name", &self.name)
            .field("login", &self.login)
            .field("phase", &self.phase())
            .field("was_connected", &self.was_connected())
            .finish()
    }
}
