//! In-memory connector for tests and dry runs. Records every send and
//! remote action instead of touching the network.

use async_trait::async_trait;
use mirkobot_core::{MirkobotError, Result};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::inbound::{self, InboundMessage};
use crate::link::{ChannelLink, ConnectRequest, Connector, RemoteActions};

/// Actions every mock link answers to.
pub const MOCK_ACTIONS: &[&str] = &["doPrivateMessage", "ping", "shout"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub channel: String,
    pub body: String,
    pub priority: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedAction {
    pub channel: String,
    pub action: String,
    pub args: Vec<Value>,
}

#[derive(Default)]
struct Journal {
    sent: Mutex<Vec<SentMessage>>,
    executed: Mutex<Vec<ExecutedAction>>,
}

#[derive(Default)]
pub struct MockConnector {
    refused: Mutex<HashSet<String>>,
    refuse_all: AtomicBool,
    drop_on_connect: Mutex<HashSet<String>>,
    delay: Mutex<Option<Duration>>,
    attempts: Mutex<HashMap<String, usize>>,
    live: Mutex<HashMap<String, (Arc<MockLink>, ConnectRequest)>>,
    journal: Arc<Journal>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make connects to `channel` fail (or succeed again).
    pub fn refuse(&self, channel: &str, refuse: bool) {
        let mut refused = self.refused.lock();
        if refuse {
            refused.insert(channel.to_string());
        } else {
            refused.remove(channel);
        }
    }

    pub fn refuse_all(&self, refuse: bool) {
        self.refuse_all.store(refuse, Ordering::SeqCst);
    }

    /// Let the server hang up on `channel` right after the handshake, before
    /// the session has taken the link over.
    pub fn drop_on_connect(&self, channel: &str, drop: bool) {
        let mut dropping = self.drop_on_connect.lock();
        if drop {
            dropping.insert(channel.to_string());
        } else {
            dropping.remove(channel);
        }
    }

    /// Stall every connect by `delay` before answering.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    /// Connect attempts seen for `channel`, successful or not.
    pub fn attempts(&self, channel: &str) -> usize {
        self.attempts.lock().get(channel).copied().unwrap_or(0)
    }

    pub fn link(&self, channel: &str) -> Option<Arc<MockLink>> {
        self.live.lock().get(channel).map(|(link, _)| Arc::clone(link))
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.journal.sent.lock().clone()
    }

    pub fn executed(&self) -> Vec<ExecutedAction> {
        self.journal.executed.lock().clone()
    }

    /// Simulate the server dropping the connection. The session notices
    /// through its shared state, exactly as with a real socket.
    pub fn drop_connection(&self, channel: &str) -> bool {
        let Some((link, request)) = self.live.lock().remove(channel) else {
            return false;
        };
        link.close();
        request.state.mark_disconnected()
    }

    /// Publish an inbound chat line as if it arrived on `channel`.
    /// Returns the number of handlers reached.
    pub fn deliver(&self, channel: &str, message: InboundMessage) -> usize {
        let request = match self.live.lock().get(channel) {
            Some((_, request)) => request.clone(),
            None => return 0,
        };
        inbound::publish(&request.bus, channel, &request.credentials.login, &message)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, request: ConnectRequest) -> Result<Arc<dyn ChannelLink>> {
        let channel = request.channel.clone();
        *self.attempts.lock().entry(channel.clone()).or_default() += 1;

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.refuse_all.load(Ordering::SeqCst) || self.refused.lock().contains(&channel) {
            return Err(MirkobotError::channel(&channel, "connection refused"));
        }

        let link = Arc::new(MockLink {
            channel: channel.clone(),
            closed: AtomicBool::new(false),
            journal: Arc::clone(&self.journal),
        });
        if self.drop_on_connect.lock().contains(&channel) {
            link.close();
            request.state.mark_disconnected();
            return Ok(link);
        }
        self.live.lock().insert(channel, (Arc::clone(&link), request));
        Ok(link)
    }
}

pub struct MockLink {
    channel: String,
    closed: AtomicBool,
    journal: Arc<Journal>,
}

impl MockLink {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl RemoteActions for MockLink {
    fn has_action(&self, name: &str) -> bool {
        MOCK_ACTIONS.contains(&name)
    }

    fn invoke(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        if self.is_closed() {
            return Err(MirkobotError::ChannelNotConnected(self.channel.clone()));
        }
        self.journal.executed.lock().push(ExecutedAction {
            channel: self.channel.clone(),
            action: name.to_string(),
            args: args.clone(),
        });
        Ok(json!({ "action": name, "args": args }))
    }
}

impl ChannelLink for MockLink {
    fn send(&self, message: &str, priority: bool) -> Result<()> {
        if self.is_closed() {
            return Err(MirkobotError::ChannelNotConnected(self.channel.clone()));
        }
        self.journal.sent.lock().push(SentMessage {
            channel: self.channel.clone(),
            body: message.to_string(),
            priority,
        });
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
