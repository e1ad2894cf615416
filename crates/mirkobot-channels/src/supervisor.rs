use mirkobot_config::SupervisorConfig;
use mirkobot_core::{Bus, MirkobotError, Result, SubscriptionId, topics};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::BackoffPolicy;
use crate::link::{ConnectRequest, Connector};
use crate::session::{AttachOutcome, ChannelSession, SessionPhase};
use crate::token::Credentials;

/// Timing knobs of the supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub sweep_interval: Duration,
    pub connect_timeout: Duration,
    pub backoff: BackoffPolicy,
    pub outbound_queue: usize,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self::from(&SupervisorConfig::default())
    }
}

impl From<&SupervisorConfig> for SupervisorSettings {
    fn from(config: &SupervisorConfig) -> Self {
        Self {
            sweep_interval: Duration::from_secs(config.sweep_interval_secs.max(1)),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs.max(1)),
            backoff: BackoffPolicy::from_config(config),
            outbound_queue: config.outbound_queue.max(1),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Retry {
    failures: u32,
    not_before: Instant,
}

struct SupervisorInner {
    bus: Bus,
    connector: Arc<dyn Connector>,
    server: String,
    credentials: Credentials,
    settings: SupervisorSettings,
    /// Guards every join/leave. Never held across an await.
    sessions: Mutex<BTreeMap<String, Arc<ChannelSession>>>,
    retries: Mutex<HashMap<String, Retry>>,
    sweep: Mutex<Option<CancellationToken>>,
}

/// Owns all channel sessions, keeps them alive and routes sends to them.
#[derive(Clone)]
pub struct ConnectionSupervisor {
    inner: Arc<SupervisorInner>,
}

impl ConnectionSupervisor {
    pub fn new(
        bus: Bus,
        connector: Arc<dyn Connector>,
        server: impl Into<String>,
        credentials: Credentials,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                bus,
                connector,
                server: server.into(),
                credentials,
                settings,
                sessions: Mutex::new(BTreeMap::new()),
                retries: Mutex::new(HashMap::new()),
                sweep: Mutex::new(None),
            }),
        }
    }

    pub fn login(&self) -> &str {
        &self.inner.credentials.login
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.inner.settings
    }

    pub fn downgrade(&self) -> WeakSupervisor {
        WeakSupervisor(Arc::downgrade(&self.inner))
    }

    // ── Session set ────────────────────────────────────────────

    pub fn has_channel(&self, name: &str) -> bool {
        self.inner.sessions.lock().contains_key(name)
    }

    pub fn session(&self, name: &str) -> Option<Arc<ChannelSession>> {
        self.inner.sessions.lock().get(name).cloned()
    }

    /// Joined channel names, sorted.
    pub fn channels(&self) -> Vec<String> {
        self.inner.sessions.lock().keys().cloned().collect()
    }

    pub fn connected_count(&self) -> usize {
        self.inner
            .sessions
            .lock()
            .values()
            .filter(|s| s.is_connected())
            .count()
    }

    /// Join a channel. Returns the existing session when already joined;
    /// otherwise the connect runs in the background. Names that would not
    /// fit in one topic segment are rejected.
    pub fn join(&self, name: &str) -> Result<Arc<ChannelSession>> {
        if !topics::is_valid_channel_name(name) {
            return Err(MirkobotError::channel(name, "invalid channel name"));
        }
        let session = {
            let mut sessions = self.inner.sessions.lock();
            if let Some(existing) = sessions.get(name) {
                return Ok(Arc::clone(existing));
            }
            let session = Arc::new(ChannelSession::new(name, self.login()));
            session.state().mark_connecting();
            sessions.insert(name.to_string(), Arc::clone(&session));
            session
        };

        let supervisor = self.clone();
        let connecting = Arc::clone(&session);
        tokio::spawn(async move { supervisor.connect(connecting).await });
        Ok(session)
    }

    async fn connect(&self, session: Arc<ChannelSession>) {
        let name = session.name().to_string();
        let login = session.login().to_string();
        let request = ConnectRequest {
            server: self.inner.server.clone(),
            channel: name.clone(),
            credentials: self.inner.credentials.clone(),
            bus: self.inner.bus.clone(),
            state: Arc::clone(session.state()),
            queue_capacity: self.inner.settings.outbound_queue,
        };

        let timeout = self.inner.settings.connect_timeout;
        let outcome = match tokio::time::timeout(timeout, self.inner.connector.connect(request)).await {
            Ok(result) => result,
            Err(_) => Err(MirkobotError::ConnectTimeout(name.clone())),
        };

        let link = match outcome {
            Ok(link) => link,
            Err(e) => {
                session.state().mark_disconnected();
                let failures = self.record_failure(&name);
                warn!(channel = %name, login = %login, error = %e, failures, "channel connect failed");
                return;
            }
        };

        // The session may have been left (or replaced by a rejoin) meanwhile.
        if !self.is_current(&session) {
            debug!(channel = %name, "session left while connecting, dropping link");
            link.close();
            return;
        }

        let subscriptions = match self.register_channel_topics(&name) {
            Ok(ids) => ids,
            Err(e) => {
                warn!(channel = %name, error = %e, "failed to register channel topics");
                Vec::new()
            }
        };
        match session.attach(&self.inner.bus, link, subscriptions) {
            AttachOutcome::Attached => {
                self.inner.retries.lock().remove(&name);
                info!(channel = %name, login = %login, "Connected '{login}' to #{name} channel");
            }
            AttachOutcome::Closed => {
                debug!(channel = %name, "session left while attaching, dropping link");
            }
            AttachOutcome::Dropped => {
                let failures = self.record_failure(&name);
                warn!(channel = %name, login = %login, failures, "channel dropped during handshake");
            }
        }
    }

    fn is_current(&self, session: &Arc<ChannelSession>) -> bool {
        !session.is_closed()
            && self
                .inner
                .sessions
                .lock()
                .get(session.name())
                .is_some_and(|current| Arc::ptr_eq(current, session))
    }

    /// `channel::<name>::send`, `::send::priority` and `::execute`.
    fn register_channel_topics(&self, name: &str) -> Result<Vec<SubscriptionId>> {
        let bus = &self.inner.bus;
        let mut ids = Vec::with_capacity(3);

        for priority in [false, true] {
            let topic = if priority {
                topics::channel_send_priority(name)
            } else {
                topics::channel_send(name)
            };
            let weak = Arc::downgrade(&self.inner);
            let channel = name.to_string();
            ids.push(bus.subscribe(&topic, move |env| {
                let Some(supervisor) = upgrade(&weak) else {
                    return Ok(());
                };
                let message = message_arg(env.arg(0));
                if let Some(Err(e)) = supervisor.send_message(&message, Some(&channel), priority).remove(&channel) {
                    return Err(e);
                }
                Ok(())
            })?);
        }

        let weak = Arc::downgrade(&self.inner);
        let channel = name.to_string();
        ids.push(bus.subscribe(&topics::channel_execute(name), move |env| {
            let Some(supervisor) = upgrade(&weak) else {
                return Ok(());
            };
            let Some(command) = env.str_arg(0) else {
                return Ok(());
            };
            let args = env.args.get(1..).unwrap_or_default();
            if let Some(Some(Err(e))) = supervisor.execute(command, args, Some(&channel)).remove(&channel) {
                return Err(e);
            }
            Ok(())
        })?);

        Ok(ids)
    }

    fn record_failure(&self, name: &str) -> u32 {
        let mut retries = self.inner.retries.lock();
        let failures = retries.get(name).map_or(0, |r| r.failures) + 1;
        let delay = self.inner.settings.backoff.delay(failures);
        retries.insert(
            name.to_string(),
            Retry {
                failures,
                not_before: Instant::now() + delay,
            },
        );
        failures
    }

    /// Consecutive failed connects recorded for a channel.
    pub fn failures(&self, name: &str) -> u32 {
        self.inner.retries.lock().get(name).map_or(0, |r| r.failures)
    }

    /// Leave a channel. Refused (returns false) unless `force` is set or more
    /// than one channel is currently connected.
    pub fn leave(&self, name: &str, force: bool) -> bool {
        let session = {
            let mut sessions = self.inner.sessions.lock();
            if !force {
                let connected = sessions.values().filter(|s| s.is_connected()).count();
                if connected <= 1 {
                    debug!(channel = %name, connected, "refusing to leave the last connected channel");
                    return false;
                }
            }
            match sessions.remove(name) {
                Some(session) => session,
                None => return false,
            }
        };

        let login = session.login();
        if session.was_connected() {
            info!(channel = %name, login = %login, "Disconnected '{login}' from #{name} channel");
        } else {
            info!(channel = %name, login = %login, "Cannot connected '{login}' to #{name} channel");
        }
        session.disconnect(&self.inner.bus);
        true
    }

    /// Forced leave immediately followed by a join of the same name.
    pub fn rejoin(&self, name: &str) -> Result<Arc<ChannelSession>> {
        self.leave(name, true);
        self.join(name)
    }

    /// Force-leave every channel.
    pub fn leave_all(&self) -> usize {
        self.channels()
            .iter()
            .filter(|name| self.leave(name, true))
            .count()
    }

    // ── Health sweep ───────────────────────────────────────────

    /// Schedule a rejoin for every disconnected session whose backoff has
    /// elapsed. Rejoins run as separate tasks. Returns the scheduled names.
    pub fn sweep(&self) -> Vec<String> {
        let now = Instant::now();
        let candidates: Vec<String> = self
            .inner
            .sessions
            .lock()
            .values()
            .filter(|s| s.phase() == SessionPhase::Disconnected)
            .map(|s| s.name().to_string())
            .collect();

        let due: Vec<String> = {
            let retries = self.inner.retries.lock();
            candidates
                .into_iter()
                .filter(|name| retries.get(name).is_none_or(|r| r.not_before <= now))
                .collect()
        };

        for name in &due {
            debug!(channel = %name, "scheduling rejoin");
            let supervisor = self.clone();
            let name = name.clone();
            tokio::spawn(async move {
                if let Err(e) = supervisor.rejoin(&name) {
                    warn!(channel = %name, error = %e, "rejoin failed");
                }
            });
        }
        due
    }

    /// Start the periodic sweep. Returns false when already running.
    pub fn start_sweep(&self) -> bool {
        let mut slot = self.inner.sweep.lock();
        if slot.is_some() {
            return false;
        }
        let token = CancellationToken::new();
        *slot = Some(token.clone());

        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.settings.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await; // consume initial tick
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(supervisor) = upgrade(&weak) else { break };
                        supervisor.sweep();
                    }
                }
            }
            debug!("health sweep stopped");
        });
        info!(interval_secs = period.as_secs(), "health sweep started");
        true
    }

    /// Idempotent.
    pub fn stop_sweep(&self) {
        if let Some(token) = self.inner.sweep.lock().take() {
            token.cancel();
        }
    }

    pub fn is_sweeping(&self) -> bool {
        self.inner.sweep.lock().is_some()
    }

    // ── Outbound ───────────────────────────────────────────────

    /// Send to one channel, or to all when `channel` is `None`. The map has
    /// an entry per channel reached; a targeted send to an unknown channel
    /// yields an empty map.
    pub fn send_message(
        &self,
        message: &str,
        channel: Option<&str>,
        priority: bool,
    ) -> BTreeMap<String, Result<()>> {
        self.targets(channel)
            .into_iter()
            .map(|s| (s.name().to_string(), s.send(message, priority)))
            .collect()
    }

    /// Run a remote action on one channel, or on all. `None` values mark
    /// channels where the command resolved to nothing.
    pub fn execute(
        &self,
        command: &str,
        args: &[Value],
        channel: Option<&str>,
    ) -> BTreeMap<String, Option<Result<Value>>> {
        self.targets(channel)
            .into_iter()
            .map(|s| (s.name().to_string(), s.execute(command, args)))
            .collect()
    }

    fn targets(&self, channel: Option<&str>) -> Vec<Arc<ChannelSession>> {
        let sessions = self.inner.sessions.lock();
        match channel {
            Some(name) => sessions.get(name).cloned().into_iter().collect(),
            None => sessions.values().cloned().collect(),
        }
    }
}

/// Non-owning handle, for bus handlers that must not keep the supervisor alive.
#[derive(Clone)]
pub struct WeakSupervisor(Weak<SupervisorInner>);

impl WeakSupervisor {
    pub fn upgrade(&self) -> Option<ConnectionSupervisor> {
        upgrade(&self.0)
    }
}

fn upgrade(weak: &Weak<SupervisorInner>) -> Option<ConnectionSupervisor> {
    weak.upgrade().map(|inner| ConnectionSupervisor { inner })
}

/// Chat text from a bus argument; non-strings are sent as JSON.
pub(crate) fn message_arg(arg: Option<&Value>) -> String {
    match arg {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

impl std::fmt::Debug for ConnectionSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSupervisor")
            .field("login", &self.login())
            .field("channels", &self.channels())
            .field("sweeping", &self.is_sweeping())
            .finish()
    }
}
