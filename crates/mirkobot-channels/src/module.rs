//! The `mirkoczat` kernel module: exposes the connection supervisor on the bus.

use mirkobot_core::{Envelope, Result, SubscriptionId, topics};
use mirkobot_kernel::{Module, ModuleContext, ModuleDefinition, PhaseResult, outcome};
use parking_lot::Mutex;
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

use crate::link::Connector;
use crate::phoenix::PhoenixConnector;
use crate::supervisor::{ConnectionSupervisor, SupervisorSettings, WeakSupervisor, message_arg};
use crate::token::Credentials;

pub const NAME: &str = "mirkoczat";

/// Channel joined when the `channels` property is absent.
const DEFAULT_CHANNELS: &[&str] = &["hydepark"];

pub struct Mirkoczat {
    ctx: ModuleContext,
    supervisor: ConnectionSupervisor,
    prepared: AtomicBool,
    running: AtomicBool,
    subscriptions: Mutex<Vec<SubscriptionId>>,
}

impl Mirkoczat {
    pub fn new(ctx: ModuleContext, connector: Arc<dyn Connector>) -> Self {
        let config = ctx.properties().snapshot();
        let credentials = Credentials::from_token(config.token.as_deref().unwrap_or_default());
        let supervisor = ConnectionSupervisor::new(
            ctx.bus().clone(),
            connector,
            config.server.clone(),
            credentials,
            SupervisorSettings::from(&config.supervisor),
        );
        Self {
            ctx,
            supervisor,
            prepared: AtomicBool::new(false),
            running: AtomicBool::new(false),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Registry entry using the websocket transport.
    pub fn definition() -> ModuleDefinition {
        Self::definition_with(Arc::new(PhoenixConnector::new()))
    }

    pub fn definition_with(connector: Arc<dyn Connector>) -> ModuleDefinition {
        ModuleDefinition::factory(move |ctx| Ok(Mirkoczat::new(ctx, Arc::clone(&connector))))
    }

    pub fn supervisor(&self) -> &ConnectionSupervisor {
        &self.supervisor
    }

    fn subscribe_bus(&self) -> Result<Vec<SubscriptionId>> {
        let bus = self.ctx.bus();
        let weak = self.supervisor.downgrade();

        let on = |topic: &str, f: fn(&ConnectionSupervisor, &Envelope)| {
            let weak: WeakSupervisor = weak.clone();
            bus.subscribe(topic, move |env| {
                if let Some(supervisor) = weak.upgrade() {
                    f(&supervisor, env);
                }
                Ok(())
            })
        };

        Ok(vec![
            on(topics::BROADCAST_SEND, |s, env| broadcast(s, env, false))?,
            on(topics::BROADCAST_SEND_PRIORITY, |s, env| broadcast(s, env, true))?,
            on(topics::BROADCAST_EXECUTE, |s, env| {
                let Some(command) = env.str_arg(0) else { return };
                let args = env.args.get(1..).unwrap_or_default();
                for (channel, result) in s.execute(command, args, None) {
                    if let Some(Err(e)) = result {
                        debug!(channel = %channel, command = %command, error = %e, "remote action failed");
                    }
                }
            })?,
            on(topics::JOIN, |s, env| {
                let Some(name) = env.str_arg(0) else { return };
                if let Err(e) = s.join(name) {
                    warn!(channel = %name, error = %e, "join request rejected");
                }
            })?,
            on(topics::LEAVE, |s, env| {
                if let Some(name) = env.str_arg(0) {
                    let force = env.arg(1).and_then(Value::as_bool).unwrap_or(false);
                    s.leave(name, force);
                }
            })?,
        ])
    }
}

fn broadcast(supervisor: &ConnectionSupervisor, env: &Envelope, priority: bool) {
    let message = message_arg(env.arg(0));
    for (channel, result) in supervisor.send_message(&message, None, priority) {
        if let Err(e) = result {
            debug!(channel = %channel, error = %e, "broadcast send failed");
        }
    }
}

impl Module for Mirkoczat {
    fn prepare(&self, _args: &[Value]) -> PhaseResult {
        let ok = match self.ctx.properties().require(&["server", "token"]) {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "mirkoczat cannot start");
                false
            }
        };
        self.prepared.store(ok, Ordering::SeqCst);
        outcome(ok)
    }

    fn is_prepared(&self) -> PhaseResult {
        outcome(self.prepared.load(Ordering::SeqCst))
    }

    fn run(&self, _args: &[Value]) -> PhaseResult {
        if self.running.swap(true, Ordering::SeqCst) {
            return outcome(true);
        }

        match self.subscribe_bus() {
            Ok(ids) => self.subscriptions.lock().extend(ids),
            Err(e) => {
                error!(error = %e, "failed to subscribe mirkoczat topics");
                return outcome(false);
            }
        }
        self.supervisor.start_sweep();

        let channels: Vec<String> = self.ctx.property_or(
            "channels",
            DEFAULT_CHANNELS.iter().map(|c| c.to_string()).collect(),
        );
        info!(login = %self.supervisor.login(), channels = ?channels, "joining channels");
        for name in &channels {
            if let Err(e) = self.supervisor.join(name) {
                warn!(channel = %name, error = %e, "skipping channel");
            }
        }
        outcome(true)
    }

    fn stop(&self, _args: &[Value]) -> PhaseResult {
        self.running.store(false, Ordering::SeqCst);
        for id in self.subscriptions.lock().drain(..) {
            self.ctx.bus().unsubscribe(id);
        }
        self.supervisor.stop_sweep();
        let left = self.supervisor.leave_all();
        debug!(left, "mirkoczat stopped");
        outcome(true)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
