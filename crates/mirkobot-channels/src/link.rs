//! Transport seam between a channel session and the wire.

use async_trait::async_trait;
use mirkobot_core::{Bus, Result};
use serde_json::Value;
use std::sync::Arc;

use crate::session::SessionState;
use crate::token::Credentials;

/// Everything a connector needs to open one channel.
#[derive(Clone)]
pub struct ConnectRequest {
    pub server: String,
    pub channel: String,
    pub credentials: Credentials,
    /// Inbound traffic is published here.
    pub bus: Bus,
    /// Shared with the session; the link flips it to disconnected on drop.
    pub state: Arc<SessionState>,
    pub queue_capacity: usize,
}

/// Opens links. The supervisor bounds each call with its connect timeout.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, request: ConnectRequest) -> Result<Arc<dyn ChannelLink>>;
}

/// Named operations a link can perform on request (`channel::<name>::execute`).
pub trait RemoteActions {
    fn has_action(&self, name: &str) -> bool;

    fn invoke(&self, name: &str, args: Vec<Value>) -> Result<Value>;

    /// First of [`action_candidates`] this link answers to.
    fn resolve(&self, command: &str) -> Option<String> {
        action_candidates(command)
            .into_iter()
            .find(|candidate| self.has_action(candidate))
    }
}

/// An established connection to one channel.
pub trait ChannelLink: RemoteActions + Send + Sync {
    /// Queue a chat message. Priority messages jump the normal queue.
    fn send(&self, message: &str, priority: bool) -> Result<()>;

    /// Tear the connection down. Safe to call more than once.
    fn close(&self);
}

/// Lookup order for a command: `do<Command>`, then camelCase, then literal.
pub fn action_candidates(command: &str) -> Vec<String> {
    let camel = camel_case(command);
    let mut prefixed = String::with_capacity(camel.len() + 2);
    prefixed.push_str("do");
    let mut chars = camel.chars();
    if let Some(first) = chars.next() {
        prefixed.extend(first.to_uppercase());
        prefixed.push_str(chars.as_str());
    }

    let mut out = vec![prefixed, camel, command.to_string()];
    out.dedup();
    out.retain(|c| c != "do" && !c.is_empty());
    out
}

/// `private-message`, `PRIVATE_MESSAGE`, `Private Message` → `privateMessage`.
pub fn camel_case(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for (i, word) in words(input).iter().enumerate() {
        let lower = word.to_lowercase();
        if i == 0 {
            out.push_str(&lower);
        } else {
            let mut chars = lower.chars();
            if let Some(first) = chars.next() {
                out.extend(first.to_uppercase());
                out.push_str(chars.as_str());
            }
        }
    }
    out
}

/// Split on separators and case boundaries (`fooBar`, `HTTPServer`, `v2Beta`).
fn words(input: &str) -> Vec<String> {
    let chars: Vec<char> = input.chars().collect();
    let mut words = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            continue;
        }
        if let Some(prev) = current.chars().last() {
            let next = chars.get(i + 1).copied();
            let boundary = ((prev.is_lowercase() || prev.is_numeric()) && c.is_uppercase())
                || (prev.is_uppercase()
                    && c.is_uppercase()
                    && next.is_some_and(|n| n.is_lowercase()));
            if boundary {
                words.push(std::mem::take(&mut current));
            }
        }
        current.push(c);
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// Flatten nested arrays into one positional argument list.
pub fn flatten_args(args: &[Value]) -> Vec<Value> {
    fn walk(v: &Value, out: &mut Vec<Value>) {
        match v {
            Value::Array(items) => items.iter().for_each(|i| walk(i, out)),
            other => out.push(other.clone()),
        }
    }
    let mut out = Vec::with_capacity(args.len());
    args.iter().for_each(|a| walk(a, &mut out));
    out
}
