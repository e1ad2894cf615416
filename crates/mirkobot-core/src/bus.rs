use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::{error, trace, warn};

use crate::Result;
use crate::topic::{self, Segment, TopicPattern};

/// A message delivered to a handler: the concrete topic it was emitted on
/// plus the positional arguments passed to [`Bus::emit`].
#[derive(Debug, Clone)]
pub struct Envelope {
    pub topic: String,
    pub args: Vec<Value>,
}

impl Envelope {
    pub fn new(topic: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            topic: topic.into(),
            args,
        }
    }

    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    pub fn str_arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).and_then(Value::as_str)
    }

    /// Segment of the emitted topic at `index` (useful with wildcard patterns).
    pub fn segment(&self, index: usize) -> Option<&str> {
        topic::split(&self.topic).nth(index)
    }
}

/// Callback invoked for every matching emit.
///
/// Handlers are identified by pointer, so registering the same `Handler`
/// under several patterns lets [`Bus::off_any`] remove all of them at once.
pub type Handler = Arc<dyn Fn(&Envelope) -> Result<()> + Send + Sync>;

/// Wrap a closure into a [`Handler`].
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&Envelope) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

fn same_handler(a: &Handler, b: &Handler) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Handle returned by [`Bus::on`]. Ids grow monotonically, which is what
/// gives registration-order dispatch across patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

struct Subscription {
    id: SubscriptionId,
    handler: Handler,
}

/// Trie node keyed by pattern segment. Subscriptions live on the node where
/// their pattern ends.
#[derive(Default)]
struct Node {
    literals: HashMap<String, Node>,
    wildcard: Option<Box<Node>>,
    subscriptions: Vec<Subscription>,
}

impl Node {
    fn insert(&mut self, segments: &[Segment], sub: Subscription) {
        match segments.split_first() {
            None => self.subscriptions.push(sub),
            Some((Segment::Literal(lit), rest)) => self
                .literals
                .entry(lit.clone())
                .or_default()
                .insert(rest, sub),
            Some((Segment::Wildcard, rest)) => self
                .wildcard
                .get_or_insert_with(Box::default)
                .insert(rest, sub),
        }
    }

    fn collect(&self, parts: &[&str], out: &mut Vec<(SubscriptionId, Handler)>) {
        match parts.split_first() {
            None => out.extend(
                self.subscriptions
                    .iter()
                    .map(|s| (s.id, Arc::clone(&s.handler))),
            ),
            Some((head, rest)) => {
                if let Some(child) = self.literals.get(*head) {
                    child.collect(rest, out);
                }
                if let Some(child) = &self.wildcard {
                    child.collect(rest, out);
                }
            }
        }
    }

    /// Remove subscriptions at the node addressed by `segments` for which
    /// `pred` holds, at most `limit` of them. Prunes emptied branches.
    fn remove_at(
        &mut self,
        segments: &[Segment],
        pred: &dyn Fn(&Subscription) -> bool,
        limit: usize,
        removed: &mut Vec<SubscriptionId>,
    ) {
        match segments.split_first() {
            None => remove_matching(&mut self.subscriptions, pred, limit, removed),
            Some((Segment::Literal(lit), rest)) => {
                if let Some(child) = self.literals.get_mut(lit) {
                    child.remove_at(rest, pred, limit, removed);
                    if child.is_empty() {
                        self.literals.remove(lit);
                    }
                }
            }
            Some((Segment::Wildcard, rest)) => {
                if let Some(child) = self.wildcard.as_mut() {
                    child.remove_at(rest, pred, limit, removed);
                    if child.is_empty() {
                        self.wildcard = None;
                    }
                }
            }
        }
    }

    /// Remove every subscription in the subtree for which `pred` holds.
    fn remove_everywhere(
        &mut self,
        pred: &dyn Fn(&Subscription) -> bool,
        removed: &mut Vec<SubscriptionId>,
    ) {
        remove_matching(&mut self.subscriptions, pred, usize::MAX, removed);
        self.literals.retain(|_, child| {
            child.remove_everywhere(pred, removed);
            !child.is_empty()
        });
        if let Some(child) = self.wildcard.as_mut() {
            child.remove_everywhere(pred, removed);
            if child.is_empty() {
                self.wildcard = None;
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.subscriptions.is_empty() && self.literals.is_empty() && self.wildcard.is_none()
    }

    fn count(&self) -> usize {
        self.subscriptions.len()
            + self.literals.values().map(Node::count).sum::<usize>()
            + self.wildcard.as_ref().map_or(0, |w| w.count())
    }
}

fn remove_matching(
    subs: &mut Vec<Subscription>,
    pred: &dyn Fn(&Subscription) -> bool,
    limit: usize,
    removed: &mut Vec<SubscriptionId>,
) {
    let before = removed.len();
    subs.retain(|s| {
        if removed.len() - before < limit && pred(s) {
            removed.push(s.id);
            false
        } else {
            true
        }
    });
}

#[derive(Default)]
struct Registry {
    root: Node,
    patterns: HashMap<SubscriptionId, TopicPattern>,
    next_id: u64,
}

/// In-process publish/subscribe router keyed by `::`-delimited topics.
///
/// Dispatch is synchronous and reentrant: a handler may emit again, and that
/// nested emit completes before the outer one continues. The registry lock is
/// never held while handlers run. A failing or panicking handler is logged
/// and does not prevent delivery to the others.
#[derive(Clone, Default)]
pub struct Bus {
    registry: Arc<RwLock<Registry>>,
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for every future emit matching `pattern`.
    pub fn on(&self, pattern: &str, handler: Handler) -> Result<SubscriptionId> {
        let pattern = TopicPattern::parse(pattern)?;
        let mut reg = self.registry.write();
        reg.next_id += 1;
        let id = SubscriptionId(reg.next_id);
        reg.root.insert(pattern.segments(), Subscription { id, handler });
        trace!(%pattern, %id, "bus subscription added");
        reg.patterns.insert(id, pattern);
        Ok(id)
    }

    /// Convenience wrapper around [`Bus::on`] taking a closure.
    pub fn subscribe<F>(&self, pattern: &str, f: F) -> Result<SubscriptionId>
    where
        F: Fn(&Envelope) -> Result<()> + Send + Sync + 'static,
    {
        self.on(pattern, handler(f))
    }

    /// Dispatch to every handler whose pattern matches `topic`, in
    /// registration order. Returns the number of handlers invoked.
    pub fn emit(&self, topic: &str, args: Vec<Value>) -> usize {
        let parts: Vec<&str> = topic::split(topic).collect();
        let mut matched = Vec::new();
        self.registry.read().root.collect(&parts, &mut matched);
        if matched.is_empty() {
            trace!(topic, "no subscribers");
            return 0;
        }
        matched.sort_by_key(|(id, _)| *id);

        let envelope = Envelope::new(topic, args);
        for (id, handler) in &matched {
            match catch_unwind(AssertUnwindSafe(|| handler(&envelope))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(topic, subscription = %id, error = %e, "bus handler failed"),
                Err(panic) => error!(
                    topic,
                    subscription = %id,
                    panic = panic_message(panic.as_ref()),
                    "bus handler panicked"
                ),
            }
        }
        matched.len()
    }

    /// Remove one registration of `handler` under exactly `pattern`.
    pub fn off(&self, pattern: &str, handler: &Handler) -> bool {
        let Ok(pattern) = TopicPattern::parse(pattern) else {
            return false;
        };
        let mut removed = Vec::new();
        let mut reg = self.registry.write();
        reg.root.remove_at(
            pattern.segments(),
            &|s| same_handler(&s.handler, handler),
            1,
            &mut removed,
        );
        reg.forget(&removed);
        !removed.is_empty()
    }

    /// Remove `handler` from every pattern it is registered under.
    pub fn off_any(&self, handler: &Handler) -> usize {
        let mut removed = Vec::new();
        let mut reg = self.registry.write();
        reg.root
            .remove_everywhere(&|s| same_handler(&s.handler, handler), &mut removed);
        reg.forget(&removed);
        removed.len()
    }

    /// Remove a single registration by id.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut reg = self.registry.write();
        let Some(pattern) = reg.patterns.remove(&id) else {
            return false;
        };
        let mut removed = Vec::new();
        reg.root
            .remove_at(pattern.segments(), &|s| s.id == id, 1, &mut removed);
        !removed.is_empty()
    }

    /// Whether any handler would receive an emit on `topic`.
    pub fn has_subscribers(&self, topic: &str) -> bool {
        let parts: Vec<&str> = topic::split(topic).collect();
        let mut matched = Vec::new();
        self.registry.read().root.collect(&parts, &mut matched);
        !matched.is_empty()
    }

    /// Total number of live registrations.
    pub fn subscription_count(&self) -> usize {
        self.registry.read().root.count()
    }
}

impl Registry {
    fn forget(&mut self, ids: &[SubscriptionId]) {
        for id in ids {
            self.patterns.remove(id);
        }
    }
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus")
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

/// Best-effort text of a caught panic payload.
pub fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}
