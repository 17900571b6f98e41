//! In-process event hooks.
//!
//! [`EventBus`] is a name-keyed registry of handlers. Publishing runs every
//! handler of a name synchronously on the caller, lowest priority first,
//! and threads the payload through them: each handler receives what the
//! previous one returned. Nothing is queued or persisted; publishing a name
//! with no subscribers returns the payload unchanged.
//!
//! Handlers are cloned out of the registry before they run, so a handler
//! may subscribe or unsubscribe without deadlocking the bus.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

/// `{item_id, downloaded, total, percent}` after each reported chunk.
pub const DOWNLOAD_PROGRESS: &str = "download:progress";
/// Object key about to be used; handlers may return a replacement string.
pub const UPLOAD_KEY: &str = "upload:key";
pub const UPLOAD_BEFORE: &str = "upload:before";
pub const UPLOAD_SUCCESS: &str = "upload:success";
pub const UPLOAD_ERROR: &str = "upload:error";
pub const MAINTENANCE_BEFORE_RESET: &str = "maintenance:before_reset";
pub const MAINTENANCE_AFTER_RESET: &str = "maintenance:after_reset";

/// Handler signature: payload in, payload out.
pub type Handler = Arc<dyn Fn(Value, &EventContext) -> Value + Send + Sync>;

/// What a handler is told about the publication it is part of.
#[derive(Debug, Clone, PartialEq)]
pub struct EventContext {
    pub name: String,
    /// Additional arguments passed to `publish`, unchanged between handlers
    pub extra: Vec<Value>,
}

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    priority: i32,
    handler: Handler,
}

/// Priority-ordered, payload-chaining event registry.
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<String, Vec<Subscription>>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let subscribers = self.lock();
        let mut names: Vec<(&str, usize)> = subscribers
            .iter()
            .map(|(name, subs)| (name.as_str(), subs.len()))
            .collect();
        names.sort_unstable();
        f.debug_struct("EventBus").field("subscribers", &names).finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Subscription>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `handler` for `name`.
    ///
    /// Handlers with equal priority run in subscription order.
    pub fn subscribe(&self, name: &str, priority: i32, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut subscribers = self.lock();
        let list = subscribers.entry(name.to_string()).or_default();
        let at = list.partition_point(|s| s.priority <= priority);
        list.insert(
            at,
            Subscription {
                id,
                priority,
                handler,
            },
        );
        id
    }

    /// Convenience wrapper around [`EventBus::subscribe`] for closures.
    pub fn on<F>(&self, name: &str, priority: i32, handler: F) -> SubscriptionId
    where
        F: Fn(Value, &EventContext) -> Value + Send + Sync + 'static,
    {
        self.subscribe(name, priority, Arc::new(handler))
    }

    /// Remove handlers of `name`.
    ///
    /// With neither filter every handler of `name` goes; `id` and `priority`
    /// narrow the selection and combine. Returns how many were removed.
    pub fn unsubscribe(
        &self,
        name: &str,
        id: Option<SubscriptionId>,
        priority: Option<i32>,
    ) -> usize {
        let mut subscribers = self.lock();
        let Some(list) = subscribers.get_mut(name) else {
            return 0;
        };

        let before = list.len();
        list.retain(|s| {
            let id_match = id.map_or(true, |id| s.id == id);
            let priority_match = priority.map_or(true, |p| s.priority == p);
            !(id_match && priority_match)
        });
        let removed = before - list.len();

        if list.is_empty() {
            subscribers.remove(name);
        }
        removed
    }

    pub fn has(&self, name: &str) -> bool {
        self.lock().get(name).is_some_and(|list| !list.is_empty())
    }

    /// Drop the handlers of `name`, or of every name.
    pub fn clear(&self, name: Option<&str>) {
        let mut subscribers = self.lock();
        match name {
            Some(name) => {
                subscribers.remove(name);
            }
            None => subscribers.clear(),
        }
    }

    /// Run the handlers of `name` in priority order and return the final payload.
    pub fn publish(&self, name: &str, payload: Value, extra: &[Value]) -> Value {
        let handlers: Vec<Handler> = match self.lock().get(name) {
            Some(list) => list.iter().map(|s| Arc::clone(&s.handler)).collect(),
            None => return payload,
        };

        let ctx = EventContext {
            name: name.to_string(),
            extra: extra.to_vec(),
        };
        handlers
            .into_iter()
            .fold(payload, |payload, handler| handler(payload, &ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_publish_without_subscribers_returns_payload() {
        let bus = EventBus::new();
        assert_eq!(bus.publish("nothing", json!(7), &[]), json!(7));
    }

    #[test]
    fn test_handlers_chain_in_priority_order() {
        let bus = EventBus::new();
        bus.on("name", 20, |v, _| json!(format!("{}-late", v.as_str().unwrap_or(""))));
        bus.on("name", 5, |v, _| json!(format!("{}-early", v.as_str().unwrap_or(""))));
        bus.on("name", 5, |v, _| json!(format!("{}-second", v.as_str().unwrap_or(""))));

        let out = bus.publish("name", json!("start"), &[]);
        assert_eq!(out, json!("start-early-second-late"));
    }

    #[test]
    fn test_extra_arguments_reach_handlers() {
        let bus = EventBus::new();
        bus.on(UPLOAD_KEY, 0, |v, ctx| {
            assert_eq!(ctx.name, UPLOAD_KEY);
            let id = ctx.extra.first().and_then(Value::as_i64).unwrap_or(0);
            json!(format!("{}/{}", v.as_str().unwrap_or(""), id))
        });
        assert_eq!(bus.publish(UPLOAD_KEY, json!("k"), &[json!(42)]), json!("k/42"));
    }

    #[test]
    fn test_unsubscribe_filters() {
        let bus = EventBus::new();
        let a = bus.on("e", 1, |v, _| v);
        bus.on("e", 1, |v, _| v);
        bus.on("e", 2, |v, _| v);

        assert_eq!(bus.unsubscribe("e", Some(a), None), 1);
        assert_eq!(bus.unsubscribe("e", None, Some(2)), 1);
        assert!(bus.has("e"));
        assert_eq!(bus.unsubscribe("e", None, None), 1);
        assert!(!bus.has("e"));
        assert_eq!(bus.unsubscribe("e", None, None), 0);
    }

    #[test]
    fn test_handler_may_touch_the_bus() {
        let bus = Arc::new(EventBus::new());
        let inner = Arc::clone(&bus);
        bus.on("outer", 0, move |v, _| {
            inner.on("late", 0, |v, _| v);
            v
        });
        bus.publish("outer", Value::Null, &[]);
        assert!(bus.has("late"));
    }

    #[test]
    fn test_clear() {
        let bus = EventBus::new();
        bus.on("a", 0, |v, _| v);
        bus.on("b", 0, |v, _| v);
        bus.clear(Some("a"));
        assert!(!bus.has("a"));
        assert!(bus.has("b"));
        bus.clear(None);
        assert!(!bus.has("b"));
    }
}
