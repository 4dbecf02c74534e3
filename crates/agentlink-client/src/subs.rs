use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use agentlink_wire::fnv1a_32;

use crate::request::Event;

/// JSON-plane event callback, invoked synchronously on the receive thread.
pub type EventCallback = Arc<dyn Fn(&Event) + Send + Sync>;

/// Struct-plane event callback: topic hash plus raw struct bytes.
pub type TypedEventCallback = Arc<dyn Fn(u32, &[u8]) + Send + Sync>;

/// Subscription fan-out, keyed by `"topic/type"` and by topic hash.
///
/// Locks guard only the map accesses; callback lists are snapshotted and
/// invoked with no lock held, so a callback may re-enter subscribe.
pub struct SubscriptionTable {
    by_key: Mutex<HashMap<String, Vec<EventCallback>>>,
    /// fnv1a(topic) -> every `"topic/type"` key registered for that topic,
    /// for events that carry only the hash.
    key_by_id: Mutex<HashMap<u32, Vec<String>>>,
    typed: Mutex<HashMap<u32, Vec<TypedEventCallback>>>,
}

fn sub_key(topic: &str, type_name: &str) -> String {
    format!("{topic}/{type_name}")
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self {
            by_key: Mutex::new(HashMap::new()),
            key_by_id: Mutex::new(HashMap::new()),
            typed: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self, topic: &str, type_name: &str, callback: EventCallback) {
        let key = sub_key(topic, type_name);
        {
            let mut map = lock(&self.by_key);
            map.entry(key.clone()).or_default().push(callback);
        }
        let mut index = lock(&self.key_by_id);
        let keys = index.entry(fnv1a_32(topic)).or_default();
        if !keys.contains(&key) {
            keys.push(key);
        }
    }

    /// Drop every callback registered under `topic/type`. Returns whether
    /// any existed.
    pub fn unsubscribe(&self, topic: &str, type_name: &str) -> bool {
        let key = sub_key(topic, type_name);
        let existed = lock(&self.by_key).remove(&key).is_some();
        if existed {
            let mut index = lock(&self.key_by_id);
            if let Some(keys) = index.get_mut(&fnv1a_32(topic)) {
                keys.retain(|k| k != &key);
                if keys.is_empty() {
                    index.remove(&fnv1a_32(topic));
                }
            }
        }
        existed
    }

    pub fn subscribe_typed(&self, topic: &str, callback: TypedEventCallback) {
        lock(&self.typed)
            .entry(fnv1a_32(topic))
            .or_default()
            .push(callback);
    }

    pub fn unsubscribe_typed(&self, topic: &str) -> bool {
        lock(&self.typed).remove(&fnv1a_32(topic)).is_some()
    }

    /// Deliver an event that names its topic. Returns the number of
    /// callbacks invoked.
    pub fn dispatch(&self, event: &Event) -> usize {
        let key = sub_key(&event.topic, &event.type_name);
        let callbacks: Vec<EventCallback> = lock(&self.by_key)
            .get(&key)
            .map(|v| v.to_vec())
            .unwrap_or_default();
        for callback in &callbacks {
            callback(event);
        }
        callbacks.len()
    }

    /// Deliver an event that carries only the topic hash: every key
    /// registered for that topic fires.
    pub fn dispatch_by_id(&self, topic_id: u32, data: &serde_json::Value) -> usize {
        let keys: Vec<String> = lock(&self.key_by_id)
            .get(&topic_id)
            .map(|v| v.to_vec())
            .unwrap_or_default();
        let mut fired = 0;
        for key in keys {
            let callbacks: Vec<EventCallback> = lock(&self.by_key)
                .get(&key)
                .map(|v| v.to_vec())
                .unwrap_or_default();
            let (topic, type_name) = key.split_once('/').unwrap_or((key.as_str(), ""));
            let event = Event {
                topic: topic.to_string(),
                type_name: type_name.to_string(),
                data: data.clone(),
            };
            for callback in &callbacks {
                callback(&event);
                fired += 1;
            }
        }
        fired
    }

    /// Deliver a struct-plane event to the typed subscribers for the hash.
    pub fn dispatch_typed(&self, topic_id: u32, payload: &[u8]) -> usize {
        let callbacks: Vec<TypedEventCallback> = lock(&self.typed)
            .get(&topic_id)
            .map(|v| v.to_vec())
            .unwrap_or_default();
        for callback in &callbacks {
            callback(topic_id, payload);
        }
        callbacks.len()
    }
}

impl Default for SubscriptionTable {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_callback(counter: &Arc<AtomicUsize>) -> EventCallback {
        let counter = Arc::clone(counter);
        Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn dispatch_hits_exact_key_only() {
        let table = SubscriptionTable::new();
        let hits = Arc::new(AtomicUsize::new(0));
        table.subscribe("pos", "Pose", counting_callback(&hits));

        let event = Event {
            topic: "pos".into(),
            type_name: "Pose".into(),
            data: json!({"x": 1}),
        };
        assert_eq!(table.dispatch(&event), 1);

        let other = Event {
            topic: "pos".into(),
            type_name: "Twist".into(),
            data: json!({}),
        };
        assert_eq!(table.dispatch(&other), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispatch_by_hash_reaches_all_types_of_topic() {
        let table = SubscriptionTable::new();
        let hits = Arc::new(AtomicUsize::new(0));
        table.subscribe("pos", "Pose", counting_callback(&hits));
        table.subscribe("pos", "Twist", counting_callback(&hits));
        table.subscribe("other", "Pose", counting_callback(&hits));

        let fired = table.dispatch_by_id(fnv1a_32("pos"), &json!({"x": 2}));
        assert_eq!(fired, 2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unsubscribe_silences_both_paths() {
        let table = SubscriptionTable::new();
        let hits = Arc::new(AtomicUsize::new(0));
        table.subscribe("pos", "Pose", counting_callback(&hits));

        assert!(table.unsubscribe("pos", "Pose"));
        assert!(!table.unsubscribe("pos", "Pose"));

        let event = Event {
            topic: "pos".into(),
            type_name: "Pose".into(),
            data: json!({}),
        };
        assert_eq!(table.dispatch(&event), 0);
        assert_eq!(table.dispatch_by_id(fnv1a_32("pos"), &json!({})), 0);
    }

    #[test]
    fn typed_dispatch_by_hash() {
        let table = SubscriptionTable::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        table.subscribe_typed(
            "imu",
            Arc::new(move |id, payload| {
                lock(&sink).push((id, payload.to_vec()));
            }),
        );

        let id = fnv1a_32("imu");
        assert_eq!(table.dispatch_typed(id, &[1, 2, 3]), 1);
        assert_eq!(table.dispatch_typed(fnv1a_32("gps"), &[9]), 0);

        assert!(table.unsubscribe_typed("imu"));
        assert_eq!(table.dispatch_typed(id, &[4]), 0);

        let seen = lock(&seen);
        assert_eq!(seen.as_slice(), &[(id, vec![1, 2, 3])]);
    }

    #[test]
    fn callback_may_resubscribe_reentrantly() {
        let table = Arc::new(SubscriptionTable::new());
        let inner = Arc::clone(&table);
        table.subscribe(
            "boot",
            "Init",
            Arc::new(move |_| {
                inner.subscribe("late", "Init", Arc::new(|_| {}));
            }),
        );
        let event = Event {
            topic: "boot".into(),
            type_name: "Init".into(),
            data: json!({}),
        };
        assert_eq!(table.dispatch(&event), 1);
    }
}
