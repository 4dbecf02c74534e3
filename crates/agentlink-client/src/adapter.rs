use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::error::Result;

/// Translates between a topic's raw struct bytes and its JSON shape.
///
/// Registered per `(topic, type)` pair; used when a struct write must
/// travel the JSON data plane because the active transport has no struct
/// plane, and by typed subscriptions that want decoded events.
pub trait TypeAdapter: Send + Sync {
    /// Size of the raw struct this adapter understands.
    fn struct_size(&self) -> usize;

    /// Convert raw struct bytes into the topic's JSON object.
    fn encode(&self, bytes: &[u8]) -> Result<Value>;

    /// Convert the topic's JSON object into raw struct bytes written to
    /// `out`. Returns the number of bytes produced.
    fn decode(&self, value: &Value, out: &mut [u8]) -> Result<usize>;

    /// The JSON shape of a zero-initialized sample, used to seed writers
    /// before the first real sample arrives.
    fn default_value(&self) -> Value {
        Value::Null
    }
}

/// Process-local adapter registry keyed by `(topic, type)`.
pub struct AdapterRegistry {
    map: Mutex<HashMap<(String, String), Arc<dyn TypeAdapter>>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
        }
    }

    /// Register an adapter, replacing any previous one for the same pair.
    pub fn register(&self, topic: &str, type_name: &str, adapter: Arc<dyn TypeAdapter>) {
        let mut map = match self.map.lock() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.insert((topic.to_string(), type_name.to_string()), adapter);
    }

    /// Remove the adapter for the pair. Returns whether one existed.
    pub fn unregister(&self, topic: &str, type_name: &str) -> bool {
        let mut map = match self.map.lock() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.remove(&(topic.to_string(), type_name.to_string())).is_some()
    }

    pub fn get(&self, topic: &str, type_name: &str) -> Option<Arc<dyn TypeAdapter>> {
        let map = match self.map.lock() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.get(&(topic.to_string(), type_name.to_string())).cloned()
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use serde_json::json;

    /// Adapter for a toy 8-byte struct: two little-endian u32 fields.
    struct PairAdapter;

    impl TypeAdapter for PairAdapter {
        fn struct_size(&self) -> usize {
            8
        }

        fn encode(&self, bytes: &[u8]) -> Result<Value> {
            if bytes.len() != 8 {
                return Err(ClientError::InvalidArgument("need 8 bytes".into()));
            }
            let x = u32::from_le_bytes(bytes[0..4].try_into().unwrap_or_default());
            let y = u32::from_le_bytes(bytes[4..8].try_into().unwrap_or_default());
            Ok(json!({"x": x, "y": y}))
        }

        fn decode(&self, value: &Value, out: &mut [u8]) -> Result<usize> {
            let x = value["x"].as_u64().unwrap_or(0) as u32;
            let y = value["y"].as_u64().unwrap_or(0) as u32;
            out[0..4].copy_from_slice(&x.to_le_bytes());
            out[4..8].copy_from_slice(&y.to_le_bytes());
            Ok(8)
        }
    }

    #[test]
    fn register_lookup_unregister() {
        let registry = AdapterRegistry::new();
        assert!(registry.get("t", "Pair").is_none());

        registry.register("t", "Pair", Arc::new(PairAdapter));
        let adapter = registry.get("t", "Pair").expect("registered");
        assert_eq!(adapter.struct_size(), 8);

        assert!(registry.unregister("t", "Pair"));
        assert!(!registry.unregister("t", "Pair"));
        assert!(registry.get("t", "Pair").is_none());
    }

    #[test]
    fn adapter_round_trips_struct() {
        let adapter = PairAdapter;
        let raw = [1u8, 0, 0, 0, 2, 0, 0, 0];
        let value = adapter.encode(&raw).unwrap();
        assert_eq!(value, json!({"x": 1, "y": 2}));

        let mut out = [0u8; 8];
        assert_eq!(adapter.decode(&value, &mut out).unwrap(), 8);
        assert_eq!(out, raw);
    }
}
