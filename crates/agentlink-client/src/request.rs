use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request operation: session handshake.
pub const OP_HELLO: &str = "hello";
/// Request operation: entity creation.
pub const OP_CREATE: &str = "create";
/// Request operation: tear down every created entity.
pub const OP_CLEAR: &str = "clear";
/// Request operation: read a property (QoS, status).
pub const OP_GET: &str = "get";
/// Request operation: data or property write.
pub const OP_WRITE: &str = "write";

/// Protocol revision stamped into every request.
pub const PROTO_VERSION: u32 = 1;

/// Entity addressed by a request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Target {
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
}

impl Target {
    pub fn kind(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            topic: None,
            type_name: None,
        }
    }

    pub fn endpoint(kind: &str, topic: &str, type_name: &str) -> Self {
        Self {
            kind: kind.to_string(),
            topic: Some(topic.to_string()),
            type_name: Some(type_name.to_string()),
        }
    }
}

/// Canonical control-plane request object, CBOR-encoded on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    pub op: String,
    pub target: Target,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub proto: u32,
}

impl Request {
    pub fn new(op: &str, target: Target) -> Self {
        Self {
            op: op.to_string(),
            target,
            args: None,
            data: None,
            proto: PROTO_VERSION,
        }
    }

    pub fn with_args(mut self, args: Value) -> Self {
        self.args = Some(args);
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn hello() -> Self {
        Self::new(OP_HELLO, Target::kind("agent"))
    }

    pub fn create(kind: &str) -> Self {
        Self::new(OP_CREATE, Target::kind(kind))
    }

    pub fn create_endpoint(kind: &str, topic: &str, type_name: &str) -> Self {
        Self::new(OP_CREATE, Target::endpoint(kind, topic, type_name))
    }

    pub fn clear_entities() -> Self {
        Self::new(OP_CLEAR, Target::kind("all"))
    }
}

/// Reply object delivered to the per-request callback.
///
/// Mirrors the wire response shape (`ok`/`err`/`msg`/`result`); struct-plane
/// responses are mapped onto the same type with the status word in `err`.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub corr_id: u32,
    pub ok: bool,
    pub err: Option<i64>,
    pub msg: Option<String>,
    pub result: Option<Value>,
}

/// Error code reported when a pending request expires before a reply.
pub const ERR_TIMEOUT: i64 = -1;
/// Error code reported when the client shuts down with requests in flight.
pub const ERR_CLOSED: i64 = -2;

impl Response {
    /// Build from a decoded control/JSON-plane reply object.
    pub fn from_value(corr_id: u32, value: &Value) -> Self {
        Self {
            corr_id,
            ok: value.get("ok").and_then(Value::as_bool).unwrap_or(false),
            err: value.get("err").and_then(Value::as_i64),
            msg: value
                .get("msg")
                .and_then(Value::as_str)
                .map(str::to_string),
            result: value.get("result").cloned(),
        }
    }

    /// Build from the fixed struct-plane status word.
    pub fn from_struct_status(corr_id: u32, status: u32) -> Self {
        Self {
            corr_id,
            ok: status == 0,
            err: if status == 0 { None } else { Some(i64::from(status)) },
            msg: None,
            result: None,
        }
    }

    /// Synthesized when a pending request expires without a reply.
    pub fn timed_out(corr_id: u32) -> Self {
        Self {
            corr_id,
            ok: false,
            err: Some(ERR_TIMEOUT),
            msg: Some("request timed out".to_string()),
            result: None,
        }
    }

    /// Synthesized for requests still in flight when the client closes.
    pub fn closed(corr_id: u32) -> Self {
        Self {
            corr_id,
            ok: false,
            err: Some(ERR_CLOSED),
            msg: Some("client closed".to_string()),
            result: None,
        }
    }
}

/// Published event delivered to subscription callbacks.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub topic: String,
    pub type_name: String,
    pub data: Value,
}

/// Pull the correlation id out of a reply object, if it carries one.
/// Writers use `req_id`; older peers echo `corr_id`.
pub fn embedded_corr_id(value: &Value) -> Option<u32> {
    value
        .get("req_id")
        .or_else(|| value.get("corr_id"))
        .and_then(Value::as_u64)
        .map(|id| id as u32)
}

/// True when a decoded object is a data event rather than a reply: it
/// announces itself (`evt`/`op` == "data") or carries topic+data with no
/// `ok` verdict.
pub fn is_event_shape(value: &Value) -> bool {
    let says_data = |key: &str| value.get(key).and_then(Value::as_str) == Some("data");
    if says_data("evt") || says_data("op") {
        return true;
    }
    value.get("ok").is_none() && value.get("topic").is_some() && value.get("data").is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_shape_matches_contract() {
        let req = Request::create_endpoint("writer", "cannon/cmd", "CannonCmd")
            .with_args(json!({"reliable": true}));
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(
            value,
            json!({
                "op": "create",
                "target": {"kind": "writer", "topic": "cannon/cmd", "type": "CannonCmd"},
                "args": {"reliable": true},
                "proto": 1,
            })
        );
    }

    #[test]
    fn absent_fields_are_omitted() {
        let value = serde_json::to_value(Request::hello()).unwrap();
        assert!(value.get("args").is_none());
        assert!(value.get("data").is_none());
        assert_eq!(value["target"], json!({"kind": "agent"}));
    }

    #[test]
    fn response_from_value() {
        let rsp = Response::from_value(
            7,
            &json!({"ok": false, "err": 3, "msg": "nope", "req_id": 7}),
        );
        assert!(!rsp.ok);
        assert_eq!(rsp.err, Some(3));
        assert_eq!(rsp.msg.as_deref(), Some("nope"));
    }

    #[test]
    fn event_shape_detection() {
        assert!(is_event_shape(&json!({"evt": "data", "topic": "t", "data": {}})));
        assert!(is_event_shape(&json!({"op": "data", "topic": "t"})));
        assert!(is_event_shape(&json!({"topic": "t", "data": {"x": 1}})));
        // A verdict makes it a reply even with topic+data present.
        assert!(!is_event_shape(&json!({"ok": true, "topic": "t", "data": {}})));
        assert!(!is_event_shape(&json!({"ok": true, "req_id": 3})));
    }

    #[test]
    fn corr_id_extraction_prefers_req_id() {
        assert_eq!(embedded_corr_id(&json!({"req_id": 5, "corr_id": 9})), Some(5));
        assert_eq!(embedded_corr_id(&json!({"corr_id": 9})), Some(9));
        assert_eq!(embedded_corr_id(&json!({"ok": true})), None);
    }
}
