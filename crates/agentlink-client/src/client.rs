//! The IPC client: request correlation, timeout expiry, and event fan-out
//! over a [`DataTransport`].

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use serde_json::Value;
use tracing::{debug, warn};

use agentlink_transport::{DataTransport, TransportStats};
use agentlink_wire::{
    fnv1a_32, DataEnvelope, DataRspStruct, FrameHeader, KIND_EVENT, TYPE_CTRL_EVT, TYPE_CTRL_REQ,
    TYPE_CTRL_RSP, TYPE_DATA_JSON_EVT, TYPE_DATA_JSON_REQ, TYPE_DATA_JSON_RSP,
    TYPE_DATA_STRUCT_EVT, TYPE_DATA_STRUCT_REQ, TYPE_DATA_STRUCT_RSP,
};

use crate::adapter::{AdapterRegistry, TypeAdapter};
use crate::codec::{decode_cbor, encode_cbor};
use crate::error::{ClientError, Result};
use crate::pending::{PendingTable, ReplyCallback};
use crate::request::{embedded_corr_id, is_event_shape, Event, Request, Response, Target, OP_GET, OP_WRITE};
use crate::subs::{EventCallback, SubscriptionTable, TypedEventCallback};

/// ABI fingerprint assumed until a Hello response supplies the peer's.
pub const DEFAULT_ABI_HASH: u32 = 0x414C_0001;

/// Client knobs not covered by the transport config.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Whether the peer accepts the binary struct plane. When false,
    /// `write_struct` needs a registered type adapter and travels the JSON
    /// plane instead.
    pub struct_plane: bool,
    /// ABI fingerprint stamped into struct writes before the first Hello.
    pub default_abi_hash: u32,
    /// Granularity of pending-request timeout sweeps.
    pub sweep_interval_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            struct_plane: true,
            default_abi_hash: DEFAULT_ABI_HASH,
            sweep_interval_ms: 10,
        }
    }
}

/// Counters exposed through [`IpcClient::stats`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientStats {
    pub transport: TransportStats,
    pub pending_requests: usize,
    /// Struct events discarded by envelope or ABI validation.
    pub events_dropped: u64,
}

/// State shared with the receive thread and the timeout sweeper.
struct Shared {
    pending: PendingTable,
    subs: SubscriptionTable,
    adapters: AdapterRegistry,
    abi_hash: AtomicU32,
    running: AtomicBool,
    dropped_events: AtomicU64,
}

/// Asynchronous request/response and pub/sub client over a frame transport.
///
/// All completion and event callbacks run on the transport's receive thread
/// (or the sweeper thread for timeouts); they must not block for long.
pub struct IpcClient {
    /// `None` once `close()` has torn the transport down.
    transport: Mutex<Option<Box<dyn DataTransport>>>,
    shared: Arc<Shared>,
    config: ClientConfig,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl IpcClient {
    /// Wire up a transport and start the receive and sweeper threads. Takes
    /// the transport unopened; opening and starting it happens here so no
    /// frame can arrive before the dispatcher is registered.
    pub fn new(mut transport: Box<dyn DataTransport>, config: ClientConfig) -> Result<Self> {
        let shared = Arc::new(Shared {
            pending: PendingTable::new(),
            subs: SubscriptionTable::new(),
            adapters: AdapterRegistry::new(),
            abi_hash: AtomicU32::new(config.default_abi_hash),
            running: AtomicBool::new(true),
            dropped_events: AtomicU64::new(0),
        });

        let dispatcher = Arc::clone(&shared);
        transport.set_on_frame(Arc::new(move |header, payload| {
            dispatcher.on_frame(header, payload);
        }));
        transport.open()?;
        transport.start()?;

        let sweeper_shared = Arc::clone(&shared);
        let interval = Duration::from_millis(config.sweep_interval_ms.max(1));
        let sweeper = std::thread::Builder::new()
            .name("agentlink-sweeper".into())
            .spawn(move || {
                while sweeper_shared.running.load(Ordering::Acquire) {
                    std::thread::sleep(interval);
                    for (corr_id, callback) in sweeper_shared.pending.expire(Instant::now()) {
                        debug!(corr_id, "request timed out");
                        callback(Response::timed_out(corr_id));
                    }
                }
            })?;

        Ok(Self {
            transport: Mutex::new(Some(transport)),
            shared,
            config,
            sweeper: Mutex::new(Some(sweeper)),
        })
    }

    /// Handshake with the Agent. A successful reply's `result.abi_hash`
    /// becomes the fingerprint for subsequent struct writes.
    pub fn hello(&self, timeout_ms: u32, callback: ReplyCallback) -> Result<u32> {
        let shared = Arc::clone(&self.shared);
        let wrapped: ReplyCallback = Box::new(move |response: Response| {
            if response.ok {
                let learned = response
                    .result
                    .as_ref()
                    .and_then(|r| r.get("abi_hash"))
                    .and_then(Value::as_u64);
                if let Some(abi) = learned {
                    shared.abi_hash.store(abi as u32, Ordering::Relaxed);
                }
            }
            callback(response);
        });
        self.send_control(&Request::hello(), timeout_ms, wrapped)
    }

    pub fn create_participant(
        &self,
        args: Option<Value>,
        timeout_ms: u32,
        callback: ReplyCallback,
    ) -> Result<u32> {
        let mut request = Request::create("participant");
        request.args = args;
        self.send_control(&request, timeout_ms, callback)
    }

    pub fn create_publisher(&self, timeout_ms: u32, callback: ReplyCallback) -> Result<u32> {
        self.send_control(&Request::create("publisher"), timeout_ms, callback)
    }

    pub fn create_subscriber(&self, timeout_ms: u32, callback: ReplyCallback) -> Result<u32> {
        self.send_control(&Request::create("subscriber"), timeout_ms, callback)
    }

    pub fn create_writer(
        &self,
        topic: &str,
        type_name: &str,
        args: Option<Value>,
        timeout_ms: u32,
        callback: ReplyCallback,
    ) -> Result<u32> {
        let mut request = Request::create_endpoint("writer", topic, type_name);
        request.args = args;
        self.send_control(&request, timeout_ms, callback)
    }

    pub fn create_reader(
        &self,
        topic: &str,
        type_name: &str,
        args: Option<Value>,
        timeout_ms: u32,
        callback: ReplyCallback,
    ) -> Result<u32> {
        let mut request = Request::create_endpoint("reader", topic, type_name);
        request.args = args;
        self.send_control(&request, timeout_ms, callback)
    }

    pub fn clear_entities(&self, timeout_ms: u32, callback: ReplyCallback) -> Result<u32> {
        self.send_control(&Request::clear_entities(), timeout_ms, callback)
    }

    pub fn get_qos(&self, target: Target, timeout_ms: u32, callback: ReplyCallback) -> Result<u32> {
        let request = Request::new(OP_GET, target).with_args(serde_json::json!({"what": "qos"}));
        self.send_control(&request, timeout_ms, callback)
    }

    pub fn set_qos(
        &self,
        target: Target,
        qos: Value,
        timeout_ms: u32,
        callback: ReplyCallback,
    ) -> Result<u32> {
        let request = Request::new(OP_WRITE, target).with_data(serde_json::json!({"qos": qos}));
        self.send_control(&request, timeout_ms, callback)
    }

    /// Publish a JSON sample on the data plane.
    pub fn write_json(
        &self,
        topic: &str,
        type_name: &str,
        data: Value,
        timeout_ms: u32,
        callback: ReplyCallback,
    ) -> Result<u32> {
        let request =
            Request::new(OP_WRITE, Target::endpoint("writer", topic, type_name)).with_data(data);
        let payload = encode_cbor(&request)?;
        self.send_request(TYPE_DATA_JSON_REQ, &payload, timeout_ms, callback)
    }

    /// Publish a raw struct sample. With a struct-plane transport the bytes
    /// travel verbatim behind a [`DataEnvelope`]; otherwise a registered
    /// type adapter converts them to the topic's JSON shape first.
    pub fn write_struct(
        &self,
        topic: &str,
        type_name: &str,
        bytes: &[u8],
        timeout_ms: u32,
        callback: ReplyCallback,
    ) -> Result<u32> {
        if bytes.is_empty() {
            return Err(ClientError::InvalidArgument("empty struct payload".into()));
        }
        if !self.config.struct_plane {
            let adapter = self.shared.adapters.get(topic, type_name).ok_or_else(|| {
                ClientError::AdapterMissing {
                    topic: topic.to_string(),
                    type_name: type_name.to_string(),
                }
            })?;
            let data = adapter.encode(bytes)?;
            return self.write_json(topic, type_name, data, timeout_ms, callback);
        }

        let envelope = DataEnvelope::write_request(
            fnv1a_32(topic),
            self.shared.abi_hash.load(Ordering::Relaxed),
            bytes.len(),
        );
        let mut payload = BytesMut::with_capacity(bytes.len() + 20);
        envelope.encode(bytes, &mut payload)?;
        self.send_request(TYPE_DATA_STRUCT_REQ, &payload, timeout_ms, callback)
    }

    /// Register a JSON event callback for `topic/type`.
    pub fn subscribe(&self, topic: &str, type_name: &str, callback: EventCallback) {
        self.shared.subs.subscribe(topic, type_name, callback);
    }

    /// Remove every callback registered under `topic/type`.
    pub fn unsubscribe(&self, topic: &str, type_name: &str) -> bool {
        self.shared.subs.unsubscribe(topic, type_name)
    }

    /// Register a struct-plane event callback for `topic`.
    pub fn subscribe_typed(&self, topic: &str, callback: TypedEventCallback) {
        self.shared.subs.subscribe_typed(topic, callback);
    }

    pub fn unsubscribe_typed(&self, topic: &str) -> bool {
        self.shared.subs.unsubscribe_typed(topic)
    }

    pub fn register_type_adapter(
        &self,
        topic: &str,
        type_name: &str,
        adapter: Arc<dyn TypeAdapter>,
    ) {
        self.shared.adapters.register(topic, type_name, adapter);
    }

    pub fn unregister_type_adapter(&self, topic: &str, type_name: &str) -> bool {
        self.shared.adapters.unregister(topic, type_name)
    }

    /// The ABI fingerprint currently stamped into struct writes.
    pub fn abi_hash(&self) -> u32 {
        self.shared.abi_hash.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> ClientStats {
        ClientStats {
            transport: self
                .lock_transport()
                .as_ref()
                .map_or_else(TransportStats::default, |t| t.stats()),
            pending_requests: self.shared.pending.len(),
            events_dropped: self.shared.dropped_events.load(Ordering::Relaxed),
        }
    }

    /// Stop threads, close the transport, and fail every in-flight request
    /// with a closed status. Idempotent.
    pub fn close(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        let sweeper = match self.sweeper.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(sweeper) = sweeper {
            let _ = sweeper.join();
        }
        // The transport leaves the mutex before stop() joins the receive
        // thread: a frame callback still running on that thread may re-enter
        // stats() or a send and must not find the lock held.
        let transport = self.lock_transport().take();
        if let Some(mut transport) = transport {
            transport.stop();
            transport.close();
        }
        for (corr_id, callback) in self.shared.pending.drain_all() {
            callback(Response::closed(corr_id));
        }
    }

    fn send_control(
        &self,
        request: &Request,
        timeout_ms: u32,
        callback: ReplyCallback,
    ) -> Result<u32> {
        let payload = encode_cbor(request)?;
        self.send_request(TYPE_CTRL_REQ, &payload, timeout_ms, callback)
    }

    /// Allocate an id, register the pending entry, then send. Registration
    /// comes first so a reply cannot race the insert; a failed send removes
    /// the entry again and nothing ever fires.
    fn send_request(
        &self,
        frame_type: u16,
        payload: &[u8],
        timeout_ms: u32,
        callback: ReplyCallback,
    ) -> Result<u32> {
        if !self.shared.running.load(Ordering::Acquire) {
            return Err(ClientError::Closed);
        }
        let corr_id = self.shared.pending.alloc_id();
        self.shared.pending.insert(corr_id, callback, timeout_ms);

        let sent = match self.lock_transport().as_ref() {
            Some(transport) => transport
                .send_frame(frame_type, corr_id, payload)
                .map_err(ClientError::from),
            None => Err(ClientError::Closed),
        };
        if let Err(e) = sent {
            self.shared.pending.cancel(corr_id);
            return Err(e);
        }
        Ok(corr_id)
    }

    fn lock_transport(&self) -> MutexGuard<'_, Option<Box<dyn DataTransport>>> {
        match self.transport.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for IpcClient {
    fn drop(&mut self) {
        self.close();
    }
}

impl Shared {
    /// Frame dispatcher, running on the transport's receive thread. Any
    /// malformed frame is logged and dropped; nothing here panics or blocks.
    fn on_frame(&self, header: &FrameHeader, payload: &[u8]) {
        match header.frame_type {
            TYPE_CTRL_RSP | TYPE_DATA_JSON_RSP => self.on_json_frame(header, payload),
            TYPE_CTRL_EVT | TYPE_DATA_JSON_EVT => self.on_json_event(payload),
            TYPE_DATA_STRUCT_RSP => self.on_struct_reply(header, payload),
            TYPE_DATA_STRUCT_EVT => self.on_struct_event(payload),
            other => debug!(frame_type = format_args!("0x{other:04x}"), "ignoring frame"),
        }
    }

    /// Response-typed frames can still carry events (some peers publish
    /// data on the response channel), so classify by shape.
    fn on_json_frame(&self, header: &FrameHeader, payload: &[u8]) {
        let value = match decode_cbor(payload) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "dropping undecodable reply payload");
                return;
            }
        };
        if is_event_shape(&value) {
            self.deliver_event(&value);
            return;
        }

        let corr_id = embedded_corr_id(&value).unwrap_or(header.corr_id);
        if corr_id == 0 {
            debug!("reply without correlation id dropped");
            return;
        }
        match self.pending.take(corr_id) {
            Some(callback) => callback(Response::from_value(corr_id, &value)),
            None => debug!(corr_id, "unmatched reply dropped"),
        }
    }

    fn on_json_event(&self, payload: &[u8]) {
        match decode_cbor(payload) {
            Ok(value) => self.deliver_event(&value),
            Err(e) => warn!(error = %e, "dropping undecodable event payload"),
        }
    }

    fn deliver_event(&self, value: &Value) {
        let data = value.get("data").cloned().unwrap_or(Value::Null);
        if let Some(topic) = value.get("topic").and_then(Value::as_str) {
            let event = Event {
                topic: topic.to_string(),
                type_name: value
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string(),
                data,
            };
            if self.subs.dispatch(&event) == 0 {
                debug!(topic = %event.topic, "event with no subscribers");
            }
            return;
        }
        if let Some(topic_id) = value.get("topic_id").and_then(Value::as_u64) {
            self.subs.dispatch_by_id(topic_id as u32, &data);
            return;
        }
        debug!("event without topic or topic_id dropped");
    }

    fn on_struct_reply(&self, header: &FrameHeader, payload: &[u8]) {
        let rsp = match DataRspStruct::decode(payload) {
            Ok(rsp) => rsp,
            Err(e) => {
                warn!(error = %e, "dropping malformed struct response");
                return;
            }
        };
        let corr_id = if rsp.corr_id != 0 {
            rsp.corr_id
        } else {
            header.corr_id
        };
        match self.pending.take(corr_id) {
            Some(callback) => callback(Response::from_struct_status(corr_id, rsp.status)),
            None => debug!(corr_id, "unmatched struct reply dropped"),
        }
    }

    fn on_struct_event(&self, payload: &[u8]) {
        let (envelope, body) = match DataEnvelope::decode(payload) {
            Ok(parts) => parts,
            Err(e) => {
                self.dropped_events.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "dropping malformed struct event");
                return;
            }
        };
        if envelope.kind != KIND_EVENT {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
            debug!(kind = envelope.kind, "non-event envelope on event frame dropped");
            return;
        }
        let ours = self.abi_hash.load(Ordering::Relaxed);
        if envelope.abi_hash != ours {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
            warn!(
                topic_id = envelope.topic_id,
                theirs = format_args!("0x{:08x}", envelope.abi_hash),
                ours = format_args!("0x{ours:08x}"),
                "struct event with mismatched abi hash dropped"
            );
            return;
        }
        self.subs.dispatch_typed(envelope.topic_id, body);
    }
}
