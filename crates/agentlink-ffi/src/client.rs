use std::ffi::{c_void, CString};
use std::os::raw::c_char;
use std::sync::Arc;

use agentlink_client::{
    ClientConfig, ClientError, IpcClient, ReplyCallback, Response, Result as ClientResult, Target,
    TypeAdapter, ERR_CLOSED, ERR_TIMEOUT,
};
use agentlink_transport::{
    create_transport, ShmConfig, ShmRole, ShmSide, TransportConfig, UdpConfig,
};

use crate::args;
use crate::error;
use crate::types::{
    ClientHandle, LegacyAgentHandle, LegacyConfig, LegacyEventCb, LegacyHelloCb, LegacySimpleCb,
    LegacyStats, LegacyStatus, LegacyTypeAdapter, LegacyTypedEventCb, UserPtr,
    LEGACY_TRANSPORT_SHM, LEGACY_TRANSPORT_UDP,
};

/// Struct-plane status word signalling an ABI fingerprint rejection.
const STATUS_ABI_MISMATCH: i64 = 1;

/// Scratch capacity handed to C-side adapter encode callbacks.
const ADAPTER_JSON_CAP: usize = 64 * 1024;

fn with_client<T>(handle: LegacyAgentHandle, on_error: T, f: impl FnOnce(&IpcClient) -> T) -> T {
    if handle.is_null() {
        let _ = error::set_invalid_argument("agent handle cannot be null");
        return on_error;
    }

    let client_handle = {
        // SAFETY: Pointer validity is guaranteed by the caller.
        unsafe { &*(handle as *mut ClientHandle) }
    };

    match client_handle.client.as_ref() {
        Some(client) => f(client),
        None => {
            let _ = error::set_invalid_argument("agent handle has been closed");
            on_error
        }
    }
}

fn status_of(response: &Response) -> LegacyStatus {
    if response.ok {
        return LegacyStatus::Ok;
    }
    match response.err {
        Some(ERR_TIMEOUT) => LegacyStatus::Timeout,
        Some(ERR_CLOSED) => LegacyStatus::Closed,
        _ => LegacyStatus::Protocol,
    }
}

/// Status mapping for struct-plane replies, where the error code is the
/// fixed status word.
fn struct_status_of(response: &Response) -> LegacyStatus {
    if !response.ok && response.err == Some(STATUS_ABI_MISMATCH) {
        return LegacyStatus::AbiMismatch;
    }
    status_of(response)
}

fn simple_bridge(
    cb: LegacySimpleCb,
    user: UserPtr,
    map: fn(&Response) -> LegacyStatus,
) -> ReplyCallback {
    Box::new(move |response: Response| {
        // Capture the wrapper whole; a projected `user.0` would strip its
        // Send/Sync assertion.
        let user = user;
        let Some(cb) = cb else { return };
        let msg = CString::new(response.msg.clone().unwrap_or_default().replace('\0', "?"))
            .unwrap_or_default();
        // SAFETY: `msg` outlives the call; `user` is the embedder's pointer.
        unsafe {
            cb(
                map(&response) as i32,
                response.err.unwrap_or(0),
                msg.as_ptr(),
                user.0,
            );
        }
    })
}

fn hello_bridge(cb: LegacyHelloCb, user: UserPtr) -> ReplyCallback {
    Box::new(move |response: Response| {
        let user = user;
        let Some(cb) = cb else { return };
        let abi_hash = response
            .result
            .as_ref()
            .and_then(|r| r.get("abi_hash"))
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0) as u32;
        let result_text = response
            .result
            .as_ref()
            .map(|r| r.to_string())
            .unwrap_or_else(|| "null".to_string());
        let result_json = CString::new(result_text.replace('\0', "?")).unwrap_or_default();
        // SAFETY: `result_json` outlives the call; `user` is the embedder's pointer.
        unsafe {
            cb(
                status_of(&response) as i32,
                abi_hash,
                result_json.as_ptr(),
                user.0,
            );
        }
    })
}

fn dispatch_request(result: ClientResult<u32>) -> LegacyStatus {
    match result {
        Ok(_) => LegacyStatus::Ok,
        Err(err) => error::map_client_error(&err),
    }
}

/// Bridges a C adapter table onto the client's adapter trait.
struct CAdapter {
    table: LegacyTypeAdapter,
    user: UserPtr,
}

// SAFETY: the C callbacks are plain function pointers; the embedder
// guarantees `user` may be touched from library threads (see UserPtr).
unsafe impl Send for CAdapter {}
unsafe impl Sync for CAdapter {}

impl TypeAdapter for CAdapter {
    fn struct_size(&self) -> usize {
        self.table.struct_size
    }

    fn encode(&self, bytes: &[u8]) -> ClientResult<serde_json::Value> {
        let encode = self
            .table
            .encode
            .ok_or_else(|| ClientError::Codec("adapter has no encode callback".into()))?;
        let mut buf = vec![0u8; ADAPTER_JSON_CAP];
        // SAFETY: buffer pointer/capacity pairing is valid for the call.
        let written = unsafe {
            encode(
                bytes.as_ptr(),
                bytes.len(),
                buf.as_mut_ptr() as *mut c_char,
                buf.len(),
                self.user.0,
            )
        };
        if written < 0 || written as usize > buf.len() {
            return Err(ClientError::Codec("adapter encode failed".into()));
        }
        serde_json::from_slice(&buf[..written as usize])
            .map_err(|e| ClientError::Codec(format!("adapter produced invalid JSON: {e}")))
    }

    fn decode(&self, value: &serde_json::Value, out: &mut [u8]) -> ClientResult<usize> {
        let decode = self
            .table
            .decode
            .ok_or_else(|| ClientError::Codec("adapter has no decode callback".into()))?;
        let json = CString::new(value.to_string().replace('\0', "?"))
            .map_err(|_| ClientError::Codec("unencodable JSON".into()))?;
        // SAFETY: `json` and the out buffer stay valid for the call.
        let written = unsafe { decode(json.as_ptr(), out.as_mut_ptr(), out.len(), self.user.0) };
        if written < 0 || written as usize > out.len() {
            return Err(ClientError::Codec("adapter decode failed".into()));
        }
        Ok(written as usize)
    }

    fn default_value(&self) -> serde_json::Value {
        let zeroed = vec![0u8; self.table.struct_size];
        self.encode(&zeroed).unwrap_or(serde_json::Value::Null)
    }
}

fn transport_config(cfg: &LegacyConfig) -> Option<TransportConfig> {
    match cfg.transport {
        LEGACY_TRANSPORT_UDP => {
            // SAFETY: Config string pointers obey the LegacyConfig contract.
            let local = unsafe { args::required_str_arg(cfg.local_addr, "local_addr")? };
            let remote = unsafe { args::required_str_arg(cfg.remote_addr, "remote_addr")? };
            let local_addr = match local.parse() {
                Ok(addr) => addr,
                Err(_) => {
                    let _ = error::set_invalid_argument("local_addr is not ip:port");
                    return None;
                }
            };
            let remote_addr = match remote.parse() {
                Ok(addr) => addr,
                Err(_) => {
                    let _ = error::set_invalid_argument("remote_addr is not ip:port");
                    return None;
                }
            };
            Some(TransportConfig::Udp(UdpConfig {
                local_addr,
                remote_addr,
                recv_timeout_ms: cfg.recv_timeout_ms,
                max_frame: cfg.max_frame,
            }))
        }
        LEGACY_TRANSPORT_SHM => {
            // SAFETY: Config string pointers obey the LegacyConfig contract.
            let shm_name = unsafe { args::required_str_arg(cfg.shm_name, "shm_name")? };
            let notify_la = unsafe { args::required_str_arg(cfg.notify_la, "notify_la")? };
            let notify_al = unsafe { args::required_str_arg(cfg.notify_al, "notify_al")? };
            Some(TransportConfig::Shm(ShmConfig {
                shm_name: shm_name.to_string(),
                notify_la: notify_la.to_string(),
                notify_al: notify_al.to_string(),
                ring_bytes: cfg.ring_bytes,
                max_frame: cfg.max_frame,
                side: ShmSide::Legacy,
                role: if cfg.create != 0 {
                    ShmRole::Creator
                } else {
                    ShmRole::Joiner
                },
                wait_ms: cfg.wait_ms,
                ..ShmConfig::default()
            }))
        }
        other => {
            let _ = error::set_invalid_argument(format!("unknown transport selector {other}"));
            None
        }
    }
}

/// Create a client over the configured transport.
///
/// Returns null on failure; `legacy_agent_last_error` carries the reason.
///
/// # Safety
/// `config` must be non-null and its string fields must obey the
/// [`LegacyConfig`] field contracts.
#[no_mangle]
pub unsafe extern "C" fn legacy_agent_init(config: *const LegacyConfig) -> LegacyAgentHandle {
    crate::ffi_boundary(std::ptr::null_mut(), || {
        error::clear_error_state();

        if config.is_null() {
            let _ = error::set_invalid_argument("config cannot be null");
            return std::ptr::null_mut();
        }
        // SAFETY: Checked non-null; caller guarantees validity.
        let config = unsafe { &*config };

        let Some(transport_cfg) = transport_config(config) else {
            return std::ptr::null_mut();
        };
        let transport = match create_transport(transport_cfg) {
            Ok(transport) => transport,
            Err(err) => {
                error::set_error_message(err.to_string());
                return std::ptr::null_mut();
            }
        };

        let client_cfg = ClientConfig {
            struct_plane: config.struct_plane != 0,
            ..ClientConfig::default()
        };
        match IpcClient::new(transport, client_cfg) {
            Ok(client) => {
                let handle = ClientHandle {
                    client: Some(client),
                };
                Box::into_raw(Box::new(handle)) as LegacyAgentHandle
            }
            Err(err) => {
                let _ = error::map_client_error(&err);
                std::ptr::null_mut()
            }
        }
    })
}

/// Close and free a client handle. Safe to call with null.
///
/// # Safety
/// `handle` must be null or a handle returned by `legacy_agent_init`, and
/// must not be used afterwards.
#[no_mangle]
pub unsafe extern "C" fn legacy_agent_close(handle: LegacyAgentHandle) {
    crate::ffi_boundary((), || {
        if handle.is_null() {
            return;
        }
        // SAFETY: Caller guarantees this handle was allocated by legacy_agent_init.
        let mut boxed = unsafe { Box::from_raw(handle as *mut ClientHandle) };
        if let Some(client) = boxed.client.take() {
            client.close();
        }
    });
}

/// Start the session handshake.
///
/// # Safety
/// `handle` must be a valid handle; `user` must stay valid until the
/// callback fires or the handle is closed.
#[no_mangle]
pub unsafe extern "C" fn legacy_agent_hello(
    handle: LegacyAgentHandle,
    timeout_ms: u32,
    cb: LegacyHelloCb,
    user: *mut c_void,
) -> LegacyStatus {
    crate::ffi_boundary(LegacyStatus::Internal, || {
        error::clear_error_state();
        with_client(handle, LegacyStatus::InvalidArgument, |client| {
            dispatch_request(client.hello(timeout_ms, hello_bridge(cb, UserPtr(user))))
        })
    })
}

/// # Safety
/// `handle` must be valid; `args_json` must be null or NUL-terminated JSON.
#[no_mangle]
pub unsafe extern "C" fn legacy_agent_create_participant(
    handle: LegacyAgentHandle,
    args_json: *const c_char,
    timeout_ms: u32,
    cb: LegacySimpleCb,
    user: *mut c_void,
) -> LegacyStatus {
    crate::ffi_boundary(LegacyStatus::Internal, || {
        error::clear_error_state();
        // SAFETY: Forwarded contract.
        let args = match unsafe { args::optional_json_arg(args_json, "args_json") } {
            Ok(args) => args,
            Err(()) => return LegacyStatus::InvalidArgument,
        };
        with_client(handle, LegacyStatus::InvalidArgument, |client| {
            dispatch_request(client.create_participant(
                args,
                timeout_ms,
                simple_bridge(cb, UserPtr(user), status_of),
            ))
        })
    })
}

/// # Safety
/// `handle` must be a valid handle.
#[no_mangle]
pub unsafe extern "C" fn legacy_agent_create_publisher(
    handle: LegacyAgentHandle,
    timeout_ms: u32,
    cb: LegacySimpleCb,
    user: *mut c_void,
) -> LegacyStatus {
    crate::ffi_boundary(LegacyStatus::Internal, || {
        error::clear_error_state();
        with_client(handle, LegacyStatus::InvalidArgument, |client| {
            dispatch_request(
                client.create_publisher(timeout_ms, simple_bridge(cb, UserPtr(user), status_of)),
            )
        })
    })
}

/// # Safety
/// `handle` must be a valid handle.
#[no_mangle]
pub unsafe extern "C" fn legacy_agent_create_subscriber(
    handle: LegacyAgentHandle,
    timeout_ms: u32,
    cb: LegacySimpleCb,
    user: *mut c_void,
) -> LegacyStatus {
    crate::ffi_boundary(LegacyStatus::Internal, || {
        error::clear_error_state();
        with_client(handle, LegacyStatus::InvalidArgument, |client| {
            dispatch_request(
                client.create_subscriber(timeout_ms, simple_bridge(cb, UserPtr(user), status_of)),
            )
        })
    })
}

/// # Safety
/// `handle` must be valid; `topic`/`type_name` must be NUL-terminated;
/// `args_json` must be null or NUL-terminated JSON.
#[no_mangle]
pub unsafe extern "C" fn legacy_agent_create_writer(
    handle: LegacyAgentHandle,
    topic: *const c_char,
    type_name: *const c_char,
    args_json: *const c_char,
    timeout_ms: u32,
    cb: LegacySimpleCb,
    user: *mut c_void,
) -> LegacyStatus {
    crate::ffi_boundary(LegacyStatus::Internal, || {
        error::clear_error_state();
        // SAFETY: Forwarded contracts.
        let (topic, type_name, args) = unsafe {
            let Some(topic) = args::required_str_arg(topic, "topic") else {
                return LegacyStatus::InvalidArgument;
            };
            let Some(type_name) = args::required_str_arg(type_name, "type_name") else {
                return LegacyStatus::InvalidArgument;
            };
            match args::optional_json_arg(args_json, "args_json") {
                Ok(args) => (topic, type_name, args),
                Err(()) => return LegacyStatus::InvalidArgument,
            }
        };
        with_client(handle, LegacyStatus::InvalidArgument, |client| {
            dispatch_request(client.create_writer(
                topic,
                type_name,
                args,
                timeout_ms,
                simple_bridge(cb, UserPtr(user), status_of),
            ))
        })
    })
}

/// # Safety
/// Same contracts as `legacy_agent_create_writer`.
#[no_mangle]
pub unsafe extern "C" fn legacy_agent_create_reader(
    handle: LegacyAgentHandle,
    topic: *const c_char,
    type_name: *const c_char,
    args_json: *const c_char,
    timeout_ms: u32,
    cb: LegacySimpleCb,
    user: *mut c_void,
) -> LegacyStatus {
    crate::ffi_boundary(LegacyStatus::Internal, || {
        error::clear_error_state();
        // SAFETY: Forwarded contracts.
        let (topic, type_name, args) = unsafe {
            let Some(topic) = args::required_str_arg(topic, "topic") else {
                return LegacyStatus::InvalidArgument;
            };
            let Some(type_name) = args::required_str_arg(type_name, "type_name") else {
                return LegacyStatus::InvalidArgument;
            };
            match args::optional_json_arg(args_json, "args_json") {
                Ok(args) => (topic, type_name, args),
                Err(()) => return LegacyStatus::InvalidArgument,
            }
        };
        with_client(handle, LegacyStatus::InvalidArgument, |client| {
            dispatch_request(client.create_reader(
                topic,
                type_name,
                args,
                timeout_ms,
                simple_bridge(cb, UserPtr(user), status_of),
            ))
        })
    })
}

/// # Safety
/// `handle` must be a valid handle.
#[no_mangle]
pub unsafe extern "C" fn legacy_agent_clear_entities(
    handle: LegacyAgentHandle,
    timeout_ms: u32,
    cb: LegacySimpleCb,
    user: *mut c_void,
) -> LegacyStatus {
    crate::ffi_boundary(LegacyStatus::Internal, || {
        error::clear_error_state();
        with_client(handle, LegacyStatus::InvalidArgument, |client| {
            dispatch_request(
                client.clear_entities(timeout_ms, simple_bridge(cb, UserPtr(user), status_of)),
            )
        })
    })
}

unsafe fn target_args(
    kind: *const c_char,
    topic: *const c_char,
    type_name: *const c_char,
) -> Option<Target> {
    // SAFETY: Forwarded contracts.
    unsafe {
        let kind = args::required_str_arg(kind, "kind")?;
        let topic = args::optional_str_arg(topic, "topic").ok()?;
        let type_name = args::optional_str_arg(type_name, "type_name").ok()?;
        Some(Target {
            kind: kind.to_string(),
            topic: topic.map(str::to_string),
            type_name: type_name.map(str::to_string),
        })
    }
}

/// # Safety
/// `handle` must be valid; `kind` must be NUL-terminated; `topic` and
/// `type_name` must each be null or NUL-terminated.
#[no_mangle]
pub unsafe extern "C" fn legacy_agent_get_qos(
    handle: LegacyAgentHandle,
    kind: *const c_char,
    topic: *const c_char,
    type_name: *const c_char,
    timeout_ms: u32,
    cb: LegacySimpleCb,
    user: *mut c_void,
) -> LegacyStatus {
    crate::ffi_boundary(LegacyStatus::Internal, || {
        error::clear_error_state();
        // SAFETY: Forwarded contracts.
        let Some(target) = (unsafe { target_args(kind, topic, type_name) }) else {
            return LegacyStatus::InvalidArgument;
        };
        with_client(handle, LegacyStatus::InvalidArgument, |client| {
            dispatch_request(client.get_qos(
                target,
                timeout_ms,
                simple_bridge(cb, UserPtr(user), status_of),
            ))
        })
    })
}

/// # Safety
/// Same contracts as `legacy_agent_get_qos`; `qos_json` must be
/// NUL-terminated JSON.
#[no_mangle]
pub unsafe extern "C" fn legacy_agent_set_qos(
    handle: LegacyAgentHandle,
    kind: *const c_char,
    topic: *const c_char,
    type_name: *const c_char,
    qos_json: *const c_char,
    timeout_ms: u32,
    cb: LegacySimpleCb,
    user: *mut c_void,
) -> LegacyStatus {
    crate::ffi_boundary(LegacyStatus::Internal, || {
        error::clear_error_state();
        // SAFETY: Forwarded contracts.
        let (target, qos) = unsafe {
            let Some(target) = target_args(kind, topic, type_name) else {
                return LegacyStatus::InvalidArgument;
            };
            match args::optional_json_arg(qos_json, "qos_json") {
                Ok(Some(qos)) => (target, qos),
                Ok(None) => {
                    return error::set_invalid_argument("qos_json cannot be null");
                }
                Err(()) => return LegacyStatus::InvalidArgument,
            }
        };
        with_client(handle, LegacyStatus::InvalidArgument, |client| {
            dispatch_request(client.set_qos(
                target,
                qos,
                timeout_ms,
                simple_bridge(cb, UserPtr(user), status_of),
            ))
        })
    })
}

/// # Safety
/// `handle` must be valid; `topic`/`type_name` must be NUL-terminated;
/// `data_json` must be NUL-terminated JSON.
#[no_mangle]
pub unsafe extern "C" fn legacy_agent_write_json(
    handle: LegacyAgentHandle,
    topic: *const c_char,
    type_name: *const c_char,
    data_json: *const c_char,
    timeout_ms: u32,
    cb: LegacySimpleCb,
    user: *mut c_void,
) -> LegacyStatus {
    crate::ffi_boundary(LegacyStatus::Internal, || {
        error::clear_error_state();
        // SAFETY: Forwarded contracts.
        let (topic, type_name, data) = unsafe {
            let Some(topic) = args::required_str_arg(topic, "topic") else {
                return LegacyStatus::InvalidArgument;
            };
            let Some(type_name) = args::required_str_arg(type_name, "type_name") else {
                return LegacyStatus::InvalidArgument;
            };
            match args::optional_json_arg(data_json, "data_json") {
                Ok(Some(data)) => (topic, type_name, data),
                Ok(None) => {
                    return error::set_invalid_argument("data_json cannot be null");
                }
                Err(()) => return LegacyStatus::InvalidArgument,
            }
        };
        with_client(handle, LegacyStatus::InvalidArgument, |client| {
            dispatch_request(client.write_json(
                topic,
                type_name,
                data,
                timeout_ms,
                simple_bridge(cb, UserPtr(user), status_of),
            ))
        })
    })
}

/// # Safety
/// `handle` must be valid; `topic`/`type_name` must be NUL-terminated; if
/// `len > 0`, `data` must be readable for `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn legacy_agent_write_struct(
    handle: LegacyAgentHandle,
    topic: *const c_char,
    type_name: *const c_char,
    data: *const u8,
    len: usize,
    timeout_ms: u32,
    cb: LegacySimpleCb,
    user: *mut c_void,
) -> LegacyStatus {
    crate::ffi_boundary(LegacyStatus::Internal, || {
        error::clear_error_state();
        // SAFETY: Forwarded contracts.
        let (topic, type_name, bytes) = unsafe {
            let Some(topic) = args::required_str_arg(topic, "topic") else {
                return LegacyStatus::InvalidArgument;
            };
            let Some(type_name) = args::required_str_arg(type_name, "type_name") else {
                return LegacyStatus::InvalidArgument;
            };
            let Some(bytes) = args::bytes_arg(data, len, "data") else {
                return LegacyStatus::InvalidArgument;
            };
            (topic, type_name, bytes)
        };
        with_client(handle, LegacyStatus::InvalidArgument, |client| {
            dispatch_request(client.write_struct(
                topic,
                type_name,
                bytes,
                timeout_ms,
                simple_bridge(cb, UserPtr(user), struct_status_of),
            ))
        })
    })
}

/// Register a JSON event callback for `topic`/`type_name`.
///
/// # Safety
/// `handle` must be valid; strings must be NUL-terminated; `user` must stay
/// valid until unsubscribed or the handle is closed.
#[no_mangle]
pub unsafe extern "C" fn legacy_agent_subscribe_event(
    handle: LegacyAgentHandle,
    topic: *const c_char,
    type_name: *const c_char,
    cb: LegacyEventCb,
    user: *mut c_void,
) -> LegacyStatus {
    crate::ffi_boundary(LegacyStatus::Internal, || {
        error::clear_error_state();
        // SAFETY: Forwarded contracts.
        let (topic, type_name) = unsafe {
            let Some(topic) = args::required_str_arg(topic, "topic") else {
                return LegacyStatus::InvalidArgument;
            };
            let Some(type_name) = args::required_str_arg(type_name, "type_name") else {
                return LegacyStatus::InvalidArgument;
            };
            (topic, type_name)
        };
        let Some(cb) = cb else {
            return error::set_invalid_argument("event callback cannot be null");
        };
        let user = UserPtr(user);
        with_client(handle, LegacyStatus::InvalidArgument, |client| {
            client.subscribe(
                topic,
                type_name,
                Arc::new(move |event| {
                    let user = user;
                    let topic = CString::new(event.topic.replace('\0', "?")).unwrap_or_default();
                    let type_name =
                        CString::new(event.type_name.replace('\0', "?")).unwrap_or_default();
                    let data = CString::new(event.data.to_string().replace('\0', "?"))
                        .unwrap_or_default();
                    // SAFETY: The CStrings outlive the call; `user` is the
                    // embedder's pointer.
                    unsafe { cb(topic.as_ptr(), type_name.as_ptr(), data.as_ptr(), user.0) }
                }),
            );
            LegacyStatus::Ok
        })
    })
}

/// # Safety
/// `handle` must be valid; strings must be NUL-terminated.
#[no_mangle]
pub unsafe extern "C" fn legacy_agent_unsubscribe_event(
    handle: LegacyAgentHandle,
    topic: *const c_char,
    type_name: *const c_char,
) -> LegacyStatus {
    crate::ffi_boundary(LegacyStatus::Internal, || {
        error::clear_error_state();
        // SAFETY: Forwarded contracts.
        let (topic, type_name) = unsafe {
            let Some(topic) = args::required_str_arg(topic, "topic") else {
                return LegacyStatus::InvalidArgument;
            };
            let Some(type_name) = args::required_str_arg(type_name, "type_name") else {
                return LegacyStatus::InvalidArgument;
            };
            (topic, type_name)
        };
        with_client(handle, LegacyStatus::InvalidArgument, |client| {
            if client.unsubscribe(topic, type_name) {
                LegacyStatus::Ok
            } else {
                error::set_invalid_argument("no subscription for topic/type")
            }
        })
    })
}

/// Register a struct-plane event callback for `topic`.
///
/// # Safety
/// `handle` must be valid; `topic` must be NUL-terminated; `user` must stay
/// valid until unsubscribed or the handle is closed.
#[no_mangle]
pub unsafe extern "C" fn legacy_agent_subscribe_typed(
    handle: LegacyAgentHandle,
    topic: *const c_char,
    cb: LegacyTypedEventCb,
    user: *mut c_void,
) -> LegacyStatus {
    crate::ffi_boundary(LegacyStatus::Internal, || {
        error::clear_error_state();
        // SAFETY: Forwarded contract.
        let Some(topic) = (unsafe { args::required_str_arg(topic, "topic") }) else {
            return LegacyStatus::InvalidArgument;
        };
        let Some(cb) = cb else {
            return error::set_invalid_argument("event callback cannot be null");
        };
        let user = UserPtr(user);
        with_client(handle, LegacyStatus::InvalidArgument, |client| {
            client.subscribe_typed(
                topic,
                Arc::new(move |topic_id, payload| {
                    let user = user;
                    // SAFETY: The payload slice is valid for the call; `user`
                    // is the embedder's pointer.
                    unsafe { cb(topic_id, payload.as_ptr(), payload.len(), user.0) }
                }),
            );
            LegacyStatus::Ok
        })
    })
}

/// # Safety
/// `handle` must be valid; `topic` must be NUL-terminated.
#[no_mangle]
pub unsafe extern "C" fn legacy_agent_unsubscribe_typed(
    handle: LegacyAgentHandle,
    topic: *const c_char,
) -> LegacyStatus {
    crate::ffi_boundary(LegacyStatus::Internal, || {
        error::clear_error_state();
        // SAFETY: Forwarded contract.
        let Some(topic) = (unsafe { args::required_str_arg(topic, "topic") }) else {
            return LegacyStatus::InvalidArgument;
        };
        with_client(handle, LegacyStatus::InvalidArgument, |client| {
            if client.unsubscribe_typed(topic) {
                LegacyStatus::Ok
            } else {
                error::set_invalid_argument("no typed subscription for topic")
            }
        })
    })
}

/// Register a C-side type adapter for `topic`/`type_name`.
///
/// # Safety
/// `handle` must be valid; strings must be NUL-terminated; `adapter` must
/// be non-null and its callbacks/user pointer must stay valid until
/// unregistered or the handle is closed.
#[no_mangle]
pub unsafe extern "C" fn legacy_agent_register_type_adapter(
    handle: LegacyAgentHandle,
    topic: *const c_char,
    type_name: *const c_char,
    adapter: *const LegacyTypeAdapter,
) -> LegacyStatus {
    crate::ffi_boundary(LegacyStatus::Internal, || {
        error::clear_error_state();
        // SAFETY: Forwarded contracts.
        let (topic, type_name) = unsafe {
            let Some(topic) = args::required_str_arg(topic, "topic") else {
                return LegacyStatus::InvalidArgument;
            };
            let Some(type_name) = args::required_str_arg(type_name, "type_name") else {
                return LegacyStatus::InvalidArgument;
            };
            (topic, type_name)
        };
        if adapter.is_null() {
            return error::set_invalid_argument("adapter cannot be null");
        }
        // SAFETY: Checked non-null; the table is copied out here.
        let table = unsafe { *adapter };
        let user = UserPtr(table.user);
        with_client(handle, LegacyStatus::InvalidArgument, |client| {
            client.register_type_adapter(topic, type_name, Arc::new(CAdapter { table, user }));
            LegacyStatus::Ok
        })
    })
}

/// # Safety
/// `handle` must be valid; strings must be NUL-terminated.
#[no_mangle]
pub unsafe extern "C" fn legacy_agent_unregister_type_adapter(
    handle: LegacyAgentHandle,
    topic: *const c_char,
    type_name: *const c_char,
) -> LegacyStatus {
    crate::ffi_boundary(LegacyStatus::Internal, || {
        error::clear_error_state();
        // SAFETY: Forwarded contracts.
        let (topic, type_name) = unsafe {
            let Some(topic) = args::required_str_arg(topic, "topic") else {
                return LegacyStatus::InvalidArgument;
            };
            let Some(type_name) = args::required_str_arg(type_name, "type_name") else {
                return LegacyStatus::InvalidArgument;
            };
            (topic, type_name)
        };
        with_client(handle, LegacyStatus::InvalidArgument, |client| {
            if client.unregister_type_adapter(topic, type_name) {
                LegacyStatus::Ok
            } else {
                error::set_invalid_argument("no adapter for topic/type")
            }
        })
    })
}

/// Fill `out` with the client's transport and pending-request counters.
///
/// # Safety
/// `handle` must be valid; `out` must be a non-null writable pointer.
#[no_mangle]
pub unsafe extern "C" fn legacy_agent_stats(
    handle: LegacyAgentHandle,
    out: *mut LegacyStats,
) -> LegacyStatus {
    crate::ffi_boundary(LegacyStatus::Internal, || {
        error::clear_error_state();
        if out.is_null() {
            return error::set_invalid_argument("out cannot be null");
        }
        with_client(handle, LegacyStatus::InvalidArgument, |client| {
            let stats = client.stats();
            // SAFETY: Checked non-null above.
            unsafe {
                *out = LegacyStats {
                    epoch: stats.transport.epoch,
                    drops_tx: stats.transport.drops_tx,
                    // Transport-level receive drops plus events the client
                    // discarded during envelope/ABI validation.
                    drops_rx: stats.transport.drops_rx + stats.events_dropped,
                    pending_requests: stats.pending_requests as u64,
                };
            }
            LegacyStatus::Ok
        })
    })
}
