use std::ffi::c_void;
use std::os::raw::c_char;

use agentlink_client::IpcClient;

/// Status codes returned by every `legacy_agent_*` entry point.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyStatus {
    Ok = 0,
    InvalidArgument = 1,
    Transport = 2,
    Protocol = 3,
    Timeout = 4,
    AbiMismatch = 5,
    Closed = 6,
    Internal = 99,
}

#[allow(dead_code)]
pub const LEGACY_OK: LegacyStatus = LegacyStatus::Ok;
#[allow(dead_code)]
pub const LEGACY_ERR_INVALID_ARGUMENT: LegacyStatus = LegacyStatus::InvalidArgument;
#[allow(dead_code)]
pub const LEGACY_ERR_TRANSPORT: LegacyStatus = LegacyStatus::Transport;
#[allow(dead_code)]
pub const LEGACY_ERR_PROTOCOL: LegacyStatus = LegacyStatus::Protocol;
#[allow(dead_code)]
pub const LEGACY_ERR_TIMEOUT: LegacyStatus = LegacyStatus::Timeout;
#[allow(dead_code)]
pub const LEGACY_ERR_ABI_MISMATCH: LegacyStatus = LegacyStatus::AbiMismatch;
#[allow(dead_code)]
pub const LEGACY_ERR_CLOSED: LegacyStatus = LegacyStatus::Closed;
#[allow(dead_code)]
pub const LEGACY_ERR_INTERNAL: LegacyStatus = LegacyStatus::Internal;

/// Transport selector in [`LegacyConfig::transport`].
pub const LEGACY_TRANSPORT_UDP: i32 = 0;
/// Transport selector in [`LegacyConfig::transport`].
pub const LEGACY_TRANSPORT_SHM: i32 = 1;

/// Opaque client handle returned by `legacy_agent_init`.
pub type LegacyAgentHandle = *mut c_void;

/// Completion callback for plain request/response operations.
///
/// `status` is a [`LegacyStatus`] value, `err` the peer's raw error code
/// (0 when absent), `msg` a NUL-terminated message valid only for the call.
pub type LegacySimpleCb =
    Option<unsafe extern "C" fn(status: i32, err: i64, msg: *const c_char, user: *mut c_void)>;

/// Completion callback for `legacy_agent_hello`. `result_json` is the
/// serialized Hello result object, valid only for the call.
pub type LegacyHelloCb = Option<
    unsafe extern "C" fn(status: i32, abi_hash: u32, result_json: *const c_char, user: *mut c_void),
>;

/// JSON-plane event callback. All strings are valid only for the call.
pub type LegacyEventCb = Option<
    unsafe extern "C" fn(
        topic: *const c_char,
        type_name: *const c_char,
        data_json: *const c_char,
        user: *mut c_void,
    ),
>;

/// Struct-plane event callback. `data` points at the raw struct bytes,
/// valid only for the call.
pub type LegacyTypedEventCb =
    Option<unsafe extern "C" fn(topic_id: u32, data: *const u8, len: usize, user: *mut c_void)>;

/// C-side type adapter. `encode` turns struct bytes into the topic's JSON
/// text; `decode` the reverse. Both write into a caller buffer and return
/// the produced length, or a negative value on failure.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct LegacyTypeAdapter {
    pub struct_size: usize,
    pub encode: Option<
        unsafe extern "C" fn(
            data: *const u8,
            len: usize,
            out_json: *mut c_char,
            out_cap: usize,
            user: *mut c_void,
        ) -> i32,
    >,
    pub decode: Option<
        unsafe extern "C" fn(
            json: *const c_char,
            out: *mut u8,
            out_cap: usize,
            user: *mut c_void,
        ) -> i32,
    >,
    pub user: *mut c_void,
}

/// Channel and transport parameters supplied by the embedding application.
///
/// String fields may be null when the selected transport does not use them.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct LegacyConfig {
    /// `LEGACY_TRANSPORT_UDP` or `LEGACY_TRANSPORT_SHM`.
    pub transport: i32,
    /// UDP: local bind address, `"ip:port"`.
    pub local_addr: *const c_char,
    /// UDP: agent address, `"ip:port"`.
    pub remote_addr: *const c_char,
    /// UDP: socket read timeout in ms.
    pub recv_timeout_ms: u32,
    /// SHM: region name (`/name`).
    pub shm_name: *const c_char,
    /// SHM: legacy-to-agent semaphore name.
    pub notify_la: *const c_char,
    /// SHM: agent-to-legacy semaphore name.
    pub notify_al: *const c_char,
    /// SHM: per-direction ring size in bytes.
    pub ring_bytes: u32,
    /// SHM: receive wait per iteration in ms, 0 = forever.
    pub wait_ms: u32,
    /// SHM: nonzero to create the region instead of joining it.
    pub create: i32,
    /// Largest frame in bytes (both transports).
    pub max_frame: u32,
    /// Nonzero when the peer accepts the binary struct plane.
    pub struct_plane: i32,
}

/// Observability counters filled by `legacy_agent_stats`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LegacyStats {
    pub epoch: u32,
    pub drops_tx: u64,
    pub drops_rx: u64,
    pub pending_requests: u64,
}

pub(crate) struct ClientHandle {
    pub(crate) client: Option<IpcClient>,
}

/// Opaque user pointer carried into callbacks running on library threads.
/// The embedder guarantees whatever it points at is safe to touch from
/// those threads; the pointer itself is just data.
#[derive(Clone, Copy)]
pub(crate) struct UserPtr(pub *mut c_void);

unsafe impl Send for UserPtr {}
unsafe impl Sync for UserPtr {}
