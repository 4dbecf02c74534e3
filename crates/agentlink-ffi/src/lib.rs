//! C ABI for the bridge client, consumed by the legacy application.
//!
//! Every export returns a [`LegacyStatus`]; on failure a thread-local
//! message is retrievable through [`legacy_agent_last_error`]. Completion
//! and event callbacks run on library threads, never on the caller's.

use std::os::raw::c_char;
use std::panic::AssertUnwindSafe;

mod args;
mod client;
mod error;
mod types;

pub use client::{
    legacy_agent_clear_entities, legacy_agent_close, legacy_agent_create_participant,
    legacy_agent_create_publisher, legacy_agent_create_reader, legacy_agent_create_subscriber,
    legacy_agent_create_writer, legacy_agent_get_qos, legacy_agent_hello, legacy_agent_init,
    legacy_agent_register_type_adapter, legacy_agent_set_qos, legacy_agent_stats,
    legacy_agent_subscribe_event, legacy_agent_subscribe_typed, legacy_agent_unregister_type_adapter,
    legacy_agent_unsubscribe_event, legacy_agent_unsubscribe_typed, legacy_agent_write_json,
    legacy_agent_write_struct,
};
pub use types::{
    LegacyAgentHandle, LegacyConfig, LegacyEventCb, LegacyHelloCb, LegacySimpleCb, LegacyStats,
    LegacyStatus, LegacyTypeAdapter, LegacyTypedEventCb, LEGACY_ERR_ABI_MISMATCH,
    LEGACY_ERR_CLOSED, LEGACY_ERR_INTERNAL, LEGACY_ERR_INVALID_ARGUMENT, LEGACY_ERR_PROTOCOL,
    LEGACY_ERR_TIMEOUT, LEGACY_ERR_TRANSPORT, LEGACY_OK, LEGACY_TRANSPORT_SHM,
    LEGACY_TRANSPORT_UDP,
};

/// Run `f`, converting any panic into the `on_panic` value plus a
/// last-error message. Panics must never unwind across the C boundary.
pub(crate) fn ffi_boundary<T>(on_panic: T, f: impl FnOnce() -> T) -> T {
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(_) => {
            error::set_panic_error();
            on_panic
        }
    }
}

/// Message for the most recent failure on this thread.
///
/// The pointer stays valid until the next `legacy_agent_*` call on the
/// same thread. Empty string when no error has been recorded.
#[no_mangle]
pub extern "C" fn legacy_agent_last_error() -> *const c_char {
    error::last_error_ptr()
}
