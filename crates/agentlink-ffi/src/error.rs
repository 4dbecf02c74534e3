use std::cell::RefCell;
use std::ffi::CString;
use std::os::raw::c_char;

use agentlink_client::ClientError;

use crate::types::LegacyStatus;

thread_local! {
    static LAST_ERROR: RefCell<CString> = RefCell::new(CString::default());
}

pub(crate) fn clear_error_state() {
    LAST_ERROR.with(|state| {
        *state.borrow_mut() = CString::default();
    });
}

pub(crate) fn set_error_message(message: impl Into<String>) {
    let message = message.into();
    let sanitized = message.replace('\0', "?");
    LAST_ERROR.with(|state| {
        *state.borrow_mut() = CString::new(sanitized).unwrap_or_default();
    });
}

pub(crate) fn set_invalid_argument(message: impl Into<String>) -> LegacyStatus {
    set_error_message(message);
    LegacyStatus::InvalidArgument
}

pub(crate) fn set_panic_error() {
    set_error_message("panic across FFI boundary");
}

pub(crate) fn map_client_error(err: &ClientError) -> LegacyStatus {
    set_error_message(err.to_string());
    match err {
        ClientError::InvalidArgument(_) | ClientError::AdapterMissing { .. } => {
            LegacyStatus::InvalidArgument
        }
        ClientError::Transport(_) => LegacyStatus::Transport,
        ClientError::Wire(_) | ClientError::Codec(_) => LegacyStatus::Protocol,
        ClientError::Thread(_) => LegacyStatus::Internal,
        ClientError::Closed => LegacyStatus::Closed,
    }
}

pub(crate) fn last_error_ptr() -> *const c_char {
    LAST_ERROR.with(|state| state.borrow().as_ptr())
}
