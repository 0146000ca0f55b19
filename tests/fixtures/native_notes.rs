//! Native notes plugin, built as a cdylib by the integration tests.
#![allow(non_snake_case)]

use std::ffi::CStr;
use std::os::raw::{c_char, c_int};

/// Succeeds only for the exact UTF-8 bytes of "héllo"
#[no_mangle]
pub unsafe extern "C" fn onSave(text: *const c_char) -> c_int {
    if text.is_null() {
        return 2;
    }
    let text = CStr::from_ptr(text);
    if text.to_bytes() == "héllo".as_bytes() {
        0
    } else {
        5
    }
}

#[no_mangle]
pub extern "C" fn onTrigger() -> c_int {
    7
}

/// Fails on empty state
#[no_mangle]
pub unsafe extern "C" fn onResume(state: *const c_char) -> c_int {
    if state.is_null() {
        return 2;
    }
    if CStr::from_ptr(state).to_bytes().is_empty() {
        3
    } else {
        0
    }
}
