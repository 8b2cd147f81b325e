//! The callback ABI generated code talks to the engine through.
//!
//! These free functions are the sole interface between a running template
//! and the engine, for both backends: the JIT registers them as symbols
//! with the module builder, and the emitted C source calls them by name
//! (they are exported unmangled so a loaded shared object can resolve
//! them against the host process).
//!
//! Every function that returns a value pointer returns a non-null pointer;
//! missing lookups resolve to the shared empty value, so generated code
//! never checks for null.
//!
//! # Safety
//!
//! `userdata` is always the [`Handler`] of the running render; value,
//! iterator and modifier pointers were all handed out by these callbacks
//! earlier in the same render and stay alive until it completes. A render
//! is single-threaded, so the handler is never aliased concurrently.

use std::ffi::c_void;
use std::slice;
use std::str;

use crate::value::{empty, Value, VariantValue};

use super::handler::{Handler, IteratorFrame, ModifierFrame};

unsafe fn handler<'h>(userdata: *mut c_void) -> &'h mut Handler<'h> {
    &mut *(userdata as *mut Handler)
}

unsafe fn text<'a>(buf: *const u8, size: usize) -> &'a str {
    let bytes = slice::from_raw_parts(buf, size);
    // template names and literals are produced from &str, so this holds
    str::from_utf8(bytes).unwrap_or("")
}

unsafe fn value<'a>(variable: *const c_void) -> &'a VariantValue {
    &*(variable as *const VariantValue)
}

/// Appends raw bytes to the output buffer.
///
/// # Safety
/// See the module-level contract.
#[no_mangle]
pub unsafe extern "C" fn smart_tpl_write(userdata: *mut c_void, buf: *const u8, size: usize) {
    let text = text(buf, size);
    handler(userdata).write(text);
}

/// Appends a value's string form, escaped when `escape` is non-zero.
///
/// # Safety
/// See the module-level contract.
#[no_mangle]
pub unsafe extern "C" fn smart_tpl_output(
    userdata: *mut c_void,
    variable: *const c_void,
    escape: i32,
) {
    let variable = value(variable);
    handler(userdata).output(variable, escape != 0);
}

/// Resolves a variable by name; locals first, then the data binding.
///
/// # Safety
/// See the module-level contract.
#[no_mangle]
pub unsafe extern "C" fn smart_tpl_variable(
    userdata: *mut c_void,
    name: *const u8,
    size: usize,
) -> *const c_void {
    let name = text(name, size);
    handler(userdata).variable(name) as *const c_void
}

/// Resolves a member of a value by name.
///
/// # Safety
/// See the module-level contract.
#[no_mangle]
pub unsafe extern "C" fn smart_tpl_member(
    userdata: *mut c_void,
    variable: *const c_void,
    name: *const u8,
    size: usize,
) -> *const c_void {
    let name = text(name, size);
    let member = value(variable).member(name);
    match member {
        Some(member) => handler(userdata).adopt(member) as *const c_void,
        None => {
            handler(userdata).warn(format!("unresolved member '{}'", name));
            empty() as *const VariantValue as *const c_void
        }
    }
}

/// Resolves a member of a value by position.
///
/// # Safety
/// See the module-level contract.
#[no_mangle]
pub unsafe extern "C" fn smart_tpl_member_at(
    userdata: *mut c_void,
    variable: *const c_void,
    position: i64,
) -> *const c_void {
    let member = usize::try_from(position)
        .ok()
        .and_then(|position| value(variable).member_at(position));
    match member {
        Some(member) => handler(userdata).adopt(member) as *const c_void,
        None => {
            handler(userdata).warn(format!("no member at position {}", position));
            empty() as *const VariantValue as *const c_void
        }
    }
}

/// The string form of a value. The buffer stays valid for the render; its
/// length comes from `smart_tpl_size`.
///
/// # Safety
/// See the module-level contract.
#[no_mangle]
pub unsafe extern "C" fn smart_tpl_to_string(
    _userdata: *mut c_void,
    variable: *const c_void,
) -> *const u8 {
    value(variable).as_string().as_ptr()
}

/// The numeric form of a value.
///
/// # Safety
/// See the module-level contract.
#[no_mangle]
pub unsafe extern "C" fn smart_tpl_to_numeric(
    _userdata: *mut c_void,
    variable: *const c_void,
) -> i64 {
    value(variable).to_numeric()
}

/// The boolean form of a value, 1 or 0.
///
/// # Safety
/// See the module-level contract.
#[no_mangle]
pub unsafe extern "C" fn smart_tpl_to_boolean(
    _userdata: *mut c_void,
    variable: *const c_void,
) -> i32 {
    i32::from(value(variable).to_boolean())
}

/// The floating point form of a value.
///
/// # Safety
/// See the module-level contract.
#[no_mangle]
pub unsafe extern "C" fn smart_tpl_to_double(
    _userdata: *mut c_void,
    variable: *const c_void,
) -> f64 {
    value(variable).to_double()
}

/// Length of a value's string form in bytes.
///
/// # Safety
/// See the module-level contract.
#[no_mangle]
pub unsafe extern "C" fn smart_tpl_size(_userdata: *mut c_void, variable: *const c_void) -> usize {
    value(variable).size()
}

/// Wraps a computed integer as an engine value, so a statically numeric
/// expression can be written as a string.
///
/// # Safety
/// See the module-level contract.
#[no_mangle]
pub unsafe extern "C" fn smart_tpl_numeric_to_string(
    userdata: *mut c_void,
    value: i64,
) -> *const c_void {
    handler(userdata).numeric_value(value) as *const c_void
}

/// Wraps a computed double as an engine value.
///
/// # Safety
/// See the module-level contract.
#[no_mangle]
pub unsafe extern "C" fn smart_tpl_double_to_string(
    userdata: *mut c_void,
    value: f64,
) -> *const c_void {
    handler(userdata).double_value(value) as *const c_void
}

/// Best-effort numeric parse of a string buffer.
///
/// # Safety
/// See the module-level contract.
#[no_mangle]
pub unsafe extern "C" fn smart_tpl_string_to_numeric(
    _userdata: *mut c_void,
    buf: *const u8,
    size: usize,
) -> i64 {
    use crate::value::StringValue;
    StringValue::new(text(buf, size)).to_numeric()
}

/// Creates an iterator over a value. A non-iterable value yields an
/// iterator that is invalid from the start.
///
/// # Safety
/// See the module-level contract.
#[no_mangle]
pub unsafe extern "C" fn smart_tpl_create_iterator(
    userdata: *mut c_void,
    variable: *const c_void,
) -> *mut c_void {
    let variable = value(variable);
    handler(userdata).create_iterator(variable) as *mut c_void
}

/// Whether the iterator still points at a member.
///
/// # Safety
/// See the module-level contract.
#[no_mangle]
pub unsafe extern "C" fn smart_tpl_valid_iterator(
    _userdata: *mut c_void,
    iterator: *mut c_void,
) -> i32 {
    let frame = &*(iterator as *const IteratorFrame);
    i32::from(Handler::valid_iterator(frame))
}

/// Advances the iterator.
///
/// # Safety
/// See the module-level contract.
#[no_mangle]
pub unsafe extern "C" fn smart_tpl_iterator_next(_userdata: *mut c_void, iterator: *mut c_void) {
    let frame = &mut *(iterator as *mut IteratorFrame);
    Handler::iterator_next(frame);
}

/// The key at the iterator's position.
///
/// # Safety
/// See the module-level contract.
#[no_mangle]
pub unsafe extern "C" fn smart_tpl_iterator_key(
    userdata: *mut c_void,
    iterator: *mut c_void,
) -> *const c_void {
    handler(userdata).iterator_key(iterator as *mut IteratorFrame) as *const c_void
}

/// The value at the iterator's position.
///
/// # Safety
/// See the module-level contract.
#[no_mangle]
pub unsafe extern "C" fn smart_tpl_iterator_value(
    userdata: *mut c_void,
    iterator: *mut c_void,
) -> *const c_void {
    handler(userdata).iterator_value(iterator as *mut IteratorFrame) as *const c_void
}

/// Compares two string buffers: 0 when equal, non-zero otherwise.
///
/// # Safety
/// See the module-level contract.
#[no_mangle]
pub unsafe extern "C" fn smart_tpl_strcmp(
    _userdata: *mut c_void,
    a: *const u8,
    a_len: usize,
    b: *const u8,
    b_len: usize,
) -> i32 {
    let a = slice::from_raw_parts(a, a_len);
    let b = slice::from_raw_parts(b, b_len);
    i32::from(a != b)
}

/// Resolves a modifier token (`name` or `name:args`). Unknown modifiers
/// record a runtime error and resolve to null.
///
/// # Safety
/// See the module-level contract.
#[no_mangle]
pub unsafe extern "C" fn smart_tpl_modifier(
    userdata: *mut c_void,
    name: *const u8,
    size: usize,
) -> *mut c_void {
    let token = text(name, size);
    handler(userdata).modifier(token) as *mut c_void
}

/// Applies a resolved modifier to a value; a null handle passes the value
/// through unchanged.
///
/// # Safety
/// See the module-level contract.
#[no_mangle]
pub unsafe extern "C" fn smart_tpl_modify_variable(
    userdata: *mut c_void,
    modifier: *const c_void,
    variable: *const c_void,
) -> *const c_void {
    handler(userdata).modify(
        modifier as *const ModifierFrame,
        variable as *const VariantValue,
    ) as *const c_void
}

/// Binds a local name to an existing value.
///
/// # Safety
/// See the module-level contract.
#[no_mangle]
pub unsafe extern "C" fn smart_tpl_assign(
    userdata: *mut c_void,
    name: *const u8,
    size: usize,
    variable: *const c_void,
) {
    let name = text(name, size);
    handler(userdata).assign(name, variable as *const VariantValue);
}

/// Binds a local name to a boolean.
///
/// # Safety
/// See the module-level contract.
#[no_mangle]
pub unsafe extern "C" fn smart_tpl_assign_boolean(
    userdata: *mut c_void,
    name: *const u8,
    size: usize,
    value: i32,
) {
    let name = text(name, size);
    handler(userdata).assign_boolean(name, value != 0);
}

/// Binds a local name to an integer.
///
/// # Safety
/// See the module-level contract.
#[no_mangle]
pub unsafe extern "C" fn smart_tpl_assign_numeric(
    userdata: *mut c_void,
    name: *const u8,
    size: usize,
    value: i64,
) {
    let name = text(name, size);
    handler(userdata).assign_numeric(name, value);
}

/// Binds a local name to a double.
///
/// # Safety
/// See the module-level contract.
#[no_mangle]
pub unsafe extern "C" fn smart_tpl_assign_double(
    userdata: *mut c_void,
    name: *const u8,
    size: usize,
    value: f64,
) {
    let name = text(name, size);
    handler(userdata).assign_double(name, value);
}

/// Binds a local name to a copied string.
///
/// # Safety
/// See the module-level contract.
#[no_mangle]
pub unsafe extern "C" fn smart_tpl_assign_string(
    userdata: *mut c_void,
    name: *const u8,
    size: usize,
    buf: *const u8,
    buf_size: usize,
) {
    let name = text(name, size);
    let value = text(buf, buf_size);
    handler(userdata).assign_string(name, value);
}

/// Reports a runtime fault; the first one wins and ends the render's
/// observable output.
///
/// # Safety
/// See the module-level contract.
#[no_mangle]
pub unsafe extern "C" fn smart_tpl_error(userdata: *mut c_void, message: *const u8, size: usize) {
    let message = text(message, size);
    handler(userdata).error(message);
}
