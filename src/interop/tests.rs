//! Dispatch tests against real native functions

use super::*;
use crate::errors::Error;
use crate::memory::Pointer;
use std::ffi::CString;
use std::os::raw::{c_char, c_long};

extern "C" fn add_i32(a: i32, b: i32) -> i32 {
    a + b
}

extern "C" fn mul_f64(a: f64, b: f64) -> f64 {
    a * b
}

extern "C" fn half_f32(a: f32) -> f32 {
    a / 2.0
}

extern "C" fn identity_ptr(ptr: *const core::ffi::c_void) -> *const core::ffi::c_void {
    ptr
}

extern "C" fn no_args() -> i32 {
    42
}

extern "C" fn negate_char(c: i8) -> i8 {
    -c
}

extern "C" fn max_ushort() -> u16 {
    u16::MAX
}

extern "C" fn wide(a: i64, b: u64, c: c_long) -> i64 {
    a + b as i64 + c as i64
}

extern "C" fn flip(b: bool) -> bool {
    !b
}

extern "C" fn strlen_of(s: *const c_char) -> i32 {
    if s.is_null() {
        return -1;
    }
    unsafe { std::ffi::CStr::from_ptr(s).to_bytes().len() as i32 }
}

extern "C" fn greeting() -> *const c_char {
    b"hello\0".as_ptr() as *const c_char
}

extern "C" fn nothing() -> *const c_char {
    core::ptr::null()
}

fn function(f: *const (), sig: &str) -> Function {
    // SAFETY: every caller passes an extern "C" fn matching `sig`
    unsafe { Function::parse(Pointer::from_raw(f), Convention::Cdecl, sig) }.unwrap()
}

#[test]
fn test_kind_sizes() {
    assert_eq!(Kind::Char.size(), 1);
    assert_eq!(Kind::Short.size(), 2);
    assert_eq!(Kind::Int.size(), 4);
    assert_eq!(Kind::LongLong.size(), 8);
    assert_eq!(Kind::Float.size(), 4);
    assert_eq!(Kind::Double.size(), 8);
    assert_eq!(Kind::Pointer.size(), core::mem::size_of::<usize>());
    assert_eq!(Kind::Void.size(), 0);

    assert!(Kind::ULong.is_integral());
    assert!(!Kind::Bool.is_integral());
    assert!(!Kind::Double.is_integral());
    assert!(!Kind::Pointer.is_integral());
}

#[test]
fn test_kind_chars_round_trip() {
    for kind in Kind::ALL {
        assert_eq!(Kind::from_char(kind.as_char()), Some(kind));
    }
    assert_eq!(Kind::from_char('x'), None);
}

#[test]
fn test_call_no_args() {
    let mut ctx = CallContext::default();
    assert_eq!(function(no_args as *const (), ")i").call(&mut ctx, &[]).unwrap(), Value::Int(42));
    assert_eq!(function(no_args as *const (), "v)i").call(&mut ctx, &[]).unwrap(), Value::Int(42));
}

#[test]
fn test_call_floats() {
    let mut ctx = CallContext::default();
    let f = function(mul_f64 as *const (), "dd)d");
    assert_eq!(f.call(&mut ctx, &[Value::Double(1.5), Value::Int(4)]).unwrap(), Value::Double(6.0));

    let f = function(half_f32 as *const (), "f)f");
    assert_eq!(f.call(&mut ctx, &[Value::Float(3.0)]).unwrap(), Value::Float(1.5));
}

#[test]
fn test_call_narrow_integers() {
    let mut ctx = CallContext::default();
    let f = function(negate_char as *const (), "c)c");
    assert_eq!(f.call(&mut ctx, &[Value::Int(5)]).unwrap(), Value::Char(-5));

    let f = function(max_ushort as *const (), ")S");
    assert_eq!(f.call(&mut ctx, &[]).unwrap(), Value::UShort(u16::MAX));

    let f = function(flip as *const (), "B)B");
    assert_eq!(f.call(&mut ctx, &[Value::Bool(false)]).unwrap(), Value::Bool(true));
}

#[test]
fn test_call_wide_integers() {
    let mut ctx = CallContext::default();
    let f = function(wide as *const (), "lLj)l");
    let out = f
        .call(&mut ctx, &[Value::LongLong(-10), Value::Int(3), Value::Int(4)])
        .unwrap();
    assert_eq!(out, Value::LongLong(-3));
}

#[test]
fn test_call_pointers() {
    let mut ctx = CallContext::default();
    let f = function(identity_ptr as *const (), "p)p");
    let p = unsafe { Pointer::from_address(0x1234) };
    assert_eq!(f.call(&mut ctx, &[Value::Pointer(p)]).unwrap(), Value::Pointer(p));
    assert_eq!(f.call(&mut ctx, &[Value::Int(0x40)]).unwrap().as_pointer().map(|p| p.address()), Some(0x40));
    assert_eq!(f.call(&mut ctx, &[Value::None]).unwrap(), Value::Pointer(Pointer::null()));
}

#[test]
fn test_call_strings() {
    let mut ctx = CallContext::default();
    let f = function(strlen_of as *const (), "Z)i");
    assert_eq!(f.call(&mut ctx, &[Value::string("four").unwrap()]).unwrap(), Value::Int(4));
    assert_eq!(f.call(&mut ctx, &[Value::None]).unwrap(), Value::Int(-1));

    let f = function(greeting as *const (), ")Z");
    assert_eq!(f.call(&mut ctx, &[]).unwrap(), Value::String(CString::new("hello").unwrap()));

    let f = function(nothing as *const (), ")Z");
    assert_eq!(f.call(&mut ctx, &[]).unwrap(), Value::None);
}

#[test]
fn test_unsupported_mode_sets_error() {
    let mut ctx = CallContext::default();
    let f = unsafe {
        Function::parse(Pointer::from_raw(add_i32 as *const ()), Convention::Thiscall, "ii)i")
    }
    .unwrap();
    let out = f.call(&mut ctx, &[Value::Int(1), Value::Int(2)]).unwrap();
    assert_eq!(out, Value::Int(3));

    if Convention::Thiscall.is_distinct() {
        assert_eq!(ctx.last_error(), ERROR_NONE);
    } else {
        assert_eq!(ctx.last_error(), ERROR_UNSUPPORTED_MODE);
    }

    let cdecl = function(add_i32 as *const (), "ii)i");
    cdecl.call(&mut ctx, &[Value::Int(1), Value::Int(2)]).unwrap();
    assert_eq!(ctx.last_error(), ERROR_NONE);
}

#[test]
fn test_interface_cache_reused() {
    let mut ctx = CallContext::with_cache_size(4);
    let f = function(add_i32 as *const (), "ii)i");
    for i in 0..10 {
        f.call(&mut ctx, &[Value::Int(i), Value::Int(i)]).unwrap();
    }
    assert_eq!(ctx.vm().cached_interfaces(), 1);

    function(no_args as *const (), ")i").call(&mut ctx, &[]).unwrap();
    assert_eq!(ctx.vm().cached_interfaces(), 2);
}

#[test]
fn test_default_context_busy_when_nested() {
    let f = function(no_args as *const (), ")i");
    let result = with_default_context(|_| f.call_default(&[]));
    assert_eq!(result, Err(Error::ContextBusy));
    assert_eq!(f.call_default(&[]).unwrap(), Value::Int(42));
}

#[test]
fn test_interop_stats_count_calls() {
    let before = stats();
    let f = function(no_args as *const (), ")i");
    f.call_default(&[]).unwrap();
    let _ = f.call_default(&[Value::Int(1)]);
    let after = stats();
    assert!(after.calls_made > before.calls_made);
    assert!(after.call_failures > before.call_failures);
}
