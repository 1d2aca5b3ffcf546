//! Inline hooks: retour detours into libffi closures
//!
//! Each hook gets a closure with the hooked function's signature. The
//! closure decodes the native arguments, runs the bridge, calls the
//! trampoline for the original code and encodes the result.

use super::{Bridge, HookId, HookManager, HookRecord};
use crate::errors::{Error, Result};
use crate::interop::{demarshal, CallContext, Function, Kind, Value};
use crate::memory::Pointer;
use libffi::low::ffi_cif;
use libffi::middle::{Cif, Closure};
use libffi::raw::ffi_arg;
use parking_lot::Mutex;
use retour::RawDetour;
use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::{c_void, CString};
use tracing::{error, warn};

thread_local! {
    /// Last string a callback handed back to native code on this thread
    static RETURNED_STRING: RefCell<Option<CString>> = RefCell::new(None);
}

struct HandlerData {
    /// Same signature as the target, pointing at the trampoline
    original: Function,
    bridge: Bridge,
    ctx: Mutex<CallContext>,
}

impl HandlerData {
    /// Run the trampoline; `String` results stay raw pointers
    fn call_original(&self, args: &[Value]) -> Value {
        // Recursion into the same hook finds the context locked
        let result = match self.ctx.try_lock() {
            Some(mut ctx) => self.original.call_raw(&mut ctx, args),
            None => self.original.call_raw(&mut CallContext::default(), args),
        };
        result.unwrap_or_else(|err| {
            error!(target: "hooks", hook = self.bridge.id().0, %err, "calling original failed");
            Value::None
        })
    }
}

unsafe extern "C" fn handler(
    _cif: &ffi_cif,
    result: &mut u64,
    args: *const *const c_void,
    data: &HandlerData,
) {
    let signature = data.original.signature();
    let ret = signature.return_kind();

    let raw: Vec<Value> = signature
        .params()
        .iter()
        .enumerate()
        .map(|(index, kind)| decode_arg(*args.add(index), *kind))
        .collect();
    let shown: Vec<Value> = raw
        .iter()
        .zip(signature.params())
        .map(|(value, kind)| demarshal(value.clone(), *kind))
        .collect();

    // Unchanged string arguments go through as the caller's own pointers,
    // and an untouched string result as the callee's.
    let mut original_return = None;
    let value = data.bridge.dispatch(shown.clone(), |args| {
        let passed: Vec<Value> = args
            .iter()
            .zip(shown.iter().zip(&raw))
            .map(|(arg, (seen, raw))| if arg == seen { raw.clone() } else { arg.clone() })
            .collect();
        let raw_return = data.call_original(&passed);
        let value = demarshal(raw_return.clone(), ret);
        original_return = Some((value.clone(), raw_return));
        value
    });

    let value = match original_return {
        Some((seen, raw_return)) if seen == value => raw_return,
        _ => value,
    };
    encode_return(result, ret, value, data.bridge.id());
}

/// Argument as stored in its slot; strings come back as their `char*`
unsafe fn decode_arg(slot: *const c_void, kind: Kind) -> Value {
    let kind = if kind == Kind::String { Kind::Pointer } else { kind };
    Pointer::from_raw(slot)
        .get_value(kind, 0)
        .unwrap_or(Value::None)
}

unsafe fn encode_return(result: *mut u64, kind: Kind, value: Value, hook: HookId) {
    if kind == Kind::Void {
        return;
    }

    let coerced = match (kind, value) {
        (Kind::String, Value::String(s)) => {
            let address = s.as_ptr() as usize;
            RETURNED_STRING.with(|slot| *slot.borrow_mut() = Some(s));
            Value::Pointer(Pointer::from_address(address))
        }
        (kind, value) => value.coerce(kind, 0).unwrap_or_else(|err| {
            warn!(target: "hooks", hook = hook.0, %err, "bad hook return value, returning zero");
            Value::None
        }),
    };

    match coerced {
        Value::Float(v) => *(result as *mut f32) = v,
        Value::Double(v) => *(result as *mut f64) = v,
        Value::Pointer(p) => *(result as *mut usize) = p.address(),
        other => {
            let v = other.as_integer().unwrap_or(0);
            if kind.is_integral() && kind.size() == 8 {
                *result = v as u64;
            } else {
                // Narrow integers are returned widened to a full ffi_arg
                *(result as *mut ffi_arg) = v as ffi_arg;
            }
        }
    }
}

struct HookEntry {
    record: HookRecord,
    detour: RawDetour,
    closure: Option<Closure<'static>>,
    data: *mut HandlerData,
}

// The raw handler data is only touched by the closure and by Drop
unsafe impl Send for HookEntry {}

impl Drop for HookEntry {
    fn drop(&mut self) {
        unsafe {
            if let Err(err) = self.detour.disable() {
                error!(target: "hooks", target_address = %self.record.target, %err, "failed to disable detour");
                // The closure may still be reached; leak it with its data
                if let Some(closure) = self.closure.take() {
                    std::mem::forget(closure);
                }
                return;
            }
            drop(self.closure.take());
            drop(Box::from_raw(self.data));
        }
    }
}

/// Hook manager installing retour detours
#[derive(Default)]
pub struct DetourHookManager {
    hooks: HashMap<Pointer, HookEntry>,
}

impl DetourHookManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

}

impl HookManager for DetourHookManager {
    fn find_hook(&self, target: Pointer) -> Option<HookRecord> {
        self.hooks.get(&target).map(|entry| entry.record)
    }

    fn uninstall_hook(&mut self, target: Pointer) -> Option<HookRecord> {
        let entry = self.hooks.remove(&target)?;
        Some(entry.record)
    }

    fn install_hook(&mut self, function: &Function, bridge: Bridge) -> Result<HookRecord> {
        let install_error = |reason: String| Error::HookInstall {
            address: function.address(),
            reason,
        };

        let signature = function.signature();
        let mut cif = Cif::new(
            signature.params().iter().map(|k| k.ffi_type()),
            signature.return_kind().ffi_type(),
        );
        cif.set_abi(function.convention().abi_or_default());

        let data = Box::into_raw(Box::new(HandlerData {
            original: function.clone(),
            bridge: bridge.clone(),
            ctx: Mutex::new(CallContext::default()),
        }));

        // SAFETY: `data` stays alive until the entry drops the closure
        let closure = Closure::new(cif, handler, unsafe { &*data });
        let entry_point = *closure.code_ptr() as *const ();

        let detour = match unsafe { RawDetour::new(function.pointer().as_ptr::<()>(), entry_point) } {
            Ok(detour) => detour,
            Err(err) => {
                drop(closure);
                drop(unsafe { Box::from_raw(data) });
                return Err(install_error(err.to_string()));
            }
        };

        // SAFETY: the trampoline lives as long as the detour
        let original = unsafe { Pointer::from_raw(detour.trampoline() as *const ()) };
        // SAFETY: the trampoline runs the displaced code of `function`
        unsafe { (*data).original = function.at(original) };

        if let Err(err) = unsafe { detour.enable() } {
            drop(closure);
            drop(unsafe { Box::from_raw(data) });
            return Err(install_error(err.to_string()));
        }

        let record = HookRecord {
            id: bridge.id(),
            target: function.pointer(),
            original,
        };
        self.hooks.insert(
            function.pointer(),
            HookEntry {
                record,
                detour,
                closure: Some(closure),
                data,
            },
        );
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(kind: Kind, value: Value) -> u64 {
        let mut slot = 0u64;
        unsafe { encode_return(&mut slot, kind, value, HookId(1)) };
        slot
    }

    #[test]
    fn test_wide_integers_keep_high_bits() {
        assert_eq!(encoded(Kind::LongLong, Value::LongLong(0x1_0000_0002)), 0x1_0000_0002);
        assert_eq!(encoded(Kind::ULongLong, Value::ULongLong(u64::MAX)), u64::MAX);
        assert_eq!(encoded(Kind::LongLong, Value::LongLong(-1)), u64::MAX);
        if Kind::Long.size() == 8 {
            assert_eq!(encoded(Kind::Long, Value::Long(-0x1_0000_0000)), (-0x1_0000_0000i64) as u64);
        }
    }

    #[test]
    fn test_narrow_integers_fill_ffi_arg() {
        assert_eq!(encoded(Kind::Int, Value::Int(-1)) as ffi_arg, ffi_arg::MAX);
        assert_eq!(encoded(Kind::UChar, Value::Int(200)) as ffi_arg, 200);
        assert_eq!(encoded(Kind::Bool, Value::Bool(true)) as ffi_arg, 1);
    }

    #[test]
    fn test_floats_and_void() {
        assert_eq!(encoded(Kind::Double, Value::Double(2.5)), 2.5f64.to_bits());
        assert_eq!(encoded(Kind::Float, Value::Int(3)) as u32, 3.0f32.to_bits());
        assert_eq!(encoded(Kind::Void, Value::Int(9)), 0);
        assert_eq!(encoded(Kind::Int, Value::string("x").unwrap()), 0);
    }

    #[test]
    fn test_string_results() {
        // The callee's own buffer goes back untouched
        let original = CString::new("from callee").unwrap();
        let address = original.as_ptr() as usize;
        let raw = Value::Pointer(unsafe { Pointer::from_address(address) });
        assert_eq!(encoded(Kind::String, raw) as usize, address);
        assert_eq!(encoded(Kind::String, Value::None), 0);

        // A replacement lives on this thread until the next one
        let slot = encoded(Kind::String, Value::string("patched").unwrap()) as usize;
        let kept = RETURNED_STRING.with(|kept| {
            kept.borrow().as_ref().map(|s| s.as_ptr() as usize)
        });
        assert_eq!(kept, Some(slot));
        let text = unsafe { Pointer::from_address(slot).get_string(0, false) }.unwrap();
        assert_eq!(text.as_deref(), Some("patched"));

        let other_thread = std::thread::spawn(|| {
            RETURNED_STRING.with(|kept| kept.borrow().is_none())
        });
        assert!(other_thread.join().unwrap());
    }

    #[test]
    fn test_string_arguments_decode_to_pointers() {
        let text = CString::new("arg").unwrap();
        let slot = text.as_ptr();
        let raw = unsafe { decode_arg(&slot as *const _ as *const c_void, Kind::String) };
        assert_eq!(raw.as_pointer().map(|p| p.address()), Some(text.as_ptr() as usize));
        assert_eq!(demarshal(raw, Kind::String).as_str(), Some("arg"));
    }
}
