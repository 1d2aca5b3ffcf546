use binutils::hooks::Bridge;
use binutils::{
    callback, CallContext, Convention, Error, Function, HookAction, HookManager, HookPhase, HookRecord,
    HookRegistry, Pointer, Result, Value,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Manager that keeps bridges and lets the test drive "hooked" calls
#[derive(Default)]
struct SimulatedManager {
    bridges: HashMap<Pointer, (HookRecord, Bridge)>,
}

impl SimulatedManager {
    /// What a hooked call of `target` would do, with `original` as the real code
    fn run(&self, target: Pointer, args: Vec<Value>, original: impl FnOnce(&[Value]) -> Value) -> Value {
        let (_, bridge) = &self.bridges[&target];
        bridge.dispatch(args, original)
    }
}

impl HookManager for SimulatedManager {
    fn find_hook(&self, target: Pointer) -> Option<HookRecord> {
        self.bridges.get(&target).map(|(record, _)| *record)
    }

    fn install_hook(&mut self, function: &Function, bridge: Bridge) -> Result<HookRecord> {
        if function.address() == 0xdead {
            return Err(Error::HookInstall {
                address: function.address(),
                reason: "refused".to_string(),
            });
        }
        let record = HookRecord {
            id: bridge.id(),
            target: function.pointer(),
            original: function.pointer(),
        };
        self.bridges.insert(function.pointer(), (record, bridge));
        Ok(record)
    }

    fn uninstall_hook(&mut self, target: Pointer) -> Option<HookRecord> {
        self.bridges.remove(&target).map(|(record, _)| record)
    }
}

fn target(address: usize) -> Function {
    unsafe { Function::parse(Pointer::from_address(address), Convention::Cdecl, "ii)i") }.unwrap()
}

fn add(args: &[Value]) -> Value {
    let a = args[0].as_integer().unwrap_or(0);
    let b = args[1].as_integer().unwrap_or(0);
    Value::Int((a + b) as i32)
}

#[test]
fn test_pre_hook_rewrites_arguments() {
    let registry = HookRegistry::new(SimulatedManager::default());
    let f = target(0x1000);
    f.add_pre_hook(
        &registry,
        callback(|call| {
            call.args[0] = Value::Int(40);
            HookAction::Continue
        }),
    )
    .unwrap();

    let out = registry.with_manager(|m| m.run(f.pointer(), vec![Value::Int(1), Value::Int(2)], add));
    assert_eq!(out, Value::Int(42));
}

#[test]
fn test_post_hook_sees_result_and_overrides() {
    let registry = HookRegistry::new(SimulatedManager::default());
    let f = target(0x1000);
    let seen = Arc::new(AtomicUsize::new(0));
    let seen_in_hook = Arc::clone(&seen);

    f.add_post_hook(
        &registry,
        callback(move |call| {
            seen_in_hook.store(call.return_value.as_integer().unwrap_or(-1) as usize, Ordering::SeqCst);
            HookAction::Override(Value::Int(0))
        }),
    )
    .unwrap();

    let out = registry.with_manager(|m| m.run(f.pointer(), vec![Value::Int(3), Value::Int(4)], add));
    assert_eq!(seen.load(Ordering::SeqCst), 7);
    assert_eq!(out, Value::Int(0));
}

#[test]
fn test_post_hooks_run_after_pre_override() {
    let registry = HookRegistry::new(SimulatedManager::default());
    let f = target(0x1000);
    let post_runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&post_runs);

    f.add_pre_hook(&registry, callback(|_| HookAction::Override(Value::Int(-1)))).unwrap();
    f.add_post_hook(
        &registry,
        callback(move |call| {
            assert_eq!(call.return_value, Value::Int(-1));
            counter.fetch_add(1, Ordering::SeqCst);
            HookAction::Continue
        }),
    )
    .unwrap();

    let out = registry.with_manager(|m| {
        m.run(f.pointer(), vec![Value::Int(1), Value::Int(1)], |_| panic!("original must not run"))
    });
    assert_eq!(out, Value::Int(-1));
    assert_eq!(post_runs.load(Ordering::SeqCst), 1);
}

#[test]
fn test_callbacks_run_in_registration_order() {
    let registry = HookRegistry::new(SimulatedManager::default());
    let f = target(0x1000);

    for step in 1..=3 {
        f.add_pre_hook(
            &registry,
            callback(move |call| {
                let current = call.args[0].as_integer().unwrap_or(0);
                call.args[0] = Value::Int((current * 10 + step) as i32);
                HookAction::Continue
            }),
        )
        .unwrap();
    }

    let out = registry.with_manager(|m| m.run(f.pointer(), vec![Value::Int(0), Value::Int(0)], add));
    assert_eq!(out, Value::Int(123));
}

#[test]
fn test_removed_callback_no_longer_runs() {
    let registry = HookRegistry::new(SimulatedManager::default());
    let f = target(0x1000);
    let hook = callback(|_| HookAction::Override(Value::Int(0)));

    f.add_pre_hook(&registry, hook.clone()).unwrap();
    f.remove_pre_hook(&registry, &hook);
    // Hook stays installed; it just has nothing to run
    assert!(registry.find(&f).is_some());

    let out = registry.with_manager(|m| m.run(f.pointer(), vec![Value::Int(2), Value::Int(2)], add));
    assert_eq!(out, Value::Int(4));
}

#[test]
fn test_unhook_forgets_callbacks() {
    let registry = HookRegistry::new(SimulatedManager::default());
    let f = target(0x1000);
    f.add_pre_hook(&registry, callback(|_| HookAction::Override(Value::Int(0)))).unwrap();
    f.add_post_hook(&registry, callback(|_| HookAction::Override(Value::Int(0)))).unwrap();

    assert!(f.unhook(&registry));
    assert!(registry.find(&f).is_none());
    assert_eq!(registry.callback_count(&f, HookPhase::Pre), 0);
    assert!(!f.unhook(&registry));

    // A fresh hook does not inherit the old callbacks
    f.add_post_hook(&registry, callback(|_| HookAction::Continue)).unwrap();
    let out = registry.with_manager(|m| m.run(f.pointer(), vec![Value::Int(2), Value::Int(3)], add));
    assert_eq!(out, Value::Int(5));
}

#[test]
fn test_install_failure_keeps_registry_empty() {
    let registry = HookRegistry::new(SimulatedManager::default());
    let f = target(0xdead);

    let err = f.add_pre_hook(&registry, callback(|_| HookAction::Continue)).unwrap_err();
    assert!(matches!(err, Error::HookInstall { address: 0xdead, .. }));
    assert!(registry.find(&f).is_none());
    assert_eq!(registry.callback_count(&f, HookPhase::Pre), 0);
}

#[test]
fn test_trampoline_on_unhooked_function() {
    let registry = HookRegistry::new(SimulatedManager::default());
    let mut ctx = CallContext::default();
    let f = target(0x1000);

    assert_eq!(
        f.call_trampoline(&mut ctx, &registry, &[Value::Int(1), Value::Int(2)]),
        Err(Error::NotHooked { address: 0x1000 })
    );
}

#[cfg(all(target_arch = "x86_64", any(target_os = "linux", target_os = "macos")))]
mod detour {
    use super::*;
    use binutils::DetourHookManager;
    use std::ffi::CStr;
    use std::hint::black_box;
    use std::os::raw::c_char;

    // Large enough body that the detour jump fits without touching a neighbour
    #[inline(never)]
    extern "C" fn scaled_sum(a: i32, b: i32) -> i32 {
        let mut total = 0i32;
        for i in 0..black_box(3) {
            total = total.wrapping_add(a.wrapping_mul(i + 1));
            total = black_box(total);
        }
        total.wrapping_add(b)
    }

    #[test]
    fn test_inline_hook_end_to_end() {
        let native = black_box(scaled_sum as extern "C" fn(i32, i32) -> i32);
        assert_eq!(native(2, 1), 13);

        let registry = HookRegistry::new(DetourHookManager::new());
        let pointer = unsafe { Pointer::from_address(scaled_sum as usize) };
        // SAFETY: `scaled_sum` is `extern "C" fn(i32, i32) -> i32`
        let f = unsafe { pointer.make_function(Convention::Cdecl, "ii)i") }.unwrap();

        f.add_pre_hook(
            &registry,
            callback(|call| {
                call.args[0] = Value::Int(0);
                HookAction::Continue
            }),
        )
        .unwrap();
        assert_eq!(native(2, 1), 1);

        f.add_post_hook(
            &registry,
            callback(|call| {
                let ret = call.return_value.as_integer().unwrap_or(0) as i32;
                HookAction::Override(Value::Int(ret + 100))
            }),
        )
        .unwrap();
        assert_eq!(native(2, 1), 101);

        // Hooked calls through the dispatcher go through the callbacks too
        assert_eq!(f.call_default(&[Value::Int(2), Value::Int(1)]).unwrap(), Value::Int(101));

        let mut ctx = CallContext::default();
        assert_eq!(
            f.call_trampoline(&mut ctx, &registry, &[Value::Int(2), Value::Int(1)]).unwrap(),
            Value::Int(13)
        );

        assert!(f.unhook(&registry));
        assert_eq!(native(2, 1), 13);
        assert_eq!(registry.callback_count(&f, HookPhase::Pre), 0);
    }

    static EVEN: &[u8] = b"even\0";
    static ODD: &[u8] = b"odd\0";

    #[inline(never)]
    extern "C" fn parity(n: i32) -> *const c_char {
        let mut rest = n;
        for _ in 0..black_box(2) {
            rest = black_box(rest);
        }
        if rest % 2 == 0 {
            EVEN.as_ptr() as *const c_char
        } else {
            ODD.as_ptr() as *const c_char
        }
    }

    fn text(ptr: *const c_char) -> String {
        unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
    }

    #[test]
    fn test_hooked_string_return_keeps_callee_pointer() {
        let native = black_box(parity as extern "C" fn(i32) -> *const c_char);
        let registry = HookRegistry::new(DetourHookManager::new());
        let pointer = unsafe { Pointer::from_address(parity as usize) };
        // SAFETY: `parity` is `extern "C" fn(i32) -> *const c_char`
        let f = unsafe { pointer.make_function(Convention::Cdecl, "i)Z") }.unwrap();

        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let observer = callback(move |call| {
            log.lock().push(call.return_value.as_str().map(str::to_string));
            HookAction::Continue
        });
        f.add_post_hook(&registry, observer.clone()).unwrap();

        // Observing only: the caller gets the callee's own buffer back
        assert_eq!(native(4), EVEN.as_ptr() as *const c_char);
        assert_eq!(native(3), ODD.as_ptr() as *const c_char);
        assert_eq!(*seen.lock(), vec![Some("even".to_string()), Some("odd".to_string())]);

        f.remove_post_hook(&registry, &observer);
        f.add_post_hook(&registry, callback(|_| HookAction::Override(Value::string("patched").unwrap())))
            .unwrap();
        let first = native(4);
        assert_eq!(text(first), "patched");

        // A replacement made on another thread leaves this one's intact
        std::thread::spawn(move || text(native(5))).join().unwrap();
        assert_eq!(text(first), "patched");

        assert!(f.unhook(&registry));
        assert_eq!(native(4), EVEN.as_ptr() as *const c_char);
    }
}
