use super::{Callback, HookAction, HookCall, HookId, HookManager, HookPhase, HookRecord};
use crate::errors::{Error, Result};
use crate::infrastructure::metrics;
use crate::interop::{CallContext, CallVm, Function, Value};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace};

#[inline]
fn same_callback(a: &Callback, b: &Callback) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// Callbacks per {hook, phase}, in registration order
#[derive(Default)]
pub struct CallbackTable {
    entries: DashMap<(HookId, HookPhase), Vec<Callback>>,
}

impl CallbackTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, id: HookId, phase: HookPhase, callback: Callback) {
        self.entries.entry((id, phase)).or_default().push(callback);
    }

    /// Remove the first registration of `callback`; false if absent
    pub fn remove(&self, id: HookId, phase: HookPhase, callback: &Callback) -> bool {
        let Some(mut list) = self.entries.get_mut(&(id, phase)) else {
            return false;
        };
        match list.iter().position(|c| same_callback(c, callback)) {
            Some(index) => {
                list.remove(index);
                true
            }
            None => false,
        }
    }

    /// Copy of the list, so callbacks can (de)register while it runs
    pub fn snapshot(&self, id: HookId, phase: HookPhase) -> Vec<Callback> {
        self.entries
            .get(&(id, phase))
            .map(|list| list.clone())
            .unwrap_or_default()
    }

    /// Drop both phase lists of a hook
    pub fn clear(&self, id: HookId) {
        self.entries.remove(&(id, HookPhase::Pre));
        self.entries.remove(&(id, HookPhase::Post));
    }

    pub fn len(&self, id: HookId, phase: HookPhase) -> usize {
        self.entries.get(&(id, phase)).map_or(0, |list| list.len())
    }

    pub fn is_empty(&self, id: HookId, phase: HookPhase) -> bool {
        self.len(id, phase) == 0
    }
}

/// Entry the hook engine invokes for every call of one hooked function
#[derive(Clone)]
pub struct Bridge {
    id: HookId,
    table: Arc<CallbackTable>,
}

impl Bridge {
    pub fn new(id: HookId, table: Arc<CallbackTable>) -> Self {
        Self { id, table }
    }

    pub fn id(&self) -> HookId {
        self.id
    }

    /// Run one hooked call
    ///
    /// Pre callbacks see the decoded arguments and may rewrite them; an
    /// override there skips `original`. Post callbacks always run and may
    /// replace the result.
    pub fn dispatch<F>(&self, args: Vec<Value>, original: F) -> Value
    where
        F: FnOnce(&[Value]) -> Value,
    {
        let mut call = HookCall {
            phase: HookPhase::Pre,
            args,
            return_value: Value::None,
        };

        match self.run(HookPhase::Pre, &mut call) {
            Some(value) => call.return_value = value,
            None => call.return_value = original(&call.args),
        }

        call.phase = HookPhase::Post;
        if let Some(value) = self.run(HookPhase::Post, &mut call) {
            call.return_value = value;
        }
        call.return_value
    }

    fn run(&self, phase: HookPhase, call: &mut HookCall) -> Option<Value> {
        let callbacks = self.table.snapshot(self.id, phase);
        if callbacks.is_empty() {
            return None;
        }

        trace!(target: "hooks", hook = self.id.0, %phase, count = callbacks.len(), "running callbacks");
        metrics::interop().record_callbacks(callbacks.len());

        let mut result = None;
        for callback in callbacks {
            if let HookAction::Override(value) = callback(call) {
                if phase == HookPhase::Post {
                    call.return_value = value.clone();
                }
                result = Some(value);
            }
        }
        result
    }
}

/// Callback registrations on top of a hook manager
pub struct HookRegistry<M: HookManager> {
    manager: Mutex<M>,
    table: Arc<CallbackTable>,
    next_id: AtomicU64,
}

impl<M: HookManager> HookRegistry<M> {
    pub fn new(manager: M) -> Self {
        Self {
            manager: Mutex::new(manager),
            table: Arc::new(CallbackTable::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Run `f` with exclusive access to the manager
    pub fn with_manager<R>(&self, f: impl FnOnce(&mut M) -> R) -> R {
        f(&mut self.manager.lock())
    }

    /// Hook record for `function`, if hooked
    pub fn find(&self, function: &Function) -> Option<HookRecord> {
        self.manager.lock().find_hook(function.pointer())
    }

    /// Number of callbacks registered for `function` in `phase`
    pub fn callback_count(&self, function: &Function, phase: HookPhase) -> usize {
        self.find(function)
            .map_or(0, |record| self.table.len(record.id, phase))
    }

    /// Register `callback`, installing the hook on first use
    pub fn add_callback(&self, function: &Function, phase: HookPhase, callback: Callback) -> Result<()> {
        if !function.is_valid() {
            return Err(Error::NullPointer {
                context: "function address",
            });
        }

        let record = {
            let mut manager = self.manager.lock();
            match manager.find_hook(function.pointer()) {
                Some(record) => record,
                None => {
                    let id = HookId(self.next_id.fetch_add(1, Ordering::Relaxed));
                    let bridge = Bridge::new(id, Arc::clone(&self.table));
                    let record = manager.install_hook(function, bridge)?;
                    metrics::interop().record_hook_installed();
                    info!(
                        target: "hooks",
                        hook = record.id.0,
                        target_address = %record.target,
                        original = %record.original,
                        "hook installed"
                    );
                    record
                }
            }
        };

        debug!(target: "hooks", hook = record.id.0, %phase, "callback added");
        self.table.push(record.id, phase, callback);
        Ok(())
    }

    /// Unregister `callback`; no-op when not hooked or not registered
    pub fn remove_callback(&self, function: &Function, phase: HookPhase, callback: &Callback) {
        if let Some(record) = self.find(function) {
            if self.table.remove(record.id, phase, callback) {
                debug!(target: "hooks", hook = record.id.0, %phase, "callback removed");
            }
        }
    }

    /// Remove the hook on `function` with all of its callbacks
    ///
    /// False when `function` was not hooked.
    pub fn uninstall(&self, function: &Function) -> bool {
        let Some(record) = self.manager.lock().uninstall_hook(function.pointer()) else {
            return false;
        };
        self.table.clear(record.id);
        info!(target: "hooks", hook = record.id.0, target_address = %record.target, "hook removed");
        true
    }

    /// Call the unhooked code of `function`; callbacks do not run
    pub fn call_original<V: CallVm>(
        &self,
        ctx: &mut CallContext<V>,
        function: &Function,
        args: &[Value],
    ) -> Result<Value> {
        if !function.is_valid() {
            return Err(Error::NullPointer {
                context: "function address",
            });
        }
        let record = self.find(function).ok_or(Error::NotHooked {
            address: function.address(),
        })?;
        // SAFETY: the trampoline runs the displaced code of `function`
        unsafe { function.at(record.original) }.call(ctx, args)
    }
}
