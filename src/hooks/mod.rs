//! Function hooking
//!
//! Architecture:
//! - `registry.rs` - callback table, the bridge run by every hooked call,
//!   and `HookRegistry` tying callbacks to a hook manager
//! - `detour.rs` - `DetourHookManager`, inline hooks via retour + libffi
//!   closures (x86/x86_64 only)
//!
//! The hook engine is reached only through [`HookManager`]; everything the
//! scripting side registers goes through the registry.

mod registry;

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
mod detour;

pub use registry::{Bridge, CallbackTable, HookRegistry};

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub use detour::DetourHookManager;

use crate::errors::Result;
use crate::interop::{Function, Value};
use crate::memory::Pointer;
use std::fmt;
use std::sync::Arc;

/// When a callback runs relative to the original function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPhase {
    Pre,
    Post,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pre => "pre",
            Self::Post => "post",
        })
    }
}

/// Identity of one installed hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HookId(pub u64);

/// What the manager knows about an installed hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookRecord {
    pub id: HookId,
    /// Address that was hooked
    pub target: Pointer,
    /// Entry that runs the unhooked code (trampoline)
    pub original: Pointer,
}

/// State visible to a callback during one hooked call
#[derive(Debug, Clone, PartialEq)]
pub struct HookCall {
    pub phase: HookPhase,
    /// Decoded arguments; pre callbacks may rewrite them
    pub args: Vec<Value>,
    /// `Value::None` until the original ran or a callback overrode it
    pub return_value: Value,
}

/// Callback verdict
#[derive(Debug, Clone, PartialEq)]
pub enum HookAction {
    Continue,
    /// Pre: skip the original and return this. Post: replace the result.
    Override(Value),
}

/// Shared hook callback; identity is the `Arc` allocation
pub type Callback = Arc<dyn Fn(&mut HookCall) -> HookAction + Send + Sync>;

/// Wrap a closure as a [`Callback`]
pub fn callback<F>(f: F) -> Callback
where
    F: Fn(&mut HookCall) -> HookAction + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Hook engine interface
pub trait HookManager: Send {
    /// Record of the hook on `target`, if any
    fn find_hook(&self, target: Pointer) -> Option<HookRecord>;

    /// Hook `function` so each call goes through `bridge`
    ///
    /// The returned record must carry `bridge.id()`.
    fn install_hook(&mut self, function: &Function, bridge: Bridge) -> Result<HookRecord>;

    /// Restore the original code of `target`; the removed record, if any
    fn uninstall_hook(&mut self, target: Pointer) -> Option<HookRecord>;
}
