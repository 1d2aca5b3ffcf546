//! binutils - raw memory, dynamic foreign calls and inline hooks
//!
//! A [`Pointer`] reads and writes typed values at addresses, a [`Function`]
//! calls native code described by a signature string such as `"ii)i"`, and
//! the [`hooks`] module redirects native functions through pre/post
//! callbacks. Type layouts and function manifests load from TOML.

// Core modules
pub mod errors;
pub mod interop;
pub mod memory;
pub mod hooks;
pub mod layout;
pub mod frontend;
pub mod infrastructure;
pub mod bindings;

// Re-export commonly used items
pub use errors::{Error, Result, SignatureFault};
pub use interop::{
    find_binary, CallContext, CallVm, Convention, FfiCallVm, Function, Kind, Library, Signature,
    Value,
};
pub use memory::Pointer;
pub use hooks::{callback, Callback, HookAction, HookCall, HookId, HookManager, HookPhase, HookRecord, HookRegistry};
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub use hooks::DetourHookManager;
pub use layout::{Instance, Member, TypeLayout, TypeManager};
pub use frontend::{cli_main, Config, Pipe};
