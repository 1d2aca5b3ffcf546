//! Interoperability - typed calls into native code
//!
//! Architecture:
//! - `types.rs` - kind enumeration and signature characters
//! - `value.rs` - dynamically typed values and coercion
//! - `signature.rs` - signature string parser
//! - `abi.rs` - calling conventions and their libffi ABIs
//! - `vm.rs` - call machine trait, libffi machine, call context
//! - `call.rs` - `Function` and the dispatcher
//! - `library.rs` - dynamic library loading (dlopen/LoadLibrary)

mod abi;
mod call;
mod library;
mod signature;
mod types;
mod value;
mod vm;

pub use abi::Convention;
pub use call::Function;
pub(crate) use call::demarshal;
pub use library::{find_binary, libc_name, parse_signature, Library};
pub use signature::Signature;
pub use types::{Kind, SIGCHAR_ENDARG};
pub use value::Value;
pub use vm::{
    last_error, with_default_context, CallContext, CallVm, FfiCallVm, DEFAULT_CIF_CACHE_SIZE,
    ERROR_NONE, ERROR_UNSUPPORTED_MODE,
};

pub use crate::infrastructure::metrics::InteropStats;

/// Snapshot of the process-wide interop counters
pub fn stats() -> InteropStats {
    crate::infrastructure::metrics::interop().snapshot()
}

#[cfg(test)]
mod tests;
