//! Typed foreign calls
//!
//! A [`Function`] is an address plus convention plus signature. `call`
//! validates and coerces every argument up front, so a rejected call never
//! reaches the machine.
//!
//! Building a `Function` is the unsafe step: it asserts that the address is
//! code with the declared signature and convention. Calls through it are
//! safe afterwards.

use super::abi::Convention;
use super::signature::Signature;
use super::types::Kind;
use super::value::Value;
use super::vm::{with_default_context, CallContext, CallVm};
use crate::errors::{Error, Result};
use crate::hooks::{Callback, HookManager, HookPhase, HookRegistry};
use crate::infrastructure::metrics;
use crate::memory::Pointer;
use std::ffi::{CStr, CString};
use std::fmt;
use std::os::raw::c_char;
use tracing::trace;

/// Callable view of a native function; does not own the code
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Function {
    pointer: Pointer,
    convention: Convention,
    signature: Signature,
}

impl Function {
    /// # Safety
    /// `pointer` must be null or a function with exactly this convention and
    /// signature, sound to call with any arguments that coerce to it
    /// (pointer arguments included) for as long as the `Function` is used.
    pub unsafe fn new(pointer: Pointer, convention: Convention, signature: Signature) -> Self {
        Self {
            pointer,
            convention,
            signature,
        }
    }

    /// Build from a signature string such as `"ip)i"`
    ///
    /// # Safety
    /// As [`Function::new`].
    pub unsafe fn parse(pointer: Pointer, convention: Convention, signature: &str) -> Result<Self> {
        Ok(Self::new(pointer, convention, Signature::parse(signature)?))
    }

    #[inline]
    pub fn pointer(&self) -> Pointer {
        self.pointer
    }

    #[inline]
    pub fn address(&self) -> usize {
        self.pointer.address()
    }

    #[inline]
    pub fn convention(&self) -> Convention {
        self.convention
    }

    #[inline]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn is_valid(&self) -> bool {
        self.pointer.is_valid()
    }

    /// Same signature and convention at another address
    ///
    /// # Safety
    /// As [`Function::new`], for `pointer`.
    pub unsafe fn at(&self, pointer: Pointer) -> Self {
        Self {
            pointer,
            convention: self.convention,
            signature: self.signature.clone(),
        }
    }

    /// Validate the target and coerce `args` to the parameter kinds
    pub(crate) fn prepare(&self, args: &[Value]) -> Result<Vec<Value>> {
        if !self.is_valid() {
            return Err(Error::NullPointer {
                context: "function address",
            });
        }

        let params = self.signature.params();
        if args.len() != params.len() {
            return Err(Error::ArgumentCount {
                expected: params.len(),
                got: args.len(),
            });
        }

        args.iter()
            .zip(params)
            .enumerate()
            .map(|(index, (arg, kind))| arg.coerce(*kind, index))
            .collect()
    }

    /// Call through `ctx`
    pub fn call<V: CallVm>(&self, ctx: &mut CallContext<V>, args: &[Value]) -> Result<Value> {
        let raw = self.call_raw(ctx, args)?;
        Ok(demarshal(raw, self.signature.return_kind()))
    }

    /// Call through `ctx`, keeping the machine's result as is
    ///
    /// `String` returns stay a `Value::Pointer` to the callee's buffer.
    pub(crate) fn call_raw<V: CallVm>(&self, ctx: &mut CallContext<V>, args: &[Value]) -> Result<Value> {
        let prepared = match self.prepare(args) {
            Ok(prepared) => prepared,
            Err(err) => {
                metrics::interop().record_failure();
                metrics::interop().record_error(err.name());
                trace!(target: "ffi", address = self.address(), error = err.name(), "call rejected");
                return Err(err);
            }
        };

        trace!(
            target: "ffi",
            address = self.address(),
            convention = %self.convention,
            signature = %self.signature,
            "calling"
        );

        // SAFETY: the constructor's contract covers the address and signature
        let raw = unsafe {
            ctx.execute(self.address(), self.convention, prepared, self.signature.return_kind())
        };
        metrics::interop().record_call();
        Ok(raw)
    }

    /// Call through this thread's default context
    pub fn call_default(&self, args: &[Value]) -> Result<Value> {
        with_default_context(|ctx| self.call(ctx, args))
    }

    /// Call the original (unhooked) code, skipping callbacks
    pub fn call_trampoline<V: CallVm, M: HookManager>(
        &self,
        ctx: &mut CallContext<V>,
        registry: &HookRegistry<M>,
        args: &[Value],
    ) -> Result<Value> {
        registry.call_original(ctx, self, args)
    }

    pub fn add_pre_hook<M: HookManager>(&self, registry: &HookRegistry<M>, callback: Callback) -> Result<()> {
        registry.add_callback(self, HookPhase::Pre, callback)
    }

    pub fn add_post_hook<M: HookManager>(&self, registry: &HookRegistry<M>, callback: Callback) -> Result<()> {
        registry.add_callback(self, HookPhase::Post, callback)
    }

    pub fn remove_pre_hook<M: HookManager>(&self, registry: &HookRegistry<M>, callback: &Callback) {
        registry.remove_callback(self, HookPhase::Pre, callback)
    }

    pub fn remove_post_hook<M: HookManager>(&self, registry: &HookRegistry<M>, callback: &Callback) {
        registry.remove_callback(self, HookPhase::Post, callback)
    }

    /// Remove the hook and every callback on it; false if not hooked
    pub fn unhook<M: HookManager>(&self, registry: &HookRegistry<M>) -> bool {
        registry.uninstall(self)
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} {} at {}>", self.convention, self.signature, self.pointer)
    }
}

/// Wrap a raw machine result per the declared return kind
pub(crate) fn demarshal(raw: Value, ret: Kind) -> Value {
    match (ret, raw) {
        (Kind::Void, _) => Value::None,
        (Kind::String, Value::Pointer(p)) if !p.is_valid() => Value::None,
        (Kind::String, Value::Pointer(p)) => {
            // SAFETY: a non-null `char*` returned by the callee
            let text = unsafe { CStr::from_ptr(p.as_ptr::<c_char>()) };
            Value::String(CString::from(text))
        }
        (_, raw) => raw,
    }
}
