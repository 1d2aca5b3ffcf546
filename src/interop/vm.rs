//! Call machine - argument stack, mode and typed invocation
//!
//! Design: the dispatcher drives a [`CallVm`] through the same narrow steps
//! dyncall exposes (reset, mode, push, call, error). [`FfiCallVm`] is the
//! libffi-backed implementation; prepared call interfaces are cached per
//! (ABI, parameter kinds, return kind).
//!
//! A [`CallContext`] owns one machine and is not re-entrant. Callers either
//! hold their own context or borrow the thread-local one through
//! [`with_default_context`].

use super::abi::Convention;
use super::types::Kind;
use super::value::Value;
use crate::errors::{Error, Result};
use crate::memory::Pointer;
use libffi::middle::{Arg, Cif, CodePtr};
use libffi::raw::ffi_abi as FfiAbi;
use lru::LruCache;
use smallvec::SmallVec;
use std::cell::RefCell;
use std::ffi::c_void;
use std::num::NonZeroUsize;
use std::os::raw::{c_int, c_long, c_uint, c_ulong};
use tracing::{debug, trace};

/// No error recorded
pub const ERROR_NONE: i32 = 0;
/// The requested convention has no distinct ABI on this platform
pub const ERROR_UNSUPPORTED_MODE: i32 = -1;

/// Default number of prepared call interfaces kept per machine
pub const DEFAULT_CIF_CACHE_SIZE: usize = 64;

/// External call machine interface
pub trait CallVm {
    /// Drop all pushed arguments
    fn reset(&mut self);

    /// Select the calling convention for the next invocation
    fn set_mode(&mut self, convention: Convention);

    /// Push one argument, already coerced to its parameter kind
    fn push_arg(&mut self, arg: Value);

    /// Call `address` with the pushed arguments
    ///
    /// `Pointer` and `String` returns both come back as `Value::Pointer`.
    ///
    /// # Safety
    /// `address` must be a function whose real signature and convention
    /// match the pushed arguments and `ret`.
    unsafe fn invoke(&mut self, address: usize, ret: Kind) -> Value;

    /// Error code of the last mode change (0 = none)
    fn last_error(&self) -> i32;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CifKey {
    abi: FfiAbi,
    params: SmallVec<[Kind; 8]>,
    ret: Kind,
}

/// Native storage for one pushed argument
enum Slot {
    U8(u8),
    I8(i8),
    I16(i16),
    U16(u16),
    Int(c_int),
    UInt(c_uint),
    Long(c_long),
    ULong(c_ulong),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Ptr(*const c_void),
}

impl Slot {
    fn from_value(value: &Value) -> Self {
        match value {
            Value::Bool(v) => Self::U8(*v as u8),
            Value::Char(v) => Self::I8(*v),
            Value::UChar(v) => Self::U8(*v),
            Value::Short(v) => Self::I16(*v),
            Value::UShort(v) => Self::U16(*v),
            Value::Int(v) => Self::Int(*v as c_int),
            Value::UInt(v) => Self::UInt(*v as c_uint),
            Value::Long(v) => Self::Long(*v as c_long),
            Value::ULong(v) => Self::ULong(*v as c_ulong),
            Value::LongLong(v) => Self::I64(*v),
            Value::ULongLong(v) => Self::U64(*v),
            Value::Float(v) => Self::F32(*v),
            Value::Double(v) => Self::F64(*v),
            Value::Pointer(p) => Self::Ptr(p.address() as *const c_void),
            Value::String(s) => Self::Ptr(s.as_ptr() as *const c_void),
            Value::None => Self::Ptr(core::ptr::null()),
        }
    }

    fn arg(&self) -> Arg {
        match self {
            Self::U8(v) => Arg::new(v),
            Self::I8(v) => Arg::new(v),
            Self::I16(v) => Arg::new(v),
            Self::U16(v) => Arg::new(v),
            Self::Int(v) => Arg::new(v),
            Self::UInt(v) => Arg::new(v),
            Self::Long(v) => Arg::new(v),
            Self::ULong(v) => Arg::new(v),
            Self::I64(v) => Arg::new(v),
            Self::U64(v) => Arg::new(v),
            Self::F32(v) => Arg::new(v),
            Self::F64(v) => Arg::new(v),
            Self::Ptr(v) => Arg::new(v),
        }
    }
}

/// libffi-backed call machine
pub struct FfiCallVm {
    abi: FfiAbi,
    args: Vec<Value>,
    error: i32,
    cifs: LruCache<CifKey, Cif>,
}

impl FfiCallVm {
    pub fn new() -> Self {
        Self::with_cache_size(DEFAULT_CIF_CACHE_SIZE)
    }

    pub fn with_cache_size(size: usize) -> Self {
        let size = NonZeroUsize::new(size).unwrap_or(NonZeroUsize::MIN);
        Self {
            abi: Convention::Cdecl.abi_or_default(),
            args: Vec::with_capacity(8),
            error: ERROR_NONE,
            cifs: LruCache::new(size),
        }
    }

    /// Number of prepared call interfaces in the cache
    pub fn cached_interfaces(&self) -> usize {
        self.cifs.len()
    }

    fn prepare<'a>(cifs: &'a mut LruCache<CifKey, Cif>, key: CifKey) -> &'a Cif {
        cifs.get_or_insert(key.clone(), || {
            trace!(target: "ffi", abi = key.abi as i64, params = key.params.len(), "preparing call interface");
            let mut cif = Cif::new(
                key.params.iter().map(|k| k.ffi_type()),
                key.ret.ffi_type(),
            );
            cif.set_abi(key.abi);
            cif
        })
    }
}

impl Default for FfiCallVm {
    fn default() -> Self {
        Self::new()
    }
}

impl CallVm for FfiCallVm {
    fn reset(&mut self) {
        self.args.clear();
    }

    fn set_mode(&mut self, convention: Convention) {
        match convention.abi() {
            Some(abi) => {
                self.abi = abi;
                self.error = ERROR_NONE;
            }
            None => {
                debug!(target: "ffi", %convention, "convention has no distinct ABI here, using default");
                self.abi = convention.abi_or_default();
                self.error = ERROR_UNSUPPORTED_MODE;
            }
        }
    }

    fn push_arg(&mut self, arg: Value) {
        self.args.push(arg);
    }

    unsafe fn invoke(&mut self, address: usize, ret: Kind) -> Value {
        let key = CifKey {
            abi: self.abi,
            params: self
                .args
                .iter()
                .map(|v| match v {
                    Value::None => Kind::Pointer,
                    other => other.kind(),
                })
                .collect(),
            ret,
        };

        let slots: SmallVec<[Slot; 8]> = self.args.iter().map(Slot::from_value).collect();
        let args: SmallVec<[Arg; 8]> = slots.iter().map(Slot::arg).collect();
        let cif = Self::prepare(&mut self.cifs, key);
        let code = CodePtr(address as *mut c_void);

        // Integral returns narrower than a register come back widened to a
        // full ffi_arg, so they are read as usize and narrowed afterwards.
        match ret {
            Kind::Void => {
                cif.call::<()>(code, &args);
                Value::None
            }
            Kind::Bool => Value::Bool(cif.call::<usize>(code, &args) as u8 != 0),
            Kind::Char => Value::Char(cif.call::<usize>(code, &args) as i8),
            Kind::UChar => Value::UChar(cif.call::<usize>(code, &args) as u8),
            Kind::Short => Value::Short(cif.call::<usize>(code, &args) as i16),
            Kind::UShort => Value::UShort(cif.call::<usize>(code, &args) as u16),
            Kind::Int => Value::Int(cif.call::<usize>(code, &args) as c_int),
            Kind::UInt => Value::UInt(cif.call::<usize>(code, &args) as c_uint),
            Kind::Long => Value::Long(cif.call::<usize>(code, &args) as c_long as i64),
            Kind::ULong => Value::ULong(cif.call::<usize>(code, &args) as c_ulong as u64),
            Kind::LongLong => Value::LongLong(cif.call::<i64>(code, &args)),
            Kind::ULongLong => Value::ULongLong(cif.call::<u64>(code, &args)),
            Kind::Float => Value::Float(cif.call::<f32>(code, &args)),
            Kind::Double => Value::Double(cif.call::<f64>(code, &args)),
            Kind::Pointer | Kind::String => {
                Value::Pointer(Pointer::from_address(cif.call::<usize>(code, &args)))
            }
        }
    }

    fn last_error(&self) -> i32 {
        self.error
    }
}

/// Explicit call-machine resource
///
/// Not re-entrant: one dispatch at a time. Share across threads only behind
/// a lock.
pub struct CallContext<V: CallVm = FfiCallVm> {
    vm: V,
}

impl<V: CallVm> CallContext<V> {
    pub fn new(vm: V) -> Self {
        Self { vm }
    }

    pub fn vm(&self) -> &V {
        &self.vm
    }

    pub fn vm_mut(&mut self) -> &mut V {
        &mut self.vm
    }

    pub fn into_inner(self) -> V {
        self.vm
    }

    /// Error code reported by the machine for the last call
    pub fn last_error(&self) -> i32 {
        self.vm.last_error()
    }

    /// Run one call on the machine
    ///
    /// # Safety
    /// See [`CallVm::invoke`]. `args` must already be coerced.
    pub(crate) unsafe fn execute(
        &mut self,
        address: usize,
        convention: Convention,
        args: Vec<Value>,
        ret: Kind,
    ) -> Value {
        self.vm.reset();
        self.vm.set_mode(convention);
        for arg in args {
            self.vm.push_arg(arg);
        }
        self.vm.invoke(address, ret)
    }
}

impl CallContext<FfiCallVm> {
    pub fn with_cache_size(size: usize) -> Self {
        Self::new(FfiCallVm::with_cache_size(size))
    }
}

impl Default for CallContext<FfiCallVm> {
    fn default() -> Self {
        Self::new(FfiCallVm::new())
    }
}

thread_local! {
    static DEFAULT_CONTEXT: RefCell<CallContext> = RefCell::new(CallContext::default());
}

/// Borrow this thread's default context
///
/// Nested use (e.g. from a hook callback running inside a call made through
/// the same context) fails with [`Error::ContextBusy`].
pub fn with_default_context<R>(f: impl FnOnce(&mut CallContext) -> Result<R>) -> Result<R> {
    DEFAULT_CONTEXT.with(|cell| {
        let mut ctx = cell.try_borrow_mut().map_err(|_| Error::ContextBusy)?;
        f(&mut ctx)
    })
}

/// Last error code of this thread's default context
pub fn last_error() -> i32 {
    DEFAULT_CONTEXT.with(|cell| cell.try_borrow().map(|ctx| ctx.last_error()).unwrap_or(ERROR_NONE))
}
