//! Python module `binutils`
//!
//! Exposes `Pointer`, `Function`, `Convention`, `Binary` and the module
//! functions `alloc`, `get_error` and `find_binary`. Hooks go through one
//! process-wide registry backed by `DetourHookManager`.
//!
//! Like ctypes, the Python side holds the address contract: memory access
//! is checked for null only, and a function's signature is taken on trust.

use crate::errors::Error;
use crate::hooks::{callback, Callback, HookAction, HookCall, HookPhase};
use crate::interop::{self, Convention, Function, Library, Value};
use crate::memory::Pointer;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use pyo3::basic::CompareOp;
use pyo3::exceptions::{PyKeyError, PyMemoryError, PyOSError, PyTypeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{PyBool, PyFloat, PyList, PyLong, PyString, PyTuple};
use std::sync::Arc;

fn to_py_err(err: Error) -> PyErr {
    let message = err.to_string();
    match err {
        Error::ArgumentCount { .. } | Error::ArgumentType { .. } | Error::UnsupportedType { .. } => {
            PyTypeError::new_err(message)
        }
        Error::AllocationFailed { .. } => PyMemoryError::new_err(message),
        Error::Library(_) | Error::HookInstall { .. } => PyOSError::new_err(message),
        _ => PyValueError::new_err(message),
    }
}

fn to_value(obj: &PyAny) -> PyResult<Value> {
    if obj.is_none() {
        return Ok(Value::None);
    }
    if let Ok(b) = obj.downcast::<PyBool>() {
        return Ok(Value::Bool(b.is_true()));
    }
    if obj.is_instance_of::<PyLong>() {
        if let Ok(v) = obj.extract::<i64>() {
            return Ok(Value::LongLong(v));
        }
        return obj
            .extract::<u64>()
            .map(Value::ULongLong)
            .map_err(|_| PyValueError::new_err("integer does not fit in 64 bits"));
    }
    if let Ok(f) = obj.downcast::<PyFloat>() {
        return Ok(Value::Double(f.value()));
    }
    if let Ok(s) = obj.downcast::<PyString>() {
        return Value::string(s.to_str()?).map_err(to_py_err);
    }
    if let Ok(p) = obj.extract::<PyRef<PyPointer>>() {
        return Ok(Value::Pointer(p.inner));
    }
    Err(PyTypeError::new_err(format!(
        "cannot pass {} to native code",
        obj.get_type().name()?
    )))
}

fn to_py(py: Python<'_>, value: Value) -> PyResult<PyObject> {
    Ok(match value {
        Value::None => py.None(),
        Value::Bool(b) => b.into_py(py),
        Value::Float(v) => (v as f64).into_py(py),
        Value::Double(v) => v.into_py(py),
        Value::Pointer(p) => Py::new(py, PyPointer { inner: p })?.into_py(py),
        Value::String(s) => s.to_string_lossy().into_owned().into_py(py),
        other => match other.as_integer() {
            Some(v) => v.into_py(py),
            None => py.None(),
        },
    })
}

fn to_values(args: &PyTuple) -> PyResult<Vec<Value>> {
    args.iter().map(to_value).collect()
}

#[pyclass(name = "Convention")]
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum PyConvention {
    #[pyo3(name = "CDECL")]
    Cdecl,
    #[pyo3(name = "STDCALL")]
    Stdcall,
    #[pyo3(name = "THISCALL")]
    Thiscall,
    #[pyo3(name = "FASTCALL")]
    Fastcall,
}

impl From<PyConvention> for Convention {
    fn from(c: PyConvention) -> Self {
        match c {
            PyConvention::Cdecl => Convention::Cdecl,
            PyConvention::Stdcall => Convention::Stdcall,
            PyConvention::Thiscall => Convention::Thiscall,
            PyConvention::Fastcall => Convention::Fastcall,
        }
    }
}

impl From<Convention> for PyConvention {
    fn from(c: Convention) -> Self {
        match c {
            Convention::Cdecl => PyConvention::Cdecl,
            Convention::Stdcall => PyConvention::Stdcall,
            Convention::Thiscall => PyConvention::Thiscall,
            Convention::Fastcall => PyConvention::Fastcall,
        }
    }
}

#[pyclass(name = "Pointer")]
#[derive(Clone, Copy)]
pub struct PyPointer {
    inner: Pointer,
}

#[pymethods]
impl PyPointer {
    #[new]
    #[pyo3(signature = (address = 0))]
    fn new(address: usize) -> Self {
        // Addresses from Python are trusted as-is
        Self {
            inner: unsafe { Pointer::from_address(address) },
        }
    }

    #[getter]
    fn address(&self) -> usize {
        self.inner.address()
    }

    fn is_valid(&self) -> bool {
        self.inner.is_valid()
    }

    fn __bool__(&self) -> bool {
        self.inner.is_valid()
    }

    fn __int__(&self) -> usize {
        self.inner.address()
    }

    fn __hash__(&self) -> u64 {
        self.inner.address() as u64
    }

    fn __repr__(&self) -> String {
        format!("Pointer({})", self.inner)
    }

    fn __richcmp__(&self, other: &PyAny, op: CompareOp) -> PyResult<bool> {
        let other = match other.extract::<PyRef<PyPointer>>() {
            Ok(p) => p.inner.address(),
            Err(_) => other.extract::<usize>()?,
        };
        Ok(op.matches(self.inner.address().cmp(&other)))
    }

    fn __add__(&self, offset: isize) -> Self {
        Self {
            inner: self.inner.add(offset),
        }
    }

    fn __sub__(&self, offset: isize) -> Self {
        Self {
            inner: self.inner.sub(offset),
        }
    }

    /// Read a value; `kind` is a type name ("int", "float", ...) or sig char
    #[pyo3(signature = (kind, offset = 0))]
    fn get(&self, py: Python<'_>, kind: &str, offset: isize) -> PyResult<PyObject> {
        let kind = kind.parse().map_err(PyValueError::new_err)?;
        // SAFETY: the Python caller vouches for the address
        let value = unsafe { self.inner.get_value(kind, offset) };
        to_py(py, value.map_err(to_py_err)?)
    }

    #[pyo3(signature = (kind, value, offset = 0))]
    fn set(&self, kind: &str, value: &PyAny, offset: isize) -> PyResult<()> {
        let kind = kind.parse().map_err(PyValueError::new_err)?;
        let value = to_value(value)?;
        // SAFETY: the Python caller vouches for the address
        unsafe { self.inner.set_value(kind, &value, offset) }.map_err(to_py_err)
    }

    #[pyo3(signature = (offset = 0, is_ptr = true))]
    fn get_string(&self, offset: isize, is_ptr: bool) -> PyResult<Option<String>> {
        // SAFETY: the Python caller vouches for the address
        unsafe { self.inner.get_string(offset, is_ptr) }.map_err(to_py_err)
    }

    #[pyo3(signature = (text, size = 0, offset = 0, is_ptr = true))]
    fn set_string(&self, text: &str, size: usize, offset: isize, is_ptr: bool) -> PyResult<()> {
        let size = (size > 0).then_some(size);
        // SAFETY: the Python caller vouches for the address and its block
        unsafe { self.inner.set_string(text, size, offset, is_ptr) }.map_err(to_py_err)
    }

    #[pyo3(signature = (offset = 0))]
    fn get_ptr(&self, offset: isize) -> PyResult<Self> {
        // SAFETY: the Python caller vouches for the address
        let inner = unsafe { self.inner.get_ptr(offset) }.map_err(to_py_err)?;
        Ok(Self { inner })
    }

    #[pyo3(signature = (ptr, offset = 0))]
    fn set_ptr(&self, ptr: PyPointer, offset: isize) -> PyResult<()> {
        // SAFETY: the Python caller vouches for the address
        unsafe { self.inner.set_ptr(&ptr.inner, offset) }.map_err(to_py_err)
    }

    #[getter]
    fn size(&self) -> PyResult<usize> {
        // SAFETY: the Python caller vouches that this is a heap block
        unsafe { self.inner.size() }.map_err(to_py_err)
    }

    #[pyo3(signature = (index, platform_check = true))]
    fn get_virtual_func(&self, index: usize, platform_check: bool) -> PyResult<Self> {
        // SAFETY: the Python caller vouches for the object and its vtable
        let inner = unsafe { self.inner.get_virtual_func(index, platform_check) }.map_err(to_py_err)?;
        Ok(Self { inner })
    }

    fn make_function(&self, convention: PyConvention, signature: &str) -> PyResult<PyFunction> {
        // SAFETY: the Python caller declares the signature
        let inner = unsafe { self.inner.make_function(convention.into(), signature) }.map_err(to_py_err)?;
        Ok(PyFunction { inner })
    }

    #[pyo3(signature = (index, convention, signature, platform_check = true))]
    fn make_virtual_function(
        &self,
        index: usize,
        convention: PyConvention,
        signature: &str,
        platform_check: bool,
    ) -> PyResult<PyFunction> {
        self.get_virtual_func(index, platform_check)?
            .make_function(convention, signature)
    }

    fn realloc(&mut self, size: usize) -> PyResult<()> {
        // SAFETY: the Python caller vouches that this is a heap block
        unsafe { self.inner.realloc(size) }.map_err(to_py_err)
    }

    fn dealloc(&mut self) {
        // SAFETY: the Python caller vouches that this is a heap block
        unsafe { self.inner.dealloc() }
    }
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
mod hooking {
    use crate::hooks::{DetourHookManager, HookRegistry};
    use once_cell::sync::Lazy;

    pub static REGISTRY: Lazy<HookRegistry<DetourHookManager>> =
        Lazy::new(|| HookRegistry::new(DetourHookManager::new()));
}

/// Python callables registered as hooks, keyed by target, phase and object;
/// one entry per registration
static PY_CALLBACKS: Lazy<DashMap<(usize, HookPhase, usize), Vec<Callback>>> = Lazy::new(DashMap::new);

fn python_callback(callable: PyObject) -> Callback {
    callback(move |call: &mut HookCall| {
        Python::with_gil(|py| {
            let outcome = (|| -> PyResult<HookAction> {
                let args = call
                    .args
                    .iter()
                    .cloned()
                    .map(|v| to_py(py, v))
                    .collect::<PyResult<Vec<_>>>()?;
                let list = PyList::new(py, args);

                let result = match call.phase {
                    HookPhase::Pre => callable.call1(py, (list,))?,
                    HookPhase::Post => {
                        let ret = to_py(py, call.return_value.clone())?;
                        callable.call1(py, (list, ret))?
                    }
                };

                // Pre callbacks may edit the argument list in place
                call.args = list.iter().map(to_value).collect::<PyResult<_>>()?;

                let result = result.as_ref(py);
                if result.is_none() {
                    Ok(HookAction::Continue)
                } else {
                    Ok(HookAction::Override(to_value(result)?))
                }
            })();

            outcome.unwrap_or_else(|err| {
                err.print(py);
                HookAction::Continue
            })
        })
    })
}

#[pyclass(name = "Function")]
#[derive(Clone)]
pub struct PyFunction {
    inner: Function,
}

impl PyFunction {
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    fn hook(&self, phase: HookPhase, callable: PyObject) -> PyResult<()> {
        let key = (self.inner.address(), phase, callable.as_ptr() as usize);
        let cb = python_callback(callable);
        match phase {
            HookPhase::Pre => self.inner.add_pre_hook(&hooking::REGISTRY, Arc::clone(&cb)),
            HookPhase::Post => self.inner.add_post_hook(&hooking::REGISTRY, Arc::clone(&cb)),
        }
        .map_err(to_py_err)?;
        PY_CALLBACKS.entry(key).or_default().push(cb);
        Ok(())
    }

    /// Remove every registration of `callable` in `phase`
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    fn unhook(&self, phase: HookPhase, callable: PyObject) {
        let key = (self.inner.address(), phase, callable.as_ptr() as usize);
        if let Some((_, callbacks)) = PY_CALLBACKS.remove(&key) {
            for cb in &callbacks {
                hooking::REGISTRY.remove_callback(&self.inner, phase, cb);
            }
        }
    }

    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    fn uninstall(&self) -> bool {
        let address = self.inner.address();
        PY_CALLBACKS.retain(|(target, _, _), _| *target != address);
        self.inner.unhook(&hooking::REGISTRY)
    }

    #[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
    fn hook(&self, _phase: HookPhase, _callable: PyObject) -> PyResult<()> {
        let _ = &PY_CALLBACKS;
        Err(PyOSError::new_err("hooking is not supported on this architecture"))
    }

    #[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
    fn unhook(&self, _phase: HookPhase, _callable: PyObject) {}

    #[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
    fn uninstall(&self) -> bool {
        false
    }
}

#[pymethods]
impl PyFunction {
    #[new]
    fn new(pointer: PyPointer, convention: PyConvention, signature: &str) -> PyResult<Self> {
        // SAFETY: the Python caller declares the signature
        let inner = unsafe { Function::parse(pointer.inner, convention.into(), signature) }.map_err(to_py_err)?;
        Ok(Self { inner })
    }

    #[getter]
    fn address(&self) -> usize {
        self.inner.address()
    }

    #[getter]
    fn convention(&self) -> PyConvention {
        self.inner.convention().into()
    }

    #[getter]
    fn signature(&self) -> String {
        self.inner.signature().to_string()
    }

    fn __repr__(&self) -> String {
        format!("Function{}", self.inner)
    }

    #[pyo3(signature = (*args))]
    fn __call__(&self, py: Python<'_>, args: &PyTuple) -> PyResult<PyObject> {
        let values = to_values(args)?;
        let result = py.allow_threads(|| self.inner.call_default(&values));
        to_py(py, result.map_err(to_py_err)?)
    }

    #[pyo3(signature = (*args))]
    fn call_trampoline(&self, py: Python<'_>, args: &PyTuple) -> PyResult<PyObject> {
        let values = to_values(args)?;
        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        let result = py.allow_threads(|| {
            interop::with_default_context(|ctx| self.inner.call_trampoline(ctx, &hooking::REGISTRY, &values))
        });
        #[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
        let result: crate::Result<Value> = {
            let _ = &values;
            Err(Error::NotHooked {
                address: self.inner.address(),
            })
        };
        to_py(py, result.map_err(to_py_err)?)
    }

    fn add_pre_hook(&self, callable: PyObject) -> PyResult<()> {
        self.hook(HookPhase::Pre, callable)
    }

    fn add_post_hook(&self, callable: PyObject) -> PyResult<()> {
        self.hook(HookPhase::Post, callable)
    }

    fn remove_pre_hook(&self, callable: PyObject) {
        self.unhook(HookPhase::Pre, callable)
    }

    fn remove_post_hook(&self, callable: PyObject) {
        self.unhook(HookPhase::Post, callable)
    }

    /// Restore the original code and drop every callback; False if unhooked
    fn unhook_all(&self) -> bool {
        self.uninstall()
    }
}

/// Loaded shared library
#[pyclass(name = "Binary")]
pub struct PyBinary {
    inner: Arc<Library>,
}

#[pymethods]
impl PyBinary {
    #[getter]
    fn name(&self) -> String {
        self.inner.name().to_string()
    }

    /// Symbol address, or the match of a spaced hex signature
    fn __getitem__(&self, identifier: &str) -> PyResult<PyPointer> {
        self.inner
            .resolve(identifier)
            .map(|inner| PyPointer { inner })
            .map_err(|e| PyKeyError::new_err(e.to_string()))
    }

    /// First occurrence of the byte string in the library's code
    fn find_signature(&self, signature: &[u8]) -> PyResult<PyPointer> {
        self.inner
            .find_signature(signature)
            .map(|inner| PyPointer { inner })
            .map_err(to_py_err)
    }

    fn __repr__(&self) -> String {
        format!("Binary({:?})", self.inner.name())
    }
}

#[pyfunction]
fn alloc(size: usize) -> PyResult<PyPointer> {
    Pointer::alloc(size)
        .map(|inner| PyPointer { inner })
        .map_err(to_py_err)
}

#[pyfunction]
fn get_error() -> i32 {
    interop::last_error()
}

#[pyfunction]
fn find_binary(name: &str) -> PyResult<PyBinary> {
    interop::find_binary(name)
        .map(|lib| PyBinary { inner: Arc::new(lib) })
        .map_err(to_py_err)
}

#[pymodule]
fn binutils(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_class::<PyPointer>()?;
    m.add_class::<PyFunction>()?;
    m.add_class::<PyConvention>()?;
    m.add_class::<PyBinary>()?;
    m.add_function(wrap_pyfunction!(alloc, m)?)?;
    m.add_function(wrap_pyfunction!(get_error, m)?)?;
    m.add_function(wrap_pyfunction!(find_binary, m)?)?;
    Ok(())
}
