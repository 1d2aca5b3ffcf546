//! Unsafe address view

use super::allocator::usable_size;
use crate::errors::{Error, Result};
use crate::interop::{Convention, Function, Kind, Value};
use std::ffi::{c_void, CStr, CString};
use std::fmt;
use std::os::raw::{c_char, c_int, c_long, c_uint, c_ulong};
use tracing::trace;

/// Non-owning view of a native address
///
/// Holding or offsetting a `Pointer` is safe, like holding a raw pointer.
/// Every operation that touches the memory behind it is `unsafe`: the
/// caller vouches that the addressed range is live and may be accessed as
/// the requested kind. Only null is checked at access time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Pointer {
    address: usize,
}

impl Pointer {
    #[inline]
    pub const fn null() -> Self {
        Self { address: 0 }
    }

    /// # Safety
    /// The address is not checked beyond null-ness on use; the caller takes
    /// responsibility for every later access through it.
    #[inline]
    pub const unsafe fn from_address(address: usize) -> Self {
        Self { address }
    }

    /// # Safety
    /// As [`Pointer::from_address`].
    #[inline]
    pub unsafe fn from_raw<T>(ptr: *const T) -> Self {
        Self { address: ptr as usize }
    }

    #[inline]
    pub const fn address(&self) -> usize {
        self.address
    }

    #[inline]
    pub fn as_ptr<T>(&self) -> *mut T {
        self.address as *mut T
    }

    /// True for any non-zero address
    #[inline]
    pub const fn is_valid(&self) -> bool {
        self.address != 0
    }

    /// Pointer `offset` bytes further (wrapping)
    #[inline]
    pub const fn add(&self, offset: isize) -> Self {
        Self {
            address: self.address.wrapping_add_signed(offset),
        }
    }

    /// Pointer `offset` bytes back (wrapping)
    #[inline]
    pub const fn sub(&self, offset: isize) -> Self {
        Self {
            address: self.address.wrapping_add_signed(offset.wrapping_neg()),
        }
    }

    fn checked(&self, context: &'static str) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(Error::NullPointer { context })
        }
    }

    /// Read a scalar at `offset`; no alignment required
    ///
    /// # Safety
    /// `offset..offset + size_of::<T>()` must be readable and hold a valid `T`.
    pub unsafe fn read<T: Copy>(&self, offset: isize) -> Result<T> {
        self.checked("pointer")?;
        Ok(std::ptr::read_unaligned(self.add(offset).as_ptr::<T>()))
    }

    /// Write a scalar at `offset`; no alignment required
    ///
    /// # Safety
    /// `offset..offset + size_of::<T>()` must be writable.
    pub unsafe fn write<T: Copy>(&self, offset: isize, value: T) -> Result<()> {
        self.checked("pointer")?;
        std::ptr::write_unaligned(self.add(offset).as_ptr::<T>(), value);
        Ok(())
    }

    /// Read a value of `kind` at `offset`
    ///
    /// `String` reads the `char*` stored at `offset`; a null slot gives
    /// `Value::None`.
    ///
    /// # Safety
    /// As [`Pointer::read`] for the native type of `kind`; for `String` the
    /// slot must hold null or a NUL-terminated string.
    pub unsafe fn get_value(&self, kind: Kind, offset: isize) -> Result<Value> {
        Ok(match kind {
            Kind::Void => {
                return Err(Error::UnsupportedType {
                    what: "cannot read a void value".to_string(),
                })
            }
            Kind::Bool => Value::Bool(self.read::<u8>(offset)? != 0),
            Kind::Char => Value::Char(self.read::<i8>(offset)?),
            Kind::UChar => Value::UChar(self.read::<u8>(offset)?),
            Kind::Short => Value::Short(self.read::<i16>(offset)?),
            Kind::UShort => Value::UShort(self.read::<u16>(offset)?),
            Kind::Int => Value::Int(self.read::<c_int>(offset)?),
            Kind::UInt => Value::UInt(self.read::<c_uint>(offset)?),
            Kind::Long => Value::Long(self.read::<c_long>(offset)? as i64),
            Kind::ULong => Value::ULong(self.read::<c_ulong>(offset)? as u64),
            Kind::LongLong => Value::LongLong(self.read::<i64>(offset)?),
            Kind::ULongLong => Value::ULongLong(self.read::<u64>(offset)?),
            Kind::Float => Value::Float(self.read::<f32>(offset)?),
            Kind::Double => Value::Double(self.read::<f64>(offset)?),
            Kind::Pointer => Value::Pointer(self.get_ptr(offset)?),
            Kind::String => match self.get_string(offset, true)? {
                Some(s) => Value::string(&s)?,
                None => Value::None,
            },
        })
    }

    /// Write `value`, coerced to `kind`, at `offset`
    ///
    /// Strings need a destination buffer; use [`Pointer::set_string`].
    ///
    /// # Safety
    /// As [`Pointer::write`] for the native type of `kind`.
    pub unsafe fn set_value(&self, kind: Kind, value: &Value, offset: isize) -> Result<()> {
        if matches!(kind, Kind::Void | Kind::String) {
            return Err(Error::UnsupportedType {
                what: format!("cannot store {} through set_value", kind),
            });
        }
        match value.coerce(kind, 0)? {
            Value::Bool(v) => self.write(offset, v as u8),
            Value::Char(v) => self.write(offset, v),
            Value::UChar(v) => self.write(offset, v),
            Value::Short(v) => self.write(offset, v),
            Value::UShort(v) => self.write(offset, v),
            Value::Int(v) => self.write(offset, v as c_int),
            Value::UInt(v) => self.write(offset, v as c_uint),
            Value::Long(v) => self.write(offset, v as c_long),
            Value::ULong(v) => self.write(offset, v as c_ulong),
            Value::LongLong(v) => self.write(offset, v),
            Value::ULongLong(v) => self.write(offset, v),
            Value::Float(v) => self.write(offset, v),
            Value::Double(v) => self.write(offset, v),
            Value::Pointer(p) => self.set_ptr(&p, offset),
            other => Err(Error::UnsupportedType {
                what: format!("cannot store {}", other.type_name()),
            }),
        }
    }

    /// Read a NUL-terminated string
    ///
    /// With `is_ptr` the slot at `offset` holds a `char*` that is followed
    /// first; a null slot gives `None`. Invalid UTF-8 is replaced.
    ///
    /// # Safety
    /// The target must be a readable NUL-terminated string (and the slot a
    /// readable pointer when `is_ptr`).
    pub unsafe fn get_string(&self, offset: isize, is_ptr: bool) -> Result<Option<String>> {
        self.checked("pointer")?;
        let mut target = self.add(offset);
        if is_ptr {
            target = target.get_ptr(0)?;
            if !target.is_valid() {
                return Ok(None);
            }
        }
        let text = CStr::from_ptr(target.as_ptr::<c_char>());
        Ok(Some(text.to_string_lossy().into_owned()))
    }

    /// Copy `text` plus terminator into the destination
    ///
    /// Capacity is `size` when given. Otherwise it comes from the allocator:
    /// the usable size of the pointed-to block when `is_ptr`, or of the block
    /// starting at `self` minus `offset` for inline buffers.
    ///
    /// # Safety
    /// The destination must be writable for the capacity used. Without
    /// `size`, the block queried must come from the C allocator.
    pub unsafe fn set_string(
        &self,
        text: &str,
        size: Option<usize>,
        offset: isize,
        is_ptr: bool,
    ) -> Result<()> {
        self.checked("pointer")?;
        let (dest, block, skip) = if is_ptr {
            let dest = self.add(offset).get_ptr(0)?;
            dest.checked("string slot")?;
            (dest, dest, 0)
        } else {
            (self.add(offset), *self, offset)
        };

        let capacity = match size {
            Some(size) => size,
            None => {
                let unavailable = Error::AllocationSizeUnavailable {
                    address: dest.address,
                };
                let usable = usable_size(block.as_ptr::<c_void>());
                let skip = usize::try_from(skip).map_err(|_| unavailable.clone())?;
                match usable.checked_sub(skip) {
                    Some(capacity) if usable > 0 => capacity,
                    _ => return Err(unavailable),
                }
            }
        };

        let encoded = CString::new(text).map_err(|_| Error::ArgumentType {
            index: 0,
            expected: Kind::String,
            found: "str with NUL byte".to_string(),
        })?;
        let bytes = encoded.as_bytes_with_nul();
        if bytes.len() > capacity {
            return Err(Error::BufferOverflow {
                length: text.len(),
                capacity,
            });
        }

        std::ptr::copy_nonoverlapping(bytes.as_ptr(), dest.as_ptr::<u8>(), bytes.len());
        Ok(())
    }

    /// Pointer stored at `offset`
    ///
    /// # Safety
    /// As [`Pointer::read`] for a `usize`.
    pub unsafe fn get_ptr(&self, offset: isize) -> Result<Pointer> {
        let address = self.read::<usize>(offset)?;
        Ok(Self { address })
    }

    /// Store `ptr`'s address at `offset`
    ///
    /// # Safety
    /// As [`Pointer::write`] for a `usize`.
    pub unsafe fn set_ptr(&self, ptr: &Pointer, offset: isize) -> Result<()> {
        self.write::<usize>(offset, ptr.address)
    }

    /// Usable size of the heap block starting here
    ///
    /// # Safety
    /// The pointer must be the start of a live C allocator block.
    pub unsafe fn size(&self) -> Result<usize> {
        self.checked("pointer")?;
        Ok(usable_size(self.as_ptr::<c_void>()))
    }

    /// Entry `index` of the vtable whose address is stored at offset 0
    ///
    /// With `platform_check` on Linux the index is shifted by one, matching
    /// the Itanium layout where the slot before the first virtual function
    /// holds the second destructor. A null vtable gives a null pointer.
    ///
    /// # Safety
    /// Offset 0 must hold null or a vtable with at least `index + 1` (or
    /// `index + 2` when shifted) readable entries.
    pub unsafe fn get_virtual_func(&self, index: usize, platform_check: bool) -> Result<Pointer> {
        let vtable = self.get_ptr(0)?;
        if !vtable.is_valid() {
            return Ok(Self::null());
        }

        let index = if platform_check && cfg!(target_os = "linux") {
            index + 1
        } else {
            index
        };
        vtable.get_ptr((index * std::mem::size_of::<usize>()) as isize)
    }

    /// Allocate `size` zeroed bytes with the C allocator
    pub fn alloc(size: usize) -> Result<Pointer> {
        let ptr = unsafe { libc::calloc(1, size.max(1)) };
        if ptr.is_null() {
            return Err(Error::AllocationFailed { size });
        }
        trace!(target: "memory", address = ptr as usize, size, "allocated");
        Ok(Self {
            address: ptr as usize,
        })
    }

    /// Resize the block; the pointer moves to the new block
    ///
    /// # Safety
    /// The pointer must be null or a live block from the C allocator.
    pub unsafe fn realloc(&mut self, size: usize) -> Result<()> {
        let ptr = libc::realloc(self.as_ptr::<c_void>(), size.max(1));
        if ptr.is_null() {
            return Err(Error::AllocationFailed { size });
        }
        trace!(target: "memory", from = self.address, to = ptr as usize, size, "reallocated");
        self.address = ptr as usize;
        Ok(())
    }

    /// Free the block; the pointer becomes null
    ///
    /// # Safety
    /// The pointer must be null or a live block from the C allocator, and
    /// no copy of it may be used afterwards.
    pub unsafe fn dealloc(&mut self) {
        if self.is_valid() {
            libc::free(self.as_ptr::<c_void>());
            trace!(target: "memory", address = self.address, "freed");
        }
        self.address = 0;
    }

    /// View this address as a callable function
    ///
    /// # Safety
    /// As [`Function::new`].
    pub unsafe fn make_function(&self, convention: Convention, signature: &str) -> Result<Function> {
        self.checked("function pointer")?;
        Function::parse(*self, convention, signature)
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.address)
    }
}

impl fmt::LowerHex for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.address, f)
    }
}

impl From<Pointer> for usize {
    fn from(p: Pointer) -> usize {
        p.address
    }
}
