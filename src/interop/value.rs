//! Dynamically typed values crossing the native boundary
//!
//! One variant per non-void [`Kind`]; `None` stands for the absence of a
//! value (void return, null string). Coercion to a parameter kind is the
//! only place where widths are checked.

use super::types::Kind;
use crate::errors::{Error, Result};
use crate::memory::Pointer;
use std::ffi::CString;
use std::fmt;
use std::os::raw::c_long;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Char(i8),
    UChar(u8),
    Short(i16),
    UShort(u16),
    Int(i32),
    UInt(u32),
    /// Carried as 64-bit, range-checked against `c_long` on push
    Long(i64),
    ULong(u64),
    LongLong(i64),
    ULongLong(u64),
    Float(f32),
    Double(f64),
    Pointer(Pointer),
    String(CString),
}

impl Value {
    /// Build a string value; fails on interior NUL bytes
    pub fn string(s: &str) -> Result<Self> {
        CString::new(s).map(Self::String).map_err(|_| Error::ArgumentType {
            index: 0,
            expected: Kind::String,
            found: "str with NUL byte".to_string(),
        })
    }

    /// Kind carried by this value (`None` reports `Void`)
    pub const fn kind(&self) -> Kind {
        match self {
            Self::None => Kind::Void,
            Self::Bool(_) => Kind::Bool,
            Self::Char(_) => Kind::Char,
            Self::UChar(_) => Kind::UChar,
            Self::Short(_) => Kind::Short,
            Self::UShort(_) => Kind::UShort,
            Self::Int(_) => Kind::Int,
            Self::UInt(_) => Kind::UInt,
            Self::Long(_) => Kind::Long,
            Self::ULong(_) => Kind::ULong,
            Self::LongLong(_) => Kind::LongLong,
            Self::ULongLong(_) => Kind::ULongLong,
            Self::Float(_) => Kind::Float,
            Self::Double(_) => Kind::Double,
            Self::Pointer(_) => Kind::Pointer,
            Self::String(_) => Kind::String,
        }
    }

    /// Scripting-level type name, for error messages
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Bool(_) => "bool",
            Self::Float(_) | Self::Double(_) => "float",
            Self::Pointer(_) => "Pointer",
            Self::String(_) => "str",
            _ => "int",
        }
    }

    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Integer payload (bools count as 0/1)
    pub fn as_integer(&self) -> Option<i128> {
        Some(match *self {
            Self::Bool(b) => b as i128,
            Self::Char(v) => v as i128,
            Self::UChar(v) => v as i128,
            Self::Short(v) => v as i128,
            Self::UShort(v) => v as i128,
            Self::Int(v) => v as i128,
            Self::UInt(v) => v as i128,
            Self::Long(v) | Self::LongLong(v) => v as i128,
            Self::ULong(v) | Self::ULongLong(v) => v as i128,
            _ => return None,
        })
    }

    /// Numeric payload as a double (integers widen)
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::Float(v) => Some(v as f64),
            Self::Double(v) => Some(v),
            _ => self.as_integer().map(|v| v as f64),
        }
    }

    pub fn as_pointer(&self) -> Option<Pointer> {
        match self {
            Self::Pointer(p) => Some(*p),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => s.to_str().ok(),
            _ => None,
        }
    }

    /// Convert to the representation expected for a parameter of `kind`
    ///
    /// Integers convert between widths only when the value fits. Integers
    /// widen to floats. Non-negative integers are accepted as addresses for
    /// `Pointer`, and `None` becomes a null pointer for `Pointer`/`String`.
    /// A `Pointer` passes through unchanged as a `String` argument.
    pub fn coerce(&self, kind: Kind, index: usize) -> Result<Value> {
        let mismatch = || Error::ArgumentType {
            index,
            expected: kind,
            found: self.type_name().to_string(),
        };

        macro_rules! int {
            ($variant:ident, $t:ty) => {
                match self {
                    Self::$variant(_) => Ok(self.clone()),
                    _ => self
                        .as_integer()
                        .and_then(|v| <$t>::try_from(v).ok())
                        .map(Self::$variant)
                        .ok_or_else(|| self.overflow_or(mismatch(), kind, index)),
                }
            };
        }

        match kind {
            Kind::Void => Err(Error::UnsupportedType {
                what: "void parameter".to_string(),
            }),
            Kind::Bool => match self {
                Self::Bool(_) => Ok(self.clone()),
                _ => Err(mismatch()),
            },
            Kind::Char => int!(Char, i8),
            Kind::UChar => int!(UChar, u8),
            Kind::Short => int!(Short, i16),
            Kind::UShort => int!(UShort, u16),
            Kind::Int => int!(Int, i32),
            Kind::UInt => int!(UInt, u32),
            Kind::Long => {
                let v = self
                    .as_integer()
                    .filter(|v| c_long::try_from(*v).is_ok())
                    .ok_or_else(|| self.overflow_or(mismatch(), kind, index))?;
                Ok(Self::Long(v as i64))
            }
            Kind::ULong => {
                let v = self
                    .as_integer()
                    .filter(|v| std::os::raw::c_ulong::try_from(*v).is_ok())
                    .ok_or_else(|| self.overflow_or(mismatch(), kind, index))?;
                Ok(Self::ULong(v as u64))
            }
            Kind::LongLong => int!(LongLong, i64),
            Kind::ULongLong => int!(ULongLong, u64),
            Kind::Float => self.as_f64().map(|v| Self::Float(v as f32)).ok_or_else(mismatch),
            Kind::Double => self.as_f64().map(Self::Double).ok_or_else(mismatch),
            Kind::Pointer => match self {
                Self::Pointer(_) => Ok(self.clone()),
                Self::None => Ok(Self::Pointer(Pointer::null())),
                Self::Bool(_) => Err(mismatch()),
                _ => self
                    .as_integer()
                    .and_then(|v| usize::try_from(v).ok())
                    // SAFETY: only an address; every access through it is
                    // unsafe, and passing it on is covered by the callee's
                    // `Function` contract.
                    .map(|addr| Self::Pointer(unsafe { Pointer::from_address(addr) }))
                    .ok_or_else(|| self.overflow_or(mismatch(), kind, index)),
            },
            Kind::String => match self {
                Self::String(_) | Self::Pointer(_) => Ok(self.clone()),
                Self::None => Ok(Self::Pointer(Pointer::null())),
                _ => Err(mismatch()),
            },
        }
    }

    fn overflow_or(&self, fallback: Error, kind: Kind, index: usize) -> Error {
        match self.as_integer() {
            Some(v) if !matches!(self, Self::Bool(_)) => Error::ArgumentType {
                index,
                expected: kind,
                found: format!("out-of-range integer {}", v),
            },
            _ => fallback,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Bool(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Double(v) => write!(f, "{}", v),
            Self::Pointer(p) => write!(f, "{}", p),
            Self::String(s) => write!(f, "{:?}", s.to_string_lossy()),
            other => match other.as_integer() {
                Some(v) => write!(f, "{}", v),
                None => write!(f, "{:?}", other),
            },
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::LongLong(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<Pointer> for Value {
    fn from(p: Pointer) -> Self {
        Self::Pointer(p)
    }
}

impl From<CString> for Value {
    fn from(s: CString) -> Self {
        Self::String(s)
    }
}
