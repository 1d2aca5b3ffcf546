//! Kind enumeration shared by signatures, values and memory access
//!
//! Each kind maps to one signature character. The character set matches the
//! dyncall signature alphabet so existing signature strings keep working.

use libffi::middle::Type;
use std::fmt;
use std::os::raw::{c_int, c_long};

/// Delimiter between parameter kinds and the return kind
pub const SIGCHAR_ENDARG: char = ')';

/// Native type descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Kind {
    Void,
    Bool,
    Char,
    UChar,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    LongLong,
    ULongLong,
    Float,
    Double,
    Pointer,
    String,
}

impl Kind {
    pub const ALL: [Kind; 16] = [
        Kind::Void,
        Kind::Bool,
        Kind::Char,
        Kind::UChar,
        Kind::Short,
        Kind::UShort,
        Kind::Int,
        Kind::UInt,
        Kind::Long,
        Kind::ULong,
        Kind::LongLong,
        Kind::ULongLong,
        Kind::Float,
        Kind::Double,
        Kind::Pointer,
        Kind::String,
    ];

    /// Decode a signature character
    #[inline]
    pub const fn from_char(ch: char) -> Option<Self> {
        Some(match ch {
            'v' => Self::Void,
            'B' => Self::Bool,
            'c' => Self::Char,
            'C' => Self::UChar,
            's' => Self::Short,
            'S' => Self::UShort,
            'i' => Self::Int,
            'I' => Self::UInt,
            'j' => Self::Long,
            'J' => Self::ULong,
            'l' => Self::LongLong,
            'L' => Self::ULongLong,
            'f' => Self::Float,
            'd' => Self::Double,
            'p' => Self::Pointer,
            'Z' => Self::String,
            _ => return None,
        })
    }

    /// Signature character for this kind
    #[inline]
    pub const fn as_char(self) -> char {
        match self {
            Self::Void => 'v',
            Self::Bool => 'B',
            Self::Char => 'c',
            Self::UChar => 'C',
            Self::Short => 's',
            Self::UShort => 'S',
            Self::Int => 'i',
            Self::UInt => 'I',
            Self::Long => 'j',
            Self::ULong => 'J',
            Self::LongLong => 'l',
            Self::ULongLong => 'L',
            Self::Float => 'f',
            Self::Double => 'd',
            Self::Pointer => 'p',
            Self::String => 'Z',
        }
    }

    /// Size of the native representation in bytes
    #[inline]
    pub const fn size(self) -> usize {
        match self {
            Self::Void => 0,
            Self::Bool | Self::Char | Self::UChar => 1,
            Self::Short | Self::UShort => 2,
            Self::Int | Self::UInt => core::mem::size_of::<c_int>(),
            Self::Long | Self::ULong => core::mem::size_of::<c_long>(),
            Self::LongLong | Self::ULongLong => 8,
            Self::Float => 4,
            Self::Double => 8,
            Self::Pointer | Self::String => core::mem::size_of::<usize>(),
        }
    }

    /// Check if kind is integral
    #[inline]
    pub const fn is_integral(self) -> bool {
        matches!(
            self,
            Self::Char
                | Self::UChar
                | Self::Short
                | Self::UShort
                | Self::Int
                | Self::UInt
                | Self::Long
                | Self::ULong
                | Self::LongLong
                | Self::ULongLong
        )
    }

    /// Name of the C type, for messages
    pub const fn c_name(self) -> &'static str {
        match self {
            Self::Void => "void",
            Self::Bool => "bool",
            Self::Char => "char",
            Self::UChar => "unsigned char",
            Self::Short => "short",
            Self::UShort => "unsigned short",
            Self::Int => "int",
            Self::UInt => "unsigned int",
            Self::Long => "long",
            Self::ULong => "unsigned long",
            Self::LongLong => "long long",
            Self::ULongLong => "unsigned long long",
            Self::Float => "float",
            Self::Double => "double",
            Self::Pointer => "void*",
            Self::String => "char*",
        }
    }

    /// libffi type descriptor
    pub(crate) fn ffi_type(self) -> Type {
        match self {
            Self::Void => Type::void(),
            Self::Bool => Type::u8(),
            Self::Char => Type::c_schar(),
            Self::UChar => Type::c_uchar(),
            Self::Short => Type::c_short(),
            Self::UShort => Type::c_ushort(),
            Self::Int => Type::c_int(),
            Self::UInt => Type::c_uint(),
            Self::Long => Type::c_long(),
            Self::ULong => Type::c_ulong(),
            Self::LongLong => Type::c_longlong(),
            Self::ULongLong => Type::c_ulonglong(),
            Self::Float => Type::f32(),
            Self::Double => Type::f64(),
            Self::Pointer | Self::String => Type::pointer(),
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.c_name())
    }
}

/// Lower-case names accepted in config files and on the command line
impl std::str::FromStr for Kind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        if let (Some(ch), None) = (chars.next(), chars.next()) {
            if let Some(kind) = Kind::from_char(ch) {
                return Ok(kind);
            }
        }

        Ok(match s.to_ascii_lowercase().as_str() {
            "void" => Self::Void,
            "bool" => Self::Bool,
            "char" => Self::Char,
            "uchar" => Self::UChar,
            "short" => Self::Short,
            "ushort" => Self::UShort,
            "int" => Self::Int,
            "uint" => Self::UInt,
            "long" => Self::Long,
            "ulong" => Self::ULong,
            "long_long" | "longlong" => Self::LongLong,
            "ulong_long" | "ulonglong" => Self::ULongLong,
            "float" => Self::Float,
            "double" => Self::Double,
            "ptr" | "pointer" => Self::Pointer,
            "string" | "str" => Self::String,
            _ => return Err(format!("unknown type name '{}'", s)),
        })
    }
}

impl serde::Serialize for Kind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let name = match self {
            Self::LongLong => "long_long",
            Self::ULongLong => "ulong_long",
            Self::Pointer => "ptr",
            other => return serializer.serialize_str(&format!("{:?}", other).to_lowercase()),
        };
        serializer.serialize_str(name)
    }
}

impl<'de> serde::Deserialize<'de> for Kind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
