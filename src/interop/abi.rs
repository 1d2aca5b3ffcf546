//! Calling conventions
//!
//! The tag set mirrors what hooked game/engine binaries actually use. Only
//! 32-bit x86 distinguishes them; everywhere else they collapse onto the
//! platform default ABI.

use libffi::raw::ffi_abi as FfiAbi;
use std::fmt;
use std::str::FromStr;

/// Calling convention tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Convention {
    /// C calling convention (platform default)
    #[default]
    Cdecl,
    /// Callee cleans the stack (Win32 API)
    Stdcall,
    /// `this` in ECX on MSVC x86, first stack argument with GCC
    Thiscall,
    /// First two integer arguments in ECX/EDX
    Fastcall,
}

impl Convention {
    pub const ALL: [Convention; 4] = [
        Convention::Cdecl,
        Convention::Stdcall,
        Convention::Thiscall,
        Convention::Fastcall,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Cdecl => "cdecl",
            Self::Stdcall => "stdcall",
            Self::Thiscall => "thiscall",
            Self::Fastcall => "fastcall",
        }
    }

    /// Whether this platform has a distinct ABI for the convention
    pub const fn is_distinct(self) -> bool {
        match self {
            Self::Cdecl => true,
            #[cfg(all(target_arch = "x86", windows))]
            Self::Stdcall | Self::Thiscall | Self::Fastcall => true,
            // GCC passes `this` on the stack like any other argument
            #[cfg(all(target_arch = "x86", not(windows)))]
            Self::Thiscall => false,
            #[cfg(all(target_arch = "x86", not(windows)))]
            Self::Stdcall | Self::Fastcall => true,
            #[cfg(not(target_arch = "x86"))]
            _ => false,
        }
    }

    /// libffi ABI for this convention, `None` when it has no distinct ABI here
    pub fn abi(self) -> Option<FfiAbi> {
        match self {
            Self::Cdecl => Some(libffi::raw::ffi_abi_FFI_DEFAULT_ABI),
            #[cfg(target_arch = "x86")]
            Self::Stdcall => Some(libffi::raw::ffi_abi_FFI_STDCALL),
            #[cfg(target_arch = "x86")]
            Self::Fastcall => Some(libffi::raw::ffi_abi_FFI_FASTCALL),
            #[cfg(all(target_arch = "x86", windows))]
            Self::Thiscall => Some(libffi::raw::ffi_abi_FFI_THISCALL),
            _ => None,
        }
    }

    /// ABI to call with: the distinct one, or the platform default
    pub fn abi_or_default(self) -> FfiAbi {
        self.abi().unwrap_or(libffi::raw::ffi_abi_FFI_DEFAULT_ABI)
    }
}

impl fmt::Display for Convention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Convention {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().trim_start_matches("conv_") {
            "cdecl" | "c" => Ok(Self::Cdecl),
            "stdcall" => Ok(Self::Stdcall),
            "thiscall" => Ok(Self::Thiscall),
            "fastcall" => Ok(Self::Fastcall),
            other => Err(format!("unknown calling convention '{}'", other)),
        }
    }
}

impl serde::Serialize for Convention {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> serde::Deserialize<'de> for Convention {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_names() {
        assert_eq!("cdecl".parse::<Convention>(), Ok(Convention::Cdecl));
        assert_eq!("CONV_THISCALL".parse::<Convention>(), Ok(Convention::Thiscall));
        assert_eq!("StdCall".parse::<Convention>(), Ok(Convention::Stdcall));
        assert!("pascal".parse::<Convention>().is_err());
    }

    #[test]
    fn test_default_is_cdecl() {
        assert_eq!(Convention::default(), Convention::Cdecl);
        assert!(Convention::Cdecl.abi().is_some());
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn test_x86_64_collapses_conventions() {
        assert!(Convention::Stdcall.abi().is_none());
        assert!(!Convention::Thiscall.is_distinct());
        assert_eq!(
            Convention::Thiscall.abi_or_default(),
            libffi::raw::ffi_abi_FFI_DEFAULT_ABI
        );
    }
}
