//! Error taxonomy for pointers, signatures, calls and hooks
//!
//! Every fallible operation in the crate returns [`Result`]. Errors are
//! raised synchronously to the caller and never retried internally.

use crate::interop::Kind;
use std::fmt;

/// Why a signature string was rejected by the parser
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureFault {
    /// A parameter character outside the kind enumeration
    UnknownKind { ch: char, position: usize },
    /// `v` used as a parameter after other parameters
    VoidParameter { position: usize },
    /// A leading `v` not followed by the delimiter
    ExpectedDelimiter { position: usize },
    /// No `)` in the string
    MissingDelimiter,
    /// Nothing after the `)`
    MissingReturnKind,
    /// Characters after the return kind
    TrailingCharacters { position: usize },
}

impl fmt::Display for SignatureFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownKind { ch, position } => {
                write!(f, "unknown parameter type '{}' at position {}", ch, position)
            }
            Self::VoidParameter { position } => {
                write!(f, "void may only lead the parameter list (position {})", position)
            }
            Self::ExpectedDelimiter { position } => {
                write!(f, "expected ')' at position {}", position)
            }
            Self::MissingDelimiter => write!(f, "missing ')' delimiter"),
            Self::MissingReturnKind => write!(f, "signature has no return type"),
            Self::TrailingCharacters { position } => {
                write!(f, "unexpected characters after return type at position {}", position)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Operation on a zero address
    NullPointer { context: &'static str },
    MalformedSignature { signature: String, fault: SignatureFault },
    ArgumentCount { expected: usize, got: usize },
    /// An argument could not be converted to its parameter kind
    ArgumentType { index: usize, expected: Kind, found: String },
    /// A kind character or kind that the operation cannot handle
    UnsupportedType { what: String },
    NotHooked { address: usize },
    BufferOverflow { length: usize, capacity: usize },
    AllocationSizeUnavailable { address: usize },
    AllocationFailed { size: usize },
    HookInstall { address: usize, reason: String },
    /// The shared call context is already in use on this thread
    ContextBusy,
    UnknownMember { owner: String, name: String },
    /// A type layout registered twice without override
    DuplicateType { name: String },
    AttributeAccess { name: String, write: bool },
    Library(String),
    Config(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NullPointer { context } => write!(f, "{} is NULL", context),
            Self::MalformedSignature { signature, fault } => {
                write!(f, "malformed signature {:?}: {}", signature, fault)
            }
            Self::ArgumentCount { expected, got } => {
                write!(f, "signature expects {} arguments, got {}", expected, got)
            }
            Self::ArgumentType { index, expected, found } => {
                write!(f, "argument {}: expected {}, found {}", index, expected, found)
            }
            Self::UnsupportedType { what } => write!(f, "unsupported type: {}", what),
            Self::NotHooked { address } => {
                write!(f, "function at {:#x} was not hooked", address)
            }
            Self::BufferOverflow { length, capacity } => write!(
                f,
                "string of {} bytes (plus terminator) exceeds memory block of {} bytes",
                length, capacity
            ),
            Self::AllocationSizeUnavailable { address } => {
                write!(f, "unable to retrieve size of address {:#x}", address)
            }
            Self::AllocationFailed { size } => write!(f, "failed to allocate {} bytes", size),
            Self::HookInstall { address, reason } => {
                write!(f, "failed to hook {:#x}: {}", address, reason)
            }
            Self::ContextBusy => write!(f, "call context is already in use on this thread"),
            Self::UnknownMember { owner, name } => write!(f, "{} has no member '{}'", owner, name),
            Self::DuplicateType { name } => write!(f, "type '{}' already exists", name),
            Self::AttributeAccess { name, write: true } => {
                write!(f, "attribute '{}' is not writeable", name)
            }
            Self::AttributeAccess { name, write: false } => {
                write!(f, "attribute '{}' is not readable", name)
            }
            Self::Library(msg) => write!(f, "{}", msg),
            Self::Config(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn malformed(signature: &str, fault: SignatureFault) -> Self {
        Self::MalformedSignature {
            signature: signature.to_string(),
            fault,
        }
    }

    /// Short name used in logs and metrics
    pub fn name(&self) -> &'static str {
        match self {
            Self::NullPointer { .. } => "null_pointer",
            Self::MalformedSignature { .. } => "malformed_signature",
            Self::ArgumentCount { .. } => "argument_count",
            Self::ArgumentType { .. } => "argument_type",
            Self::UnsupportedType { .. } => "unsupported_type",
            Self::NotHooked { .. } => "not_hooked",
            Self::BufferOverflow { .. } => "buffer_overflow",
            Self::AllocationSizeUnavailable { .. } => "allocation_size_unavailable",
            Self::AllocationFailed { .. } => "allocation_failed",
            Self::HookInstall { .. } => "hook_install",
            Self::ContextBusy => "context_busy",
            Self::UnknownMember { .. } => "unknown_member",
            Self::DuplicateType { .. } => "duplicate_type",
            Self::AttributeAccess { .. } => "attribute_access",
            Self::Library(_) => "library",
            Self::Config(_) => "config",
        }
    }
}
