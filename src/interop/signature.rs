//! Signature strings - `"ip)i"` means `(int, void*) -> int`
//!
//! Grammar: `param* ')' ret`, one ASCII character per kind. A leading `v`
//! spells "no parameters" and must be followed by the delimiter.

use super::types::{Kind, SIGCHAR_ENDARG};
use crate::errors::{Error, Result, SignatureFault};
use smallvec::SmallVec;
use std::fmt;
use std::str::FromStr;

/// Decoded signature: parameter kinds (never `Void`) and a return kind
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    params: SmallVec<[Kind; 8]>,
    ret: Kind,
}

impl Signature {
    /// Build a signature from already decoded kinds
    pub fn new(params: impl IntoIterator<Item = Kind>, ret: Kind) -> Result<Self> {
        let params: SmallVec<[Kind; 8]> = params.into_iter().collect();
        if let Some(position) = params.iter().position(|k| *k == Kind::Void) {
            return Err(Error::malformed(
                &format!("{:?}", params),
                SignatureFault::VoidParameter { position },
            ));
        }
        Ok(Self { params, ret })
    }

    /// Parse a signature string
    pub fn parse(signature: &str) -> Result<Self> {
        let mut chars = signature.chars().enumerate();
        let mut params: SmallVec<[Kind; 8]> = SmallVec::new();

        loop {
            let Some((position, ch)) = chars.next() else {
                return Err(Error::malformed(signature, SignatureFault::MissingDelimiter));
            };

            if ch == SIGCHAR_ENDARG {
                break;
            }

            match Kind::from_char(ch) {
                Some(Kind::Void) if params.is_empty() => {
                    match chars.next() {
                        Some((_, SIGCHAR_ENDARG)) => break,
                        Some((position, _)) => {
                            return Err(Error::malformed(
                                signature,
                                SignatureFault::ExpectedDelimiter { position },
                            ))
                        }
                        None => {
                            return Err(Error::malformed(signature, SignatureFault::MissingDelimiter))
                        }
                    }
                }
                Some(Kind::Void) => {
                    return Err(Error::malformed(
                        signature,
                        SignatureFault::VoidParameter { position },
                    ))
                }
                Some(kind) => params.push(kind),
                None => {
                    return Err(Error::malformed(
                        signature,
                        SignatureFault::UnknownKind { ch, position },
                    ))
                }
            }
        }

        let ret = match chars.next() {
            None => return Err(Error::malformed(signature, SignatureFault::MissingReturnKind)),
            Some((position, ch)) => Kind::from_char(ch).ok_or_else(|| Error::UnsupportedType {
                what: format!("return type '{}' at position {}", ch, position),
            })?,
        };

        if let Some((position, _)) = chars.next() {
            return Err(Error::malformed(
                signature,
                SignatureFault::TrailingCharacters { position },
            ));
        }

        Ok(Self { params, ret })
    }

    #[inline]
    pub fn params(&self) -> &[Kind] {
        &self.params
    }

    #[inline]
    pub fn return_kind(&self) -> Kind {
        self.ret
    }

    /// Number of arguments a call must supply
    #[inline]
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Same signature with an extra leading parameter (bound this-pointer)
    pub fn with_leading(&self, kind: Kind) -> Result<Self> {
        Self::new(std::iter::once(kind).chain(self.params.iter().copied()), self.ret)
    }
}

/// Canonical string form; parses back to an equal signature
impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for kind in &self.params {
            write!(f, "{}", kind.as_char())?;
        }
        write!(f, "{}{}", SIGCHAR_ENDARG, self.ret.as_char())
    }
}

impl FromStr for Signature {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl serde::Serialize for Signature {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for Signature {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
