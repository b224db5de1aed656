//! Object identifiers.
//!
//! An [`Oid`] is the 32-byte SHA-256 digest of an object's content. Two
//! objects with identical content share an OID, which is what makes the
//! archive content-addressed. The all-zero OID is reserved and can never be
//! constructed.

use std::fmt;
use std::io::Read;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Length of an OID in bytes.
pub const OID_LEN: usize = 32;

/// Errors produced while constructing an [`Oid`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OidError {
    #[error("zero oid is not a valid object identifier")]
    Zero,
    #[error("invalid oid hex: {0}")]
    Hex(String),
    #[error("oid must be {OID_LEN} bytes, got {0}")]
    Length(usize),
}

/// 32-byte content digest identifying an archived object.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Oid([u8; OID_LEN]);

impl Oid {
    /// Wrap raw digest bytes. Fails on the reserved zero OID.
    pub fn new(bytes: [u8; OID_LEN]) -> Result<Self, OidError> {
        if bytes == [0u8; OID_LEN] {
            return Err(OidError::Zero);
        }
        Ok(Self(bytes))
    }

    /// Build an OID from a byte slice of exactly [`OID_LEN`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, OidError> {
        let arr: [u8; OID_LEN] = bytes
            .try_into()
            .map_err(|_| OidError::Length(bytes.len()))?;
        Self::new(arr)
    }

    /// Parse a 64-digit hex rendering.
    pub fn from_hex(s: &str) -> Result<Self, OidError> {
        let bytes = hex::decode(s.trim()).map_err(|e| OidError::Hex(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    /// OID of an inline text object.
    pub fn for_text(text: &str) -> Self {
        Self::digest(text.as_bytes())
    }

    /// OID of arbitrary bytes.
    pub fn digest(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// OID of everything readable from `reader`, streamed in fixed-size
    /// blocks so large files are never held in memory.
    pub fn for_reader<R: Read>(mut reader: R) -> std::io::Result<Self> {
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(Self(hasher.finalize().into()))
    }

    pub fn as_bytes(&self) -> &[u8; OID_LEN] {
        &self.0
    }

    /// Lower-case hex rendering.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short hex prefix for user-facing messages.
    pub fn fingerprint(&self, len: usize) -> String {
        let mut s = self.to_hex();
        s.truncate(len.clamp(1, OID_LEN * 2));
        s
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Oid({})", self.fingerprint(16))
    }
}

impl FromStr for Oid {
    type Err = OidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for Oid {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Oid {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Kind of archived object. Url and Uri are reserved for future ingest
/// paths; they are recognized by the card codec but never produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    Text,
    File,
    Url,
    Uri,
}

impl ObjectType {
    /// Stable on-disk code.
    pub fn code(self) -> u8 {
        match self {
            ObjectType::Text => 1,
            ObjectType::File => 2,
            ObjectType::Url => 3,
            ObjectType::Uri => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ObjectType::Text),
            2 => Some(ObjectType::File),
            3 => Some(ObjectType::Url),
            4 => Some(ObjectType::Uri),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ObjectType::Text => "text",
            ObjectType::File => "file",
            ObjectType::Url => "url",
            ObjectType::Uri => "uri",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ObjectType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(ObjectType::Text),
            "file" => Ok(ObjectType::File),
            "url" => Ok(ObjectType::Url),
            "uri" => Ok(ObjectType::Uri),
            other => Err(format!(
                "unknown object type '{}': expected text, file, url, or uri",
                other
            )),
        }
    }
}
