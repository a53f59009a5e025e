//! Opaque encrypted payloads.
//!
//! Note bodies, folder names and settings are encrypted before they reach the
//! sync layer. quire only ever moves `(ciphertext, nonce)` pairs around and
//! never looks inside. On the wire both halves are standard base64.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// An opaque ciphertext + nonce pair.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sealed {
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "b64")]
    pub nonce: Vec<u8>,
}

impl Sealed {
    pub fn new(ciphertext: impl Into<Vec<u8>>, nonce: impl Into<Vec<u8>>) -> Self {
        Self {
            ciphertext: ciphertext.into(),
            nonce: nonce.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ciphertext.is_empty()
    }
}

/// An opaque settings blob. Settings carry their own envelope, so there is
/// no separate nonce at this layer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SettingsBlob(#[serde(with = "b64")] pub Vec<u8>);

impl SettingsBlob {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

mod b64 {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        STANDARD.decode(text.as_bytes()).map_err(serde::de::Error::custom)
    }
}
