//! Canonical tagged encoding of store objects.
//!
//! Every typed object is a JSON document `{"kind": <tag>, "data": {...}}`
//! with the tag first. One logical value has exactly one byte form: all
//! maps in persisted types are `BTreeMap`s (sorted keys), all numeric
//! fields are integers, strings are NFC-normalized before they enter a
//! persisted value. Blob bodies are embedded with a hex escape below
//! [`BLOB_EMBED_LIMIT`] and stored raw behind a small header above it.
//!
//! The object id is the domain-separated hash of `kind ‖ canonical bytes`
//! where the canonical bytes of a blob are its raw content and the
//! canonical bytes of a typed object are the sorted JSON of its `data`.

use crate::error::{Result, VexError};
use crate::object_id::ObjectId;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use unicode_normalization::UnicodeNormalization;

/// Blobs at or above this size are stored raw instead of hex-embedded.
pub const BLOB_EMBED_LIMIT: usize = 1024 * 1024;

/// Header for the raw (non-JSON) blob form.
const RAW_HEADER: &[u8] = b"vexblob\n";

/// Kind tag for blob objects.
pub const BLOB_KIND: &str = "blob";

/// A persisted object kind with a stable tag.
pub trait Persist: Serialize + DeserializeOwned {
    /// The kind tag, stored at the front of every encoded document.
    const KIND: &'static str;
}

#[derive(Serialize)]
struct Envelope<'a> {
    kind: &'a str,
    data: &'a Value,
}

#[derive(serde::Deserialize)]
struct EnvelopeOwned {
    kind: String,
    data: Value,
}

/// A decoded object: its kind tag plus payload in either form.
#[derive(Debug)]
pub struct Decoded {
    /// The kind tag found at the front of the document.
    pub kind: String,
    /// The payload, raw for large blobs and JSON otherwise.
    pub payload: DecodedPayload,
}

/// Payload representation of a decoded object.
#[derive(Debug)]
pub enum DecodedPayload {
    /// Raw bytes (large blob form).
    Raw(Vec<u8>),
    /// Canonical JSON value (typed objects and embedded blobs).
    Json(Value),
}

impl Decoded {
    /// Recomputes the id this object should be stored under.
    pub fn id(&self) -> Result<ObjectId> {
        if self.kind == BLOB_KIND {
            let bytes = self.blob_bytes()?;
            return Ok(ObjectId::for_payload(BLOB_KIND, &bytes));
        }
        match &self.payload {
            DecodedPayload::Json(value) => {
                let bytes = canonical_bytes(value)?;
                Ok(ObjectId::for_payload(&self.kind, &bytes))
            }
            DecodedPayload::Raw(_) => Err(VexError::Encode(format!(
                "raw payload under non-blob kind '{}'",
                self.kind
            ))),
        }
    }

    /// Extracts blob contents, decoding the hex escape when embedded.
    pub fn into_blob(self) -> Result<Vec<u8>> {
        if self.kind != BLOB_KIND {
            return Err(VexError::Encode(format!(
                "expected blob, got '{}'",
                self.kind
            )));
        }
        self.blob_bytes()
    }

    /// Decodes the payload into a typed object, checking the kind tag.
    pub fn into_typed<T: Persist>(self) -> Result<T> {
        if self.kind != T::KIND {
            return Err(VexError::Encode(format!(
                "expected '{}', got '{}'",
                T::KIND,
                self.kind
            )));
        }
        match self.payload {
            DecodedPayload::Json(value) => {
                serde_json::from_value(value).map_err(|e| VexError::Encode(e.to_string()))
            }
            DecodedPayload::Raw(_) => Err(VexError::Encode(format!(
                "raw payload under typed kind '{}'",
                T::KIND
            ))),
        }
    }

    fn blob_bytes(&self) -> Result<Vec<u8>> {
        match &self.payload {
            DecodedPayload::Raw(bytes) => Ok(bytes.clone()),
            DecodedPayload::Json(value) => {
                let text = value
                    .as_str()
                    .ok_or_else(|| VexError::Encode("blob escape is not a string".into()))?;
                hex::decode(text).map_err(|e| VexError::Encode(e.to_string()))
            }
        }
    }
}

/// Encodes a typed object, returning its id and on-disk bytes.
pub fn encode_typed<T: Persist>(value: &T) -> Result<(ObjectId, Vec<u8>)> {
    let data = serde_json::to_value(value).map_err(|e| VexError::Encode(e.to_string()))?;
    let payload = canonical_bytes(&data)?;
    let id = ObjectId::for_payload(T::KIND, &payload);
    let doc = serde_json::to_vec(&Envelope {
        kind: T::KIND,
        data: &data,
    })
    .map_err(|e| VexError::Encode(e.to_string()))?;
    Ok((id, doc))
}

/// Encodes a blob, returning its id and on-disk bytes.
///
/// The id depends only on the raw content, never on which of the two
/// storage forms was chosen.
pub fn encode_blob(data: &[u8]) -> (ObjectId, Vec<u8>) {
    let id = ObjectId::for_payload(BLOB_KIND, data);
    if data.len() >= BLOB_EMBED_LIMIT {
        let mut out = Vec::with_capacity(RAW_HEADER.len() + data.len());
        out.extend_from_slice(RAW_HEADER);
        out.extend_from_slice(data);
        (id, out)
    } else {
        let data_value = Value::String(hex::encode(data));
        let bytes = serde_json::to_vec(&Envelope {
            kind: BLOB_KIND,
            data: &data_value,
        })
        .expect("blob envelope is always serializable");
        (id, bytes)
    }
}

/// Decodes on-disk bytes into kind + payload.
///
/// Readers treat anything unparseable as corruption; unknown kind tags are
/// the caller's to reject so forward-incompatible objects fail loudly.
pub fn decode(bytes: &[u8], path: &Path) -> Result<Decoded> {
    if bytes.starts_with(RAW_HEADER) {
        return Ok(Decoded {
            kind: BLOB_KIND.to_string(),
            payload: DecodedPayload::Raw(bytes[RAW_HEADER.len()..].to_vec()),
        });
    }

    let envelope: EnvelopeOwned =
        serde_json::from_slice(bytes).map_err(|e| VexError::CorruptObject {
            path: path.to_path_buf(),
            reason: format!("not a tagged document: {}", e),
        })?;

    if envelope.kind.is_empty() {
        return Err(VexError::CorruptObject {
            path: path.to_path_buf(),
            reason: "empty kind tag".to_string(),
        });
    }

    Ok(Decoded {
        kind: envelope.kind,
        payload: DecodedPayload::Json(envelope.data),
    })
}

/// Canonical byte form of a JSON value: sorted keys, minimal integers.
///
/// `serde_json`'s default map is a `BTreeMap`, so any value that came
/// through `to_value` or a parse already has sorted keys.
pub fn canonical_bytes(value: &Value) -> Result<Vec<u8>> {
    if has_float(value) {
        return Err(VexError::Encode(
            "floats are forbidden in persisted values".into(),
        ));
    }
    serde_json::to_vec(value).map_err(|e| VexError::Encode(e.to_string()))
}

fn has_float(value: &Value) -> bool {
    match value {
        Value::Number(n) => !n.is_i64() && !n.is_u64(),
        Value::Array(items) => items.iter().any(has_float),
        Value::Object(map) => map.values().any(has_float),
        _ => false,
    }
}

/// NFC normalization for every name that enters a persisted value.
pub fn nfc(name: &str) -> String {
    name.nfc().collect()
}
