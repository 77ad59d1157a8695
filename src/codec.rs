//! # Wire Codec
//!
//! Converts application values to wire bytes and back. Every message body
//! is `gzip(json_text(value))`; decoding reverses the two steps
//! symmetrically. No framing is added beyond what the broker transport
//! already provides.
//!
//! ## Extension registry
//!
//! Values normally pass through `serde_json::to_value`. Types that have no
//! useful serde representation (opaque identifiers, handles) can register a
//! custom conversion keyed by `TypeId`; registered conversions take
//! precedence over serde's view of the type, without touching the core
//! encode/decode path. The registry is checked up front rather than as a
//! fallback after a failed serialization: serde cannot report "no useful
//! representation" for a type that merely serializes to something
//! unhelpful, so checking first is the only ordering that lets a
//! registration override a technically-serializable type.
//!
//! ```
//! use amqp_routes::codec::Codec;
//! use serde_json::{json, Value};
//!
//! #[derive(serde::Serialize)]
//! struct RequestId(u64);
//!
//! let mut codec = Codec::new();
//! codec.register(|id: &RequestId| Value::String(format!("req-{:08x}", id.0)));
//!
//! let bytes = codec.encode(&RequestId(48879)).unwrap();
//! assert_eq!(codec.decode(&bytes).unwrap(), json!("req-0000beef"));
//! ```

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Errors from the encode/decode paths.
#[derive(Error, Debug)]
pub enum CodecError {
    /// The value has no JSON representation. Prevented by construction for
    /// response payloads; reaching this for a handler result is a caller bug.
    #[error("value of type {type_name} is not representable on the wire: {message}")]
    Serialize {
        type_name: &'static str,
        message: String,
    },

    #[error("payload failed to decompress: {message}")]
    Decompress { message: String },

    #[error("payload is not valid JSON: {message}")]
    Parse { message: String },
}

type ExtensionFn = Box<dyn Fn(&dyn Any) -> Value + Send + Sync>;

/// Gzip + JSON codec with a type-keyed extension registry.
#[derive(Default)]
pub struct Codec {
    extensions: HashMap<TypeId, ExtensionFn>,
}

impl Codec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a custom wire representation for `T`.
    ///
    /// The conversion runs before serde whenever a value of exactly `T` is
    /// encoded through this codec.
    pub fn register<T, F>(&mut self, repr: F)
    where
        T: Any,
        F: Fn(&T) -> Value + Send + Sync + 'static,
    {
        self.extensions.insert(
            TypeId::of::<T>(),
            Box::new(move |any| {
                // The map is keyed by T's TypeId, so the downcast holds.
                match any.downcast_ref::<T>() {
                    Some(value) => repr(value),
                    None => Value::Null,
                }
            }),
        );
    }

    /// Normalize a value into the closed JSON value model.
    ///
    /// Registered extensions take precedence; everything else goes through
    /// `serde_json::to_value`.
    pub fn to_value<T>(&self, value: &T) -> Result<Value, CodecError>
    where
        T: Serialize + Any,
    {
        if let Some(repr) = self.extensions.get(&TypeId::of::<T>()) {
            return Ok(repr(value));
        }

        serde_json::to_value(value).map_err(|e| CodecError::Serialize {
            type_name: type_name::<T>(),
            message: e.to_string(),
        })
    }

    /// Serialize a value to JSON text and gzip-compress it.
    pub fn encode<T>(&self, value: &T) -> Result<Vec<u8>, CodecError>
    where
        T: Serialize + Any,
    {
        let value = self.to_value(value)?;
        let text = value.to_string();

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(text.as_bytes())
            .map_err(|e| CodecError::Serialize {
                type_name: type_name::<T>(),
                message: format!("compression failed: {e}"),
            })?;
        encoder.finish().map_err(|e| CodecError::Serialize {
            type_name: type_name::<T>(),
            message: format!("compression failed: {e}"),
        })
    }

    /// Decompress a payload and parse it as JSON.
    pub fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        let mut text = String::new();
        GzDecoder::new(bytes)
            .read_to_string(&mut text)
            .map_err(|e| CodecError::Decompress {
                message: e.to_string(),
            })?;

        serde_json::from_str(&text).map_err(|e| CodecError::Parse {
            message: e.to_string(),
        })
    }
}

impl fmt::Debug for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Codec")
            .field("extensions", &self.extensions.len())
            .finish()
    }
}
