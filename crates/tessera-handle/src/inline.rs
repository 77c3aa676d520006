use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use bincode::Options;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{HandleError, HandleResult};
use crate::handle::Typed;

const MAX_INLINE_SIZE: u64 = 4 * 1024 * 1024;

fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .with_limit(MAX_INLINE_SIZE)
}

/// A handle for a value whose identity is its data.
///
/// Carries a type name and an opaque payload. There is no call chain behind
/// it, so it is never tainted and never digested against history; it only
/// round-trips through the same text encoding as call handles.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineHandle {
    type_name: String,
    payload: Vec<u8>,
}

impl InlineHandle {
    /// Wrap raw payload bytes.
    pub fn new(type_name: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            type_name: type_name.into(),
            payload,
        }
    }

    /// Serialize `value` as the payload of a `T` handle.
    pub fn from_value<T: Typed, V: Serialize>(value: &V) -> HandleResult<Self> {
        let payload = options()
            .serialize(value)
            .map_err(|e| HandleError::Payload(e.to_string()))?;
        Ok(Self::new(T::TYPE_NAME, payload))
    }

    /// Deserialize the payload of a `T` handle.
    pub fn value<T: Typed, V: DeserializeOwned>(&self) -> HandleResult<V> {
        if self.type_name != T::TYPE_NAME {
            return Err(HandleError::TypeMismatch {
                expected: T::TYPE_NAME.to_string(),
                actual: self.type_name.clone(),
            });
        }
        options()
            .deserialize(&self.payload)
            .map_err(|e| HandleError::Payload(e.to_string()))
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Opaque handle text.
    pub fn encode(&self) -> HandleResult<String> {
        let bytes = options()
            .serialize(self)
            .map_err(|e| HandleError::Payload(e.to_string()))?;
        Ok(URL_SAFE.encode(bytes))
    }

    /// Decode handle text; the empty string decodes to `Ok(None)`.
    pub fn decode(text: &str) -> HandleResult<Option<Self>> {
        if text.is_empty() {
            return Ok(None);
        }
        let bytes = URL_SAFE
            .decode(text)
            .map_err(|e| HandleError::Base64(e.to_string()))?;
        options()
            .deserialize(&bytes)
            .map(Some)
            .map_err(|e| HandleError::Payload(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Platform;
    impl Typed for Platform {
        const TYPE_NAME: &'static str = "Platform";
    }

    struct Port;
    impl Typed for Port {
        const TYPE_NAME: &'static str = "Port";
    }

    #[test]
    fn value_round_trip() {
        let h = InlineHandle::from_value::<Platform, _>(&"linux/arm64".to_string()).unwrap();
        assert_eq!(h.type_name(), "Platform");
        let text = h.encode().unwrap();
        let back = InlineHandle::decode(&text).unwrap().unwrap();
        assert_eq!(back, h);
        let v: String = back.value::<Platform, _>().unwrap();
        assert_eq!(v, "linux/arm64");
    }

    #[test]
    fn wrong_type_is_rejected() {
        let h = InlineHandle::from_value::<Port, _>(&8080u16).unwrap();
        assert!(matches!(
            h.value::<Platform, String>(),
            Err(HandleError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn empty_text_is_none() {
        assert_eq!(InlineHandle::decode("").unwrap(), None);
    }

    #[test]
    fn raw_payload_is_preserved() {
        let h = InlineHandle::new("Bytes", vec![0, 1, 2, 255]);
        let back = InlineHandle::decode(&h.encode().unwrap()).unwrap().unwrap();
        assert_eq!(back.payload(), &[0, 1, 2, 255]);
    }

    #[test]
    fn corrupt_text_is_rejected() {
        assert!(matches!(
            InlineHandle::decode("%%%"),
            Err(HandleError::Base64(_))
        ));
    }
}
