use std::fmt;
use std::marker::PhantomData;

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use serde::de::Error as _;
use serde::ser::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tessera_call::{decode_wire, encode_wire, CallId, Selector};

use crate::error::{HandleError, HandleResult};

/// A result type that can be named by a handle.
pub trait Typed {
    /// The type name recorded in call chains producing this type.
    const TYPE_NAME: &'static str;
}

/// Encode a call chain as handle text.
pub fn encode_id(id: &CallId) -> HandleResult<String> {
    let bytes = encode_wire(id)?;
    Ok(URL_SAFE.encode(bytes))
}

/// Decode handle text into a call chain.
///
/// The empty string is the "no ID" sentinel and decodes to `Ok(None)`.
pub fn decode_id(text: &str) -> HandleResult<Option<CallId>> {
    if text.is_empty() {
        return Ok(None);
    }
    let bytes = URL_SAFE
        .decode(text)
        .map_err(|e| HandleError::Base64(e.to_string()))?;
    Ok(Some(decode_wire(&bytes)?))
}

/// A call handle whose result type is `T`.
///
/// The type tag exists only at compile time; the runtime state is the call
/// chain alone. [`ResourceHandle::resource_type_name`] is derived from `T`,
/// and constructors only accept chains producing `T::TYPE_NAME`, so the two
/// cannot drift apart.
pub struct ResourceHandle<T> {
    id: CallId,
    _type: PhantomData<fn() -> T>,
}

impl<T: Typed> ResourceHandle<T> {
    /// An empty chain of type `T`.
    pub fn new() -> Self {
        Self {
            id: CallId::new(T::TYPE_NAME),
            _type: PhantomData,
        }
    }

    /// Wrap an existing chain, checking that it produces `T`.
    pub fn from_id(id: CallId) -> HandleResult<Self> {
        if id.type_name() != T::TYPE_NAME {
            return Err(HandleError::TypeMismatch {
                expected: T::TYPE_NAME.to_string(),
                actual: id.type_name().to_string(),
            });
        }
        Ok(Self {
            id,
            _type: PhantomData,
        })
    }

    /// The declared result type name.
    pub fn resource_type_name() -> &'static str {
        T::TYPE_NAME
    }

    /// The underlying call chain.
    pub fn id(&self) -> &CallId {
        &self.id
    }

    /// Unwrap into the underlying call chain.
    pub fn into_id(self) -> CallId {
        self.id
    }

    /// Extend the chain with a selector that keeps the result type.
    pub fn append(&self, selector: Selector) -> Self {
        Self {
            id: self.id.select(T::TYPE_NAME, selector),
            _type: PhantomData,
        }
    }

    /// Extend the chain with a selector producing `U`.
    pub fn select<U: Typed>(&self, selector: Selector) -> ResourceHandle<U> {
        ResourceHandle {
            id: self.id.select(U::TYPE_NAME, selector),
            _type: PhantomData,
        }
    }

    /// Opaque handle text. Deterministic and lossless.
    pub fn encode(&self) -> HandleResult<String> {
        encode_id(&self.id)
    }

    /// Decode handle text produced for `T`.
    ///
    /// The empty string decodes to `Ok(None)`.
    pub fn decode(text: &str) -> HandleResult<Option<Self>> {
        decode_id(text)?.map(Self::from_id).transpose()
    }
}

impl<T: Typed> Default for ResourceHandle<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for ResourceHandle<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            _type: PhantomData,
        }
    }
}

impl<T> PartialEq for ResourceHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T: Typed> fmt::Debug for ResourceHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceHandle<{}>({})", T::TYPE_NAME, self.id.path())
    }
}

impl<T: Typed> Serialize for ResourceHandle<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let text = self.encode().map_err(S::Error::custom)?;
        serializer.serialize_str(&text)
    }
}

impl<'de, T: Typed> Deserialize<'de> for ResourceHandle<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::decode(&text)
            .map_err(D::Error::custom)?
            .ok_or_else(|| D::Error::custom("empty handle"))
    }
}
