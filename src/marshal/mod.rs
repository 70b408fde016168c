//! Marshalling
//!
//! Converts commands, results and wire envelopes to and from bytes. The dispatcher
//! is generic over the marshaller so deployments can pick the encoding; bincode is
//! the default, JSON is available for payloads that must stay human readable.

use crate::error::MarshalError;

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

pub trait Marshaller: Send + Sync + 'static {
    fn marshal<T: Serialize + ?Sized>(&self, value: &T) -> Result<Bytes, MarshalError>;

    fn unmarshal<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, MarshalError>;
}

/// Compact binary encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeMarshaller;

impl Marshaller for BincodeMarshaller {
    fn marshal<T: Serialize + ?Sized>(&self, value: &T) -> Result<Bytes, MarshalError> {
        Ok(Bytes::from(bincode::serialize(value)?))
    }

    fn unmarshal<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, MarshalError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// JSON encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMarshaller;

impl Marshaller for JsonMarshaller {
    fn marshal<T: Serialize + ?Sized>(&self, value: &T) -> Result<Bytes, MarshalError> {
        Ok(Bytes::from(serde_json::to_vec(value)?))
    }

    fn unmarshal<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, MarshalError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
