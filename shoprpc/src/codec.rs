use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{Payload, Result};

/// Serialization format used for the messages of one call.
///
/// Both ends of a call always agree on the codec: it is fixed by the call
/// options when the call starts.
#[derive(
    Deserialize, Serialize, Debug, Default, PartialEq, Eq, Clone, Copy, Hash, clap::ValueEnum,
)]
pub enum Codec {
    #[default]
    Json,
    MessagePack,
}

impl Codec {
    /// # Errors
    ///
    /// Returns `SerdeJsonError` or `SerializeFailed` if the value cannot be encoded.
    pub fn encode<P: Serialize + ?Sized>(self, value: &P) -> Result<Payload> {
        let mut writer = BytesMut::new().writer();
        match self {
            Codec::Json => serde_json::to_writer(&mut writer, value)?,
            Codec::MessagePack => rmp_serde::encode::write_named(&mut writer, value)?,
        }
        Ok(writer.into_inner().into())
    }

    /// # Errors
    ///
    /// Returns `SerdeJsonError` or `DeserializeFailed` if the payload does not
    /// hold a `P`.
    pub fn decode<P: DeserializeOwned>(self, payload: &Payload) -> Result<P> {
        if payload.is_empty() {
            // an empty payload is a null value, so unit-like requests need no body.
            return Ok(serde_json::from_value(serde_json::Value::Null)?);
        }
        match self {
            Codec::Json => Ok(serde_json::from_slice(payload)?),
            Codec::MessagePack => Ok(rmp_serde::from_slice(payload)?),
        }
    }
}

impl std::fmt::Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Item {
        id: String,
        tags: Vec<String>,
    }

    #[test]
    fn test_codec_formats() {
        let item = Item {
            id: "p2".into(),
            tags: vec!["kitchen".into()],
        };

        let json = Codec::Json.encode(&item).unwrap();
        assert_eq!(&json[..], br#"{"id":"p2","tags":["kitchen"]}"#);
        assert_eq!(Codec::Json.decode::<Item>(&json).unwrap(), item);

        let msgpack = Codec::MessagePack.encode(&item).unwrap();
        assert_ne!(msgpack, json);
        assert_eq!(Codec::MessagePack.decode::<Item>(&msgpack).unwrap(), item);
    }

    #[test]
    fn test_codec_empty_payload() {
        Codec::Json.decode::<()>(&Payload::EMPTY).unwrap();
        Codec::MessagePack.decode::<()>(&Payload::EMPTY).unwrap();
        let value: Option<u32> = Codec::Json.decode(&Payload::EMPTY).unwrap();
        assert_eq!(value, None);

        let error = Codec::Json.decode::<Item>(&Payload::EMPTY).unwrap_err();
        assert_eq!(error.kind, ErrorKind::SerdeJsonError);
    }

    #[test]
    fn test_codec_mismatch() {
        let payload = Codec::MessagePack.encode(&7u32).unwrap();
        let error = Codec::Json.decode::<Item>(&payload).unwrap_err();
        assert_eq!(error.kind, ErrorKind::SerdeJsonError);

        let payload = Codec::Json.encode("text").unwrap();
        let error = Codec::MessagePack.decode::<Item>(&payload).unwrap_err();
        assert_eq!(error.kind, ErrorKind::DeserializeFailed);
    }
}
