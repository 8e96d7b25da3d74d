//! Message type identity and payload encoding.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Errors that can occur while encoding or decoding a payload
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Message value is absent")]
    Absent,

    #[error("Failed to encode {message_type}: {message}")]
    Encode {
        message_type: &'static str,
        message: String,
    },

    #[error("Failed to decode {message_type}: {message}")]
    Decode {
        message_type: &'static str,
        message: String,
    },
}

/// A payload type carried on a topic.
///
/// `MESSAGE_TYPE` is the tag matched against configured topic bindings.
pub trait TypedMessage: Send + Sync + 'static {
    const MESSAGE_TYPE: &'static str;
}

/// Converts message values to and from broker payloads
pub trait MessageCodec<T>: Send + Sync + 'static {
    fn encode(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, payload: &[u8]) -> Result<T, CodecError>;
}

/// JSON payloads via serde
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<T> MessageCodec<T> for JsonCodec
where
    T: TypedMessage + Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        let payload = serde_json::to_vec(value).map_err(|e| CodecError::Encode {
            message_type: T::MESSAGE_TYPE,
            message: e.to_string(),
        })?;

        // An absent value serializes to a bare `null`.
        if payload == b"null" {
            return Err(CodecError::Absent);
        }

        Ok(payload)
    }

    fn decode(&self, payload: &[u8]) -> Result<T, CodecError> {
        if payload.is_empty() {
            return Err(CodecError::Absent);
        }

        serde_json::from_slice(payload).map_err(|e| CodecError::Decode {
            message_type: T::MESSAGE_TYPE,
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct OrderEvent {
        order_id: u32,
    }

    impl TypedMessage for OrderEvent {
        const MESSAGE_TYPE: &'static str = "OrderEvent";
    }

    impl TypedMessage for Option<OrderEvent> {
        const MESSAGE_TYPE: &'static str = "OrderEvent";
    }

    #[test]
    fn test_json_codec_encodes_and_decodes() {
        let payload = JsonCodec.encode(&OrderEvent { order_id: 7 }).unwrap();
        assert_eq!(payload, br#"{"order_id":7}"#);

        let decoded: OrderEvent = JsonCodec.decode(&payload).unwrap();
        assert_eq!(decoded, OrderEvent { order_id: 7 });
    }

    #[test]
    fn test_absent_value_rejected() {
        let result = MessageCodec::<Option<OrderEvent>>::encode(&JsonCodec, &None);
        assert!(matches!(result, Err(CodecError::Absent)));
    }

    #[test]
    fn test_decode_errors() {
        let empty: Result<OrderEvent, _> = JsonCodec.decode(b"");
        assert!(matches!(empty, Err(CodecError::Absent)));

        let garbage: Result<OrderEvent, _> = JsonCodec.decode(b"not json");
        assert!(matches!(
            garbage,
            Err(CodecError::Decode { message_type: "OrderEvent", .. })
        ));
    }
}
