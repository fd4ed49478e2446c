//! Frame encoding.
//!
//! Frames are self-contained: one message per frame, no length prefix.
//! JSON is the interoperable default; CBOR is a compact alternative for
//! peers that both speak it.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// Wire format for frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameCodec {
    #[default]
    Json,
    Cbor,
}

impl FrameCodec {
    /// Encode a message into a frame.
    pub fn encode<T: Serialize>(&self, message: &T) -> Result<Bytes> {
        match self {
            FrameCodec::Json => serde_json::to_vec(message)
                .map(Bytes::from)
                .map_err(|e| SyncError::Codec(e.to_string())),
            FrameCodec::Cbor => {
                let mut buf = Vec::new();
                ciborium::into_writer(message, &mut buf)
                    .map_err(|e| SyncError::Codec(e.to_string()))?;
                Ok(Bytes::from(buf))
            }
        }
    }

    /// Decode a frame.
    pub fn decode<T: DeserializeOwned>(&self, frame: &[u8]) -> Result<T> {
        match self {
            FrameCodec::Json => {
                serde_json::from_slice(frame).map_err(|e| SyncError::Codec(e.to_string()))
            }
            FrameCodec::Cbor => {
                ciborium::from_reader(frame).map_err(|e| SyncError::Codec(e.to_string()))
            }
        }
    }

    /// Decode a frame, rejecting it unread if it is longer than `max` bytes.
    pub fn decode_bounded<T: DeserializeOwned>(&self, frame: &[u8], max: usize) -> Result<T> {
        if frame.len() > max {
            return Err(SyncError::FrameTooLarge {
                size: frame.len(),
                max,
            });
        }
        self.decode(frame)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FrameCodec::Json => "json",
            FrameCodec::Cbor => "cbor",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{
        InspectorMessage, PersistentDeviceId, QueryAction, QueryActionMessage, StateEnvelope,
        SyncMessage,
    };
    use cachescope_core::{DehydratedQuery, DehydratedState, QueryKey, QueryState, Value};

    fn sample() -> SyncMessage {
        let state = DehydratedState {
            mutations: Vec::new(),
            queries: vec![DehydratedQuery::new(
                QueryKey::from(["#storage", "mmkv", "x"]),
                QueryState::success(Value::from(42), 1_700_000_000_000),
            )],
        };
        SyncMessage::DehydratedState(StateEnvelope {
            state: state.to_payload(),
            is_online_manager_online: true,
            persistent_device_id: PersistentDeviceId::from("dev-1"),
            device_name: Some("Pixel".into()),
            platform: Some("android".into()),
            extra_device_info: None,
            env_variables: None,
        })
    }

    #[test]
    fn test_json_frame_is_plain_json() {
        let frame = FrameCodec::Json.encode(&sample()).unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&frame).unwrap();
        assert_eq!(parsed["type"], "dehydrated-state");
        assert_eq!(parsed["persistentDeviceId"], "dev-1");
    }

    #[test]
    fn test_both_codecs_decode_their_own_frames() {
        let message = sample();
        for codec in [FrameCodec::Json, FrameCodec::Cbor] {
            let frame = codec.encode(&message).unwrap();
            let decoded: SyncMessage = codec.decode(&frame).unwrap();
            assert_eq!(decoded, message, "codec {}", codec.as_str());
        }
    }

    #[test]
    fn test_cbor_action_frame() {
        let message = InspectorMessage::QueryAction(QueryActionMessage {
            action: QueryAction::Invalidate,
            query_hash: "[\"todos\"]".into(),
            persistent_device_id: PersistentDeviceId::from("dev-1"),
        });
        let frame = FrameCodec::Cbor.encode(&message).unwrap();
        let decoded: InspectorMessage = FrameCodec::Cbor.decode(&frame).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_garbage_frame_is_codec_error() {
        let err = FrameCodec::Json
            .decode::<SyncMessage>(b"{\"type\":")
            .unwrap_err();
        assert!(matches!(err, SyncError::Codec(_)));
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let frame = FrameCodec::Json.encode(&sample()).unwrap();
        let err = FrameCodec::Json
            .decode_bounded::<SyncMessage>(&frame, 8)
            .unwrap_err();
        assert!(matches!(err, SyncError::FrameTooLarge { max: 8, .. }));

        let ok: SyncMessage = FrameCodec::Json
            .decode_bounded(&frame, frame.len())
            .unwrap();
        assert_eq!(ok, sample());
    }
}
