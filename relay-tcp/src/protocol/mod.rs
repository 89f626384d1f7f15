use bytes::{Buf, BufMut, Bytes, BytesMut};
use cachesync::SyncPayload;
use serde::{Deserialize, Serialize};
use shared::WindowId;

// Frame type identifiers
pub const FRAME_HELLO: u8 = 0x00;
pub const FRAME_WELCOME: u8 = 0x01;
pub const FRAME_SYNC: u8 = 0x02;
pub const FRAME_PING: u8 = 0x03;
pub const FRAME_PONG: u8 = 0x04;
pub const FRAME_ERROR: u8 = 0x05;

/// Every frame starts with a one-byte tag
pub const TAG_LEN: usize = 1;

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Window -> coordinator, opens the session
    Hello,
    /// Coordinator -> window, assigns the window its identity
    Welcome { window_id: WindowId },
    Sync(SyncPayload),
    Ping,
    Pong,
    Error { msg: String },
}

#[derive(Serialize, Deserialize)]
struct WelcomeBody {
    window_id: WindowId,
}

#[derive(Serialize, Deserialize)]
struct ErrorBody {
    msg: String,
}

impl Frame {
    /// Encode a Frame into Bytes for transmission
    ///
    /// Format: [tag: u8][JSON body]
    /// - HELLO, PING, PONG: tag only
    /// - WELCOME: {"window_id": n}
    /// - SYNC: the sync payload
    /// - ERROR: {"msg": "..."}
    pub fn encode(&self) -> shared::Result<Bytes> {
        let mut buf = BytesMut::new();

        match self {
            Frame::Hello => buf.put_u8(FRAME_HELLO),
            Frame::Welcome { window_id } => {
                buf.put_u8(FRAME_WELCOME);
                buf.put_slice(&serde_json::to_vec(&WelcomeBody {
                    window_id: *window_id,
                })?);
            }
            Frame::Sync(payload) => {
                buf.put_u8(FRAME_SYNC);
                buf.put_slice(&serde_json::to_vec(payload)?);
            }
            Frame::Ping => buf.put_u8(FRAME_PING),
            Frame::Pong => buf.put_u8(FRAME_PONG),
            Frame::Error { msg } => {
                buf.put_u8(FRAME_ERROR);
                buf.put_slice(&serde_json::to_vec(&ErrorBody { msg: msg.clone() })?);
            }
        }

        Ok(buf.freeze())
    }

    /// Decode a Frame from Bytes received from the network
    ///
    /// This is called AFTER LengthDelimitedCodec has extracted the frame,
    /// so we receive a complete message as Bytes
    pub fn decode(mut buf: Bytes) -> Result<Self, String> {
        if buf.is_empty() {
            return Err("Empty buffer".to_string());
        }

        let tag = buf.get_u8();

        match tag {
            FRAME_HELLO => Ok(Frame::Hello),
            FRAME_WELCOME => {
                let body: WelcomeBody = serde_json::from_slice(&buf)
                    .map_err(|e| format!("Invalid WELCOME body: {}", e))?;
                Ok(Frame::Welcome {
                    window_id: body.window_id,
                })
            }
            FRAME_SYNC => {
                let payload = serde_json::from_slice(&buf)
                    .map_err(|e| format!("Invalid SYNC body: {}", e))?;
                Ok(Frame::Sync(payload))
            }
            FRAME_PING => Ok(Frame::Ping),
            FRAME_PONG => Ok(Frame::Pong),
            FRAME_ERROR => {
                let body: ErrorBody = serde_json::from_slice(&buf)
                    .map_err(|e| format!("Invalid ERROR body: {}", e))?;
                Ok(Frame::Error { msg: body.msg })
            }
            _ => Err(format!("Unknown frame type: 0x{:02X}", tag)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cachesync::{CacheScope, CacheSyncMessage};
    use serde_json::json;

    #[test]
    fn test_sync_frame_carries_json_payload() {
        let frame = Frame::Sync(SyncPayload::Single(CacheSyncMessage::set(
            CacheScope::Shared,
            "theme",
            json!("dark"),
            None,
        )));
        let encoded = frame.encode().unwrap();

        assert_eq!(encoded[0], FRAME_SYNC);
        let body: serde_json::Value = serde_json::from_slice(&encoded[1..]).unwrap();
        assert_eq!(body["type"], "single");
        assert_eq!(body["key"], "theme");
        assert_eq!(Frame::decode(encoded).unwrap(), frame);
    }

    #[test]
    fn test_welcome_body_shape() {
        let encoded = Frame::Welcome {
            window_id: WindowId(7),
        }
        .encode()
        .unwrap();

        assert_eq!(&encoded[1..], br#"{"window_id":7}"#);
    }

    #[test]
    fn test_tag_only_frames() {
        for (frame, tag) in [
            (Frame::Hello, FRAME_HELLO),
            (Frame::Ping, FRAME_PING),
            (Frame::Pong, FRAME_PONG),
        ] {
            let encoded = frame.encode().unwrap();
            assert_eq!(encoded.as_ref(), &[tag]);
        }
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(Frame::decode(Bytes::new()), Err("Empty buffer".to_string()));

        let unknown = Frame::decode(Bytes::from_static(&[0x7F])).unwrap_err();
        assert!(unknown.contains("0x7F"));

        let truncated = Frame::decode(Bytes::from_static(b"\x02{\"type\":")).unwrap_err();
        assert!(truncated.starts_with("Invalid SYNC body"));

        let missing = Frame::decode(Bytes::from_static(&[FRAME_WELCOME])).unwrap_err();
        assert!(missing.starts_with("Invalid WELCOME body"));
    }
}
