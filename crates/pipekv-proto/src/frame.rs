//! Fixed-width frame codecs.
//!
//! Strings are NUL-padded to their field width. Decoding takes bytes up to
//! the first NUL (or the full field) and requires valid UTF-8.

use crate::consts::{
    CONNECT_FRAME_LEN, KEY_FRAME_LEN, MAX_PIPE_PATH_LENGTH, MAX_STRING_SIZE,
    NOTIFICATION_FRAME_LEN, RESPONSE_LEN,
};
use crate::error::ProtoError;

/// Literal value field of a deleted-key notification.
const DELETED_MARKER: &str = "DELETED";

/// Operations a client can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    /// Sent once, on the registration pipe only.
    Connect = 1,
    Disconnect = 2,
    Subscribe = 3,
    Unsubscribe = 4,
}

impl TryFrom<u8> for OpCode {
    type Error = ProtoError;

    fn try_from(byte: u8) -> Result<Self, ProtoError> {
        match byte {
            1 => Ok(Self::Connect),
            2 => Ok(Self::Disconnect),
            3 => Ok(Self::Subscribe),
            4 => Ok(Self::Unsubscribe),
            other => Err(ProtoError::UnknownOpCode(other)),
        }
    }
}

/// Copies `s` into `dst`, NUL-padding the tail.
fn put_padded(dst: &mut [u8], s: &str) -> Result<(), ProtoError> {
    let bytes = s.as_bytes();
    if bytes.len() > dst.len() {
        return Err(ProtoError::FieldTooLong {
            len: bytes.len(),
            max: dst.len(),
        });
    }
    dst[..bytes.len()].copy_from_slice(bytes);
    Ok(())
}

/// Reads a NUL-padded field back into an owned string.
fn take_padded(src: &[u8]) -> Result<String, ProtoError> {
    let end = src.iter().position(|&b| b == 0).unwrap_or(src.len());
    std::str::from_utf8(&src[..end])
        .map(str::to_owned)
        .map_err(|_| ProtoError::Malformed("field is not valid UTF-8"))
}

/// A connection request carried on the registration pipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub req_path: String,
    pub resp_path: String,
    pub notif_path: String,
}

impl ConnectRequest {
    pub fn encode(&self) -> Result<[u8; CONNECT_FRAME_LEN], ProtoError> {
        let mut frame = [0u8; CONNECT_FRAME_LEN];
        frame[0] = OpCode::Connect as u8;
        let p = MAX_PIPE_PATH_LENGTH;
        put_padded(&mut frame[1..=p], &self.req_path)?;
        put_padded(&mut frame[1 + p..=2 * p], &self.resp_path)?;
        put_padded(&mut frame[1 + 2 * p..=3 * p], &self.notif_path)?;
        Ok(frame)
    }

    /// Decodes the three paths of a frame whose op byte was already checked.
    pub fn decode(frame: &[u8; CONNECT_FRAME_LEN]) -> Result<Self, ProtoError> {
        if frame[0] != OpCode::Connect as u8 {
            return Err(ProtoError::UnknownOpCode(frame[0]));
        }
        let p = MAX_PIPE_PATH_LENGTH;
        let req_path = take_padded(&frame[1..=p])?;
        let resp_path = take_padded(&frame[1 + p..=2 * p])?;
        let notif_path = take_padded(&frame[1 + 2 * p..=3 * p])?;
        if req_path.is_empty() || resp_path.is_empty() || notif_path.is_empty() {
            return Err(ProtoError::Malformed("empty pipe path"));
        }
        Ok(Self {
            req_path,
            resp_path,
            notif_path,
        })
    }
}

/// A subscribe or unsubscribe request on the request pipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRequest {
    pub op: OpCode,
    pub key: String,
}

impl KeyRequest {
    pub fn encode(&self) -> Result<[u8; KEY_FRAME_LEN], ProtoError> {
        let mut frame = [0u8; KEY_FRAME_LEN];
        frame[0] = self.op as u8;
        put_padded(&mut frame[1..], &self.key)?;
        Ok(frame)
    }

    /// Decodes the key field that follows an already-consumed op byte.
    pub fn decode_key(field: &[u8; MAX_STRING_SIZE]) -> Result<String, ProtoError> {
        let key = take_padded(field)?;
        if key.is_empty() {
            return Err(ProtoError::Malformed("empty key"));
        }
        Ok(key)
    }
}

/// Exactly two bytes per request: the echoed op code and a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response {
    pub op: OpCode,
    pub result: u8,
}

impl Response {
    #[inline]
    pub fn encode(self) -> [u8; RESPONSE_LEN] {
        [self.op as u8, self.result]
    }

    pub fn decode(frame: [u8; RESPONSE_LEN]) -> Result<Self, ProtoError> {
        Ok(Self {
            op: OpCode::try_from(frame[0])?,
            result: frame[1],
        })
    }
}

/// One change record on the notification pipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// The key was written; carries the committed value.
    Changed { key: String, value: String },
    /// The key was deleted; the value field carries `DELETED` on the wire.
    Deleted { key: String },
    /// The server is done with this subscriber; the listener should exit.
    Terminate,
}

impl Notification {
    pub fn encode(&self) -> Result<[u8; NOTIFICATION_FRAME_LEN], ProtoError> {
        let mut frame = [0u8; NOTIFICATION_FRAME_LEN];
        frame[0] = match self {
            Self::Changed { .. } => 1,
            Self::Deleted { .. } => 2,
            Self::Terminate => 3,
        };
        let (key_field, value_field) = frame[1..].split_at_mut(MAX_STRING_SIZE);
        match self {
            Self::Changed { key, value } => {
                put_padded(key_field, key)?;
                put_padded(value_field, value)?;
            }
            Self::Deleted { key } => {
                put_padded(key_field, key)?;
                put_padded(value_field, DELETED_MARKER)?;
            }
            Self::Terminate => {}
        }
        Ok(frame)
    }

    pub fn decode(frame: &[u8; NOTIFICATION_FRAME_LEN]) -> Result<Self, ProtoError> {
        let (key_field, value_field) = frame[1..].split_at(MAX_STRING_SIZE);
        match frame[0] {
            1 => Ok(Self::Changed {
                key: take_padded(key_field)?,
                value: take_padded(value_field)?,
            }),
            2 => Ok(Self::Deleted {
                key: take_padded(key_field)?,
            }),
            3 => Ok(Self::Terminate),
            other => Err(ProtoError::UnknownOpCode(other)),
        }
    }

    /// The line the client prints for this record, `(key,value)` shaped.
    pub fn display_line(&self) -> Option<String> {
        match self {
            Self::Changed { key, value } => Some(format!("({key},{value})")),
            Self::Deleted { key } => Some(format!("({key},{DELETED_MARKER})")),
            Self::Terminate => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_frame_round_trip() {
        let req = ConnectRequest {
            req_path: "/tmp/req7".into(),
            resp_path: "/tmp/resp7".into(),
            notif_path: "/tmp/notif7".into(),
        };
        let frame = req.encode().unwrap();
        assert_eq!(frame.len(), CONNECT_FRAME_LEN);
        assert_eq!(frame[0], 1);
        assert_eq!(ConnectRequest::decode(&frame).unwrap(), req);
    }

    #[test]
    fn connect_rejects_oversize_path() {
        let req = ConnectRequest {
            req_path: "x".repeat(MAX_PIPE_PATH_LENGTH + 1),
            resp_path: "/tmp/resp".into(),
            notif_path: "/tmp/notif".into(),
        };
        assert!(matches!(
            req.encode(),
            Err(ProtoError::FieldTooLong { max: MAX_PIPE_PATH_LENGTH, .. })
        ));
    }

    #[test]
    fn deleted_notification_carries_marker_on_the_wire() {
        let frame = Notification::Deleted { key: "apple".into() }.encode().unwrap();
        assert_eq!(frame[0], 2);
        let value_field = &frame[1 + MAX_STRING_SIZE..];
        assert_eq!(&value_field[..7], b"DELETED");
        assert_eq!(
            Notification::decode(&frame).unwrap(),
            Notification::Deleted { key: "apple".into() }
        );
    }

    #[test]
    fn terminate_notification_is_zero_padded() {
        let frame = Notification::Terminate.encode().unwrap();
        assert_eq!(frame[0], 3);
        assert!(frame[1..].iter().all(|&b| b == 0));
    }

    #[test]
    fn response_round_trip_and_unknown_op() {
        let resp = Response {
            op: OpCode::Subscribe,
            result: 1,
        };
        assert_eq!(Response::decode(resp.encode()).unwrap(), resp);
        assert!(matches!(
            Response::decode([9, 0]),
            Err(ProtoError::UnknownOpCode(9))
        ));
    }

    #[test]
    fn key_request_pads_and_restores() {
        let req = KeyRequest {
            op: OpCode::Subscribe,
            key: "apple".into(),
        };
        let frame = req.encode().unwrap();
        let mut field = [0u8; MAX_STRING_SIZE];
        field.copy_from_slice(&frame[1..]);
        assert_eq!(KeyRequest::decode_key(&field).unwrap(), "apple");
    }
}
