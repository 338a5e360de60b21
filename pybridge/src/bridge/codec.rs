//! Framed codec for interpreter communication.
//!
//! Frames are a 4-byte big-endian length followed by a JSON body. The
//! bootstrap program reads and writes the same layout with `struct.pack('>I')`.

use std::io;
use std::marker::PhantomData;

use serde::{Serialize, de::DeserializeOwned};
use tokio_util::bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

/// Default upper bound on a single frame body.
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 8 * 1024 * 1024;

const LARGE_FRAME_BYTES: usize = 100_000;

/// Length-prefixed JSON codec.
///
/// Decodes frames into `T`; encodes any serializable value, so the host can
/// push frames the typed [`Command`](super::protocol::Command) enum cannot
/// express.
pub struct JsonCodec<T> {
    inner: LengthDelimitedCodec,
    _phantom: PhantomData<T>,
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self::with_max_frame_length(DEFAULT_MAX_FRAME_LENGTH)
    }

    pub fn with_max_frame_length(max_frame_length: usize) -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .big_endian()
                .length_field_length(4)
                .max_frame_length(max_frame_length)
                .new_codec(),
            _phantom: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> Decoder for JsonCodec<T> {
    type Item = T;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.inner.decode(src)? {
            Some(bytes) => {
                tracing::trace!(frame_size_bytes = bytes.len(), "Decoding frame");
                let item = serde_json::from_slice(&bytes)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }
}

impl<T, U: Serialize> Encoder<U> for JsonCodec<T> {
    type Error = io::Error;

    fn encode(&mut self, item: U, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json =
            serde_json::to_vec(&item).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let json_len = json.len();
        tracing::trace!(frame_size_bytes = json_len, "Encoding frame");
        if json_len > LARGE_FRAME_BYTES {
            tracing::info!(
                frame_size_bytes = json_len,
                frame_size_kb = json_len / 1024,
                "Large frame being encoded"
            );
        }
        self.inner.encode(Bytes::from(json), dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::protocol::{Command, Response};

    #[test]
    fn frame_layout_is_big_endian_length_then_json() {
        let mut codec = JsonCodec::<Response>::new();
        let mut buf = BytesMut::new();

        codec.encode(Command::get("x").unwrap(), &mut buf).unwrap();

        let body = br#"{"type":"get","var":"x"}"#;
        assert_eq!(&buf[..4], &(body.len() as u32).to_be_bytes());
        assert_eq!(&buf[4..], &body[..]);
    }

    #[test]
    fn decodes_response_written_by_interpreter() {
        let mut codec = JsonCodec::<Response>::new();
        let body = br#"{"type": "run", "output": "hello, world!\n"}"#;
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
        buf.extend_from_slice(body);

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(
            decoded,
            Response::Run {
                output: "hello, world!\n".to_string()
            }
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_frame_waits_for_more_bytes() {
        let mut codec = JsonCodec::<Response>::new();
        let body = br#"{"type": "set"}"#;
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
        buf.extend_from_slice(&body[..5]);

        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&body[5..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Response::Set));
    }

    #[test]
    fn invalid_json_is_invalid_data() {
        let mut codec = JsonCodec::<Response>::new();
        let body = b"not json";
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
        buf.extend_from_slice(body);

        let err = codec.decode(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut codec = JsonCodec::<Response>::with_max_frame_length(16);
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&1024u32.to_be_bytes());
        buf.extend_from_slice(&[b' '; 32]);

        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn encodes_arbitrary_frames() {
        let mut codec = JsonCodec::<Response>::new();
        let mut buf = BytesMut::new();
        codec
            .encode(serde_json::json!({"type": "bogus"}), &mut buf)
            .unwrap();
        assert_eq!(&buf[4..], br#"{"type":"bogus"}"#);
    }
}
