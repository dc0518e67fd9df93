use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

pub const LENGTH_PREFIX_LEN: usize = 4;

/// 4MB limit
pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Declared length exceeds the configured cap. Fatal to the connection.
    #[error("Frame of {len} bytes exceeds the {max} byte limit")]
    TooLarge { len: usize, max: usize },

    /// Peer closed the stream in the middle of a frame.
    #[error("Connection closed mid-frame: expected {expected} bytes, received {received}")]
    Truncated { expected: usize, received: usize },
}

/// Frame format: [length: u32 big-endian][data: bytes]
///
/// `decode` yields `None` until a whole frame is buffered, so a frame can
/// arrive in any number of reads. At end of stream an empty buffer is a clean
/// close, while leftover bytes are a truncated frame.
#[derive(Debug, Clone, Copy)]
pub struct MessageCodec {
    max_frame_len: usize,
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new(MAX_FRAME_LEN)
    }
}

impl MessageCodec {
    pub fn new(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }
}

impl Decoder for MessageCodec {
    type Item = BytesMut;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_PREFIX_LEN {
            return Ok(None);
        }

        let length = decode_length([src[0], src[1], src[2], src[3]]) as usize;

        if length > self.max_frame_len {
            return Err(FrameError::TooLarge {
                len: length,
                max: self.max_frame_len,
            });
        }

        if src.len() < LENGTH_PREFIX_LEN + length {
            src.reserve(LENGTH_PREFIX_LEN + length - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_LEN);
        let data = src.split_to(length);
        Ok(Some(data))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => {
                let expected = if src.len() < LENGTH_PREFIX_LEN {
                    LENGTH_PREFIX_LEN
                } else {
                    LENGTH_PREFIX_LEN + decode_length([src[0], src[1], src[2], src[3]]) as usize
                };
                let received = src.len();
                src.clear();
                Err(FrameError::Truncated { expected, received })
            }
        }
    }
}

impl Encoder<Vec<u8>> for MessageCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Vec<u8>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        <Self as Encoder<&[u8]>>::encode(self, item.as_slice(), dst)
    }
}

impl Encoder<&[u8]> for MessageCodec {
    type Error = FrameError;

    fn encode(&mut self, item: &[u8], dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.len() > self.max_frame_len || item.len() > u32::MAX as usize {
            return Err(FrameError::TooLarge {
                len: item.len(),
                max: self.max_frame_len,
            });
        }
        dst.reserve(LENGTH_PREFIX_LEN + item.len());
        dst.put_u32(item.len() as u32);
        dst.extend_from_slice(item);
        Ok(())
    }
}

/// Prefixes `payload` with its big-endian byte length.
pub fn encode_frame(payload: &[u8]) -> Result<BytesMut, FrameError> {
    let mut dst = BytesMut::with_capacity(LENGTH_PREFIX_LEN + payload.len());
    <MessageCodec as Encoder<&[u8]>>::encode(&mut MessageCodec::default(), payload, &mut dst)?;
    Ok(dst)
}

pub fn decode_length(prefix: [u8; 4]) -> u32 {
    u32::from_be_bytes(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_is_big_endian_byte_length() {
        // multi-byte characters: the prefix counts bytes, not chars
        let payload = r#"{"action":"upload","filename":"prüfung.mod"}"#.as_bytes();
        let frame = encode_frame(payload).unwrap();

        assert_eq!(&frame[..4], &(payload.len() as u32).to_be_bytes());
        assert_eq!(&frame[4..], payload);
        assert_eq!(decode_length([0, 0, 1, 2]), 258);
    }

    #[test]
    fn test_decode_waits_for_whole_frame() {
        let payload = br#"{"status":"success","message":"Upload successful"}"#;
        let frame = encode_frame(payload).unwrap();
        let mut codec = MessageCodec::default();
        let mut buffer = BytesMut::new();

        for (i, byte) in frame.iter().enumerate() {
            buffer.put_u8(*byte);
            let decoded = codec.decode(&mut buffer).unwrap();
            if i + 1 < frame.len() {
                assert!(decoded.is_none());
            } else {
                assert_eq!(&decoded.unwrap()[..], payload);
            }
        }
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_two_frames_in_one_buffer() {
        let mut buffer = encode_frame(b"first").unwrap();
        buffer.extend_from_slice(&encode_frame(b"second").unwrap());
        let mut codec = MessageCodec::default();

        assert_eq!(&codec.decode(&mut buffer).unwrap().unwrap()[..], b"first");
        assert_eq!(&codec.decode(&mut buffer).unwrap().unwrap()[..], b"second");
        assert!(codec.decode(&mut buffer).unwrap().is_none());
    }

    #[test]
    fn test_oversized_length_prefix_is_rejected() {
        let mut codec = MessageCodec::new(16);
        let mut buffer = BytesMut::from(&u32::MAX.to_be_bytes()[..]);

        match codec.decode(&mut buffer) {
            Err(FrameError::TooLarge { len, max }) => {
                assert_eq!(len, u32::MAX as usize);
                assert_eq!(max, 16);
            }
            other => panic!("expected TooLarge, got {:?}", other),
        }

        let mut dst = BytesMut::new();
        assert!(matches!(
            codec.encode(&[0u8; 17][..], &mut dst),
            Err(FrameError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_frame_at_limit_is_accepted() {
        let mut codec = MessageCodec::new(16);

        let mut dst = BytesMut::new();
        codec.encode(&[7u8; 16][..], &mut dst).unwrap();
        assert_eq!(&dst[..4], &[0, 0, 0, 16]);
        assert_eq!(&codec.decode(&mut dst).unwrap().unwrap()[..], &[7u8; 16]);

        let mut one_over = BytesMut::from(&17u32.to_be_bytes()[..]);
        one_over.extend_from_slice(&[7u8; 17]);
        assert!(matches!(
            codec.decode(&mut one_over),
            Err(FrameError::TooLarge { len: 17, max: 16 })
        ));
    }

    #[test]
    fn test_default_limit_is_checked_from_prefix_alone() {
        let mut codec = MessageCodec::default();

        let mut at_limit = BytesMut::from(&(MAX_FRAME_LEN as u32).to_be_bytes()[..]);
        assert!(codec.decode(&mut at_limit).unwrap().is_none());

        let mut over = BytesMut::from(&(MAX_FRAME_LEN as u32 + 1).to_be_bytes()[..]);
        assert!(matches!(
            codec.decode(&mut over),
            Err(FrameError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_eof_distinguishes_clean_close_from_truncation() {
        let mut codec = MessageCodec::default();

        let mut empty = BytesMut::new();
        assert!(codec.decode_eof(&mut empty).unwrap().is_none());

        let mut partial_prefix = BytesMut::from(&[0u8, 0][..]);
        assert!(matches!(
            codec.decode_eof(&mut partial_prefix),
            Err(FrameError::Truncated {
                expected: 4,
                received: 2
            })
        ));

        let frame = encode_frame(b"0123456789").unwrap();
        let mut partial_payload = BytesMut::from(&frame[..8]);
        assert!(matches!(
            codec.decode_eof(&mut partial_payload),
            Err(FrameError::Truncated {
                expected: 14,
                received: 8
            })
        ));
    }

    #[test]
    fn test_empty_payload_is_a_valid_frame() {
        let mut buffer = encode_frame(b"").unwrap();
        assert_eq!(&buffer[..], &[0, 0, 0, 0]);

        let decoded = MessageCodec::default().decode(&mut buffer).unwrap().unwrap();
        assert!(decoded.is_empty());
    }
}
