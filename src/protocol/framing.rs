//! Frame splitting for the byte stream
//!
//! Every message is one JSON value followed by [`FRAME_TERMINATOR`]. Reads
//! may split or merge frames arbitrarily, so incomplete trailing data stays
//! buffered until its terminator arrives.

use bytes::{Buf, Bytes, BytesMut};
use serde_json::Value;

use crate::constants::{FRAME_TERMINATOR, MAX_FRAME_SIZE, RECV_BUFFER_SIZE};
use crate::error::ProtocolError;

/// Accumulates received bytes and yields complete frames
pub struct FrameDecoder {
    pending: BytesMut,
    max_frame: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_limit(MAX_FRAME_SIZE)
    }

    /// Decoder refusing to buffer more than `max_frame` unterminated bytes
    pub fn with_limit(max_frame: usize) -> Self {
        Self {
            pending: BytesMut::with_capacity(RECV_BUFFER_SIZE),
            max_frame,
        }
    }

    /// Append freshly received bytes
    pub fn extend(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);
    }

    /// Pop the next complete frame, without its terminator
    pub fn next_frame(&mut self) -> Option<Bytes> {
        let end = self.pending.iter().position(|&b| b == FRAME_TERMINATOR)?;
        let frame = self.pending.split_to(end).freeze();
        self.pending.advance(1);
        Some(frame)
    }

    /// Bytes buffered after the last complete frame
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Fails once the incomplete trailing frame outgrows the limit
    pub fn check_limit(&self) -> Result<(), ProtocolError> {
        if self.pending.len() > self.max_frame {
            return Err(ProtocolError::FrameTooLarge {
                size: self.pending.len(),
                limit: self.max_frame,
            });
        }
        Ok(())
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Serialize a packet and append the terminator
pub fn encode_frame(packet: &Value) -> Vec<u8> {
    let mut data = packet.to_string().into_bytes();
    data.push(FRAME_TERMINATOR);
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_split_across_reads() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(b"[1,");
        assert!(decoder.next_frame().is_none());

        decoder.extend(b"2]\0{\"id\"");
        assert_eq!(decoder.next_frame().unwrap().as_ref(), b"[1,2]");
        assert!(decoder.next_frame().is_none());
        assert_eq!(decoder.pending_len(), 5);

        decoder.extend(b":1}\0");
        assert_eq!(decoder.next_frame().unwrap().as_ref(), b"{\"id\":1}");
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_several_frames_in_one_read() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(b"1\0\x002\0");

        let frames: Vec<Bytes> = std::iter::from_fn(|| decoder.next_frame()).collect();
        assert_eq!(frames, vec![Bytes::from("1"), Bytes::new(), Bytes::from("2")]);
    }

    #[test]
    fn test_unterminated_frame_limit() {
        let mut decoder = FrameDecoder::with_limit(4);
        decoder.extend(b"1234");
        assert_eq!(decoder.check_limit(), Ok(()));

        decoder.extend(b"5");
        assert_eq!(
            decoder.check_limit(),
            Err(ProtocolError::FrameTooLarge { size: 5, limit: 4 })
        );
    }

    #[test]
    fn test_complete_frames_do_not_count_toward_limit() {
        let mut decoder = FrameDecoder::with_limit(4);
        decoder.extend(b"1234\0ab");
        assert_eq!(decoder.next_frame().unwrap().as_ref(), b"1234");
        assert_eq!(decoder.check_limit(), Ok(()));
    }

    #[test]
    fn test_encode_appends_terminator() {
        let data = encode_frame(&json!(1));
        assert_eq!(data, b"1\0");
    }
}
