//! Accumulating frame extraction for transports that may deliver
//! partial or multiple frames per read (spec §4.1 edge cases, §4.2).
//! Mirrors libqmi's two-stage `qmimsg_read` (read the fixed QMUX header
//! first, then `length`-driven body) but works against an in-memory
//! accumulator instead of a blocking read callback, since the transport
//! here hands us whatever bytes it has.

use bytes::BytesMut;

use crate::error::{Error, Result};
use crate::message::{Message, MARKER, QMUX_HEADER_LEN};

/// Pulls complete QMUX frames out of a byte stream that may be chunked
/// arbitrarily by the underlying transport. A trailing partial frame is
/// retained across calls; a structurally invalid frame (bad marker, or a
/// length field promising more than `from_raw` will accept) fails that
/// frame only — bytes already consumed into previously returned messages
/// are unaffected.
#[derive(Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        FrameDecoder { buf: BytesMut::new() }
    }

    /// Appends newly read bytes to the internal accumulator.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Returns the next complete frame, if one is buffered. `Ok(None)`
    /// means more bytes are needed; `Err` means the buffered head is
    /// structurally invalid and is discarded so a subsequent call can
    /// attempt to resynchronize on whatever bytes remain.
    pub fn next_message(&mut self) -> Result<Option<Message>> {
        if self.buf.len() < 1 + QMUX_HEADER_LEN {
            return Ok(None);
        }
        if self.buf[0] != MARKER {
            // Drop the single bad byte and let the caller try again;
            // a lone corrupt marker should not wedge the whole stream.
            let _ = self.buf.split_to(1);
            return Err(Error::Framing);
        }
        let qmux_length = u16::from_le_bytes([self.buf[1], self.buf[2]]) as usize;
        let total_len = 1 + qmux_length;
        if self.buf.len() < total_len {
            return Ok(None);
        }

        let frame = self.buf.split_to(total_len);
        match Message::from_raw(&frame) {
            Ok(message) => Ok(Some(message)),
            Err(e) => Err(e),
        }
    }

    /// Drains and returns every complete frame currently buffered,
    /// stopping at the first error or the first incomplete trailing
    /// frame (which is preserved for the next `push`).
    pub fn drain_complete(&mut self) -> (Vec<Message>, Option<Error>) {
        let mut out = Vec::new();
        loop {
            match self.next_message() {
                Ok(Some(m)) => out.push(m),
                Ok(None) => return (out, None),
                Err(e) => return (out, Some(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_bytes() -> Vec<u8> {
        Message::new_request(2, 1, 0, 0, 1, 0x20).unwrap().to_bytes().to_vec()
    }

    #[test]
    fn splits_two_concatenated_frames_delivered_as_one_chunk() {
        let one = request_bytes();
        let two = Message::new_request(2, 1, 0, 0, 2, 0x21).unwrap().to_bytes().to_vec();
        let mut combined = one.clone();
        combined.extend_from_slice(&two);

        let mut decoder = FrameDecoder::new();
        decoder.push(&combined);
        let (messages, err) = decoder.drain_complete();
        assert!(err.is_none());
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].transaction_id(), 1);
        assert_eq!(messages[1].transaction_id(), 2);
    }

    #[test]
    fn reassembles_a_frame_delivered_one_byte_at_a_time() {
        let frame = request_bytes();
        let mut decoder = FrameDecoder::new();
        for &byte in &frame[..frame.len() - 1] {
            decoder.push(&[byte]);
            assert!(decoder.next_message().unwrap().is_none());
        }
        decoder.push(&frame[frame.len() - 1..]);
        let msg = decoder.next_message().unwrap().unwrap();
        assert_eq!(msg.transaction_id(), 1);
    }

    #[test]
    fn bad_marker_byte_is_dropped_and_stream_resynchronizes() {
        let mut combined = vec![0xFF];
        combined.extend_from_slice(&request_bytes());

        let mut decoder = FrameDecoder::new();
        decoder.push(&combined);
        assert!(matches!(decoder.next_message(), Err(Error::Framing)));
        let msg = decoder.next_message().unwrap().unwrap();
        assert_eq!(msg.transaction_id(), 1);
    }
}
