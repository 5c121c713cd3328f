//! STX/ETX/LRC frame extraction over an accumulating byte buffer.
//!
//! One codec instance per serial link. Bytes arrive in arbitrary slices;
//! `next_message` yields complete, checksum-valid payloads in arrival order.
//! Noise before an STX is discarded, a partial frame is kept until the rest
//! arrives, and a frame with a bad LRC is dropped as a unit without
//! blocking the frames behind it.

use bytes::BytesMut;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use crate::{lrc, DEFAULT_MAX_BUFFER, ETX, STX};

/// Recoverable framing failures. The offending bytes are dropped and the
/// stream continues.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("bad LRC: received 0x{received:02X}, computed 0x{computed:02X}")]
    BadLrc { received: u8, computed: u8 },

    #[error("buffer overflow: {buffered} bytes exceeds cap of {cap}")]
    BufferOverflow { buffered: usize, cap: usize },
}

pub struct FrameCodec {
    buffer: Vec<u8>,
    max_buffer: usize,
    dropped_frames: u64,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::with_max_buffer(DEFAULT_MAX_BUFFER)
    }

    /// Create a codec that never buffers more than `max_buffer` bytes.
    pub fn with_max_buffer(max_buffer: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_buffer: max_buffer.max(1),
            dropped_frames: 0,
        }
    }

    /// Feed newly received bytes.
    pub fn append_data(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
        if self.buffer.len() > self.max_buffer {
            self.shed_overflow();
        }
    }

    /// Extract the next complete, valid frame payload, if any.
    pub fn next_message(&mut self) -> Option<Vec<u8>> {
        loop {
            let Some(stx) = self.buffer.iter().position(|&b| b == STX) else {
                self.buffer.clear();
                return None;
            };
            if stx > 0 {
                tracing::trace!(discarded = stx, "dropping bytes before STX");
                self.buffer.drain(..stx);
            }

            let etx = self.buffer.iter().position(|&b| b == ETX)?;
            let Some(&received) = self.buffer.get(etx + 1) else {
                return None;
            };

            let computed = lrc(&self.buffer[1..=etx]);
            if received != computed {
                let err = FrameError::BadLrc { received, computed };
                tracing::warn!(error = %err, frame_len = etx + 2, "dropping frame");
                self.dropped_frames += 1;
                self.buffer.drain(..etx + 2);
                continue;
            }

            let payload = self.buffer[1..etx].to_vec();
            self.buffer.drain(..etx + 2);
            return Some(payload);
        }
    }

    /// Bytes currently buffered awaiting a complete frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Frames discarded for a bad LRC since creation.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    /// Keep only the newest partial frame if it fits, otherwise everything goes.
    fn shed_overflow(&mut self) {
        let err = FrameError::BufferOverflow {
            buffered: self.buffer.len(),
            cap: self.max_buffer,
        };
        let keep_from = self
            .buffer
            .iter()
            .rposition(|&b| b == STX)
            .filter(|&i| self.buffer.len() - i <= self.max_buffer);
        match keep_from {
            Some(i) => {
                self.buffer.drain(..i);
            }
            None => self.buffer.clear(),
        }
        tracing::warn!(error = %err, kept = self.buffer.len(), "frame buffer shed");
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Wrap a payload as `STX ‖ payload ‖ ETX ‖ LRC`.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 3);
    frame.push(STX);
    frame.extend_from_slice(payload);
    frame.push(ETX);
    frame.push(lrc(&frame[1..]));
    frame
}

impl Decoder for FrameCodec {
    type Item = Vec<u8>;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if !src.is_empty() {
            let chunk = src.split();
            self.append_data(&chunk);
        }
        Ok(self.next_message())
    }
}

/// Encodes a payload into a full frame.
impl Encoder<Vec<u8>> for FrameCodec {
    type Error = std::io::Error;

    fn encode(&mut self, payload: Vec<u8>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&encode_frame(&payload));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_single_frame() {
        let mut codec = FrameCodec::new();
        codec.append_data(&encode_frame(b"0300"));
        assert_eq!(codec.next_message(), Some(b"0300".to_vec()));
        assert_eq!(codec.next_message(), None);
        assert_eq!(codec.buffered(), 0);
    }

    #[test]
    fn discards_noise_before_stx() {
        let mut codec = FrameCodec::new();
        codec.append_data(b"\xff\x00garbage");
        codec.append_data(&encode_frame(b"0500"));
        assert_eq!(codec.next_message(), Some(b"0500".to_vec()));
    }

    #[test]
    fn noise_without_stx_is_cleared() {
        let mut codec = FrameCodec::new();
        codec.append_data(b"no frame here");
        assert_eq!(codec.next_message(), None);
        assert_eq!(codec.buffered(), 0);
    }

    #[test]
    fn partial_frame_is_retained() {
        let frame = encode_frame(b"0401ABCDEF0123456789");
        let (head, tail) = frame.split_at(frame.len() - 1);

        let mut codec = FrameCodec::new();
        codec.append_data(head);
        assert_eq!(codec.next_message(), None);
        assert_eq!(codec.buffered(), head.len());

        codec.append_data(tail);
        assert_eq!(codec.next_message(), Some(b"0401ABCDEF0123456789".to_vec()));
    }

    #[test]
    fn corrupted_lrc_does_not_block_next_frame() {
        let mut bad = encode_frame(b"0300");
        let last = bad.len() - 1;
        bad[last] ^= 0xFF;

        let mut codec = FrameCodec::new();
        codec.append_data(&bad);
        codec.append_data(&encode_frame(b"0500"));

        assert_eq!(codec.next_message(), Some(b"0500".to_vec()));
        assert_eq!(codec.dropped_frames(), 1);
        assert_eq!(codec.next_message(), None);
    }

    #[test]
    fn many_bad_frames_are_skipped_iteratively() {
        let mut bad = encode_frame(b"01");
        let last = bad.len() - 1;
        bad[last] ^= 0x55;

        let mut codec = FrameCodec::with_max_buffer(1 << 20);
        for _ in 0..10_000 {
            codec.append_data(&bad);
        }
        codec.append_data(&encode_frame(b"0300"));
        assert_eq!(codec.next_message(), Some(b"0300".to_vec()));
        assert_eq!(codec.dropped_frames(), 10_000);
    }

    #[test]
    fn overflow_keeps_latest_partial_frame() {
        let mut codec = FrameCodec::with_max_buffer(16);
        codec.append_data(&[b'x'; 20]);
        assert_eq!(codec.buffered(), 0);

        codec.append_data(&[STX, b'0', b'3']);
        codec.append_data(&[b'y'; 14]);
        // 17 bytes from STX exceed the cap, so nothing survives
        assert_eq!(codec.buffered(), 0);

        let frame = encode_frame(b"0300");
        codec.append_data(&[b'z'; 10]);
        codec.append_data(&frame);
        assert_eq!(codec.next_message(), Some(b"0300".to_vec()));
    }

    #[test]
    fn decoder_and_encoder_round_trip() {
        let mut codec = FrameCodec::new();
        let mut wire = BytesMut::new();
        codec.encode(b"0300".to_vec(), &mut wire).unwrap();
        codec.encode(b"0500".to_vec(), &mut wire).unwrap();

        assert_eq!(codec.decode(&mut wire).unwrap(), Some(b"0300".to_vec()));
        assert!(wire.is_empty());
        assert_eq!(codec.decode(&mut wire).unwrap(), Some(b"0500".to_vec()));
        assert_eq!(codec.decode(&mut wire).unwrap(), None);
    }
}
