//! Instruction codec for the Guacamole wire format.
//!
//! Frames complete instructions out of a byte stream. Decoding yields the raw
//! byte span of each instruction so that it can be relayed to the browser
//! untouched; [`Instruction::parse`] turns a span into a structured value.

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{Result, TunnelError};
use crate::protocol::instruction::{INSTRUCTION_TERMINATOR, Instruction, read_element};

/// Default upper bound for a single buffered instruction (1 MiB).
pub const DEFAULT_MAX_INSTRUCTION_LENGTH: usize = 1024 * 1024;

/// Length-prefixed element codec.
///
/// Instructions are framed as:
/// - one or more `<length>.<content>` elements
/// - `,` after every element but the last, `;` after the last
#[derive(Debug, Clone)]
pub struct InstructionCodec {
    /// Offset of the first element not yet scanned in the current buffer.
    parse_start: usize,
    max_length: usize,
}

impl InstructionCodec {
    /// Create a new codec with default max length (1 MiB).
    pub fn new() -> Self {
        Self::with_max_length(DEFAULT_MAX_INSTRUCTION_LENGTH)
    }

    /// Create a new codec with custom max length.
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            parse_start: 0,
            max_length,
        }
    }

    /// Get the max instruction length.
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Scan `src` for one complete instruction, returning its length.
    ///
    /// Resumes after the last complete element seen by a previous call, so a
    /// slowly arriving instruction is not rescanned from the start.
    fn scan(&mut self, src: &[u8]) -> Result<Option<usize>> {
        let mut pos = self.parse_start;
        while let Some((_, terminator, next)) = read_element(src, pos)? {
            pos = next;
            if terminator == INSTRUCTION_TERMINATOR {
                self.parse_start = 0;
                return Ok(Some(pos));
            }
            self.parse_start = pos;
        }

        if src.len() > self.max_length {
            return Err(TunnelError::Protocol(format!(
                "Instruction too large: {} > {}",
                src.len(),
                self.max_length
            )));
        }
        Ok(None)
    }
}

impl Default for InstructionCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for InstructionCodec {
    type Item = Bytes;
    type Error = TunnelError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.scan(src)? {
            Some(length) => Ok(Some(src.split_to(length).freeze())),
            None => Ok(None),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(TunnelError::Server(
                "incomplete instruction at end of stream".into(),
            )),
        }
    }
}

impl Encoder<Instruction> for InstructionCodec {
    type Error = TunnelError;

    fn encode(&mut self, item: Instruction, dst: &mut BytesMut) -> Result<()> {
        let length = item.encoded_len();
        if length > self.max_length {
            return Err(TunnelError::Protocol(format!(
                "Instruction too large: {} > {}",
                length, self.max_length
            )));
        }
        dst.reserve(length);
        dst.put_slice(&item.to_bytes());
        Ok(())
    }
}

/// Raw chunks are written as-is; they are expected to already be framed.
impl Encoder<Bytes> for InstructionCodec {
    type Error = TunnelError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        dst.reserve(item.len());
        dst.put_slice(&item);
        Ok(())
    }
}
