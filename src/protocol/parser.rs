//! Push parser for instructions arriving in arbitrary chunks.
//!
//! Unlike the stream reader, the parser never performs I/O: callers push
//! bytes in and pull whole instructions out.

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::error::Result;
use crate::protocol::codec::InstructionCodec;
use crate::protocol::instruction::Instruction;

#[derive(Debug, Default)]
pub struct Parser {
    codec: InstructionCodec,
    buffer: BytesMut,
}

impl Parser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes to the parse buffer.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Next complete instruction, if the buffer holds one.
    pub fn next_instruction(&mut self) -> Result<Option<Instruction>> {
        match self.codec.decode(&mut self.buffer)? {
            Some(raw) => Instruction::parse(&raw).map(Some),
            None => Ok(None),
        }
    }

    /// True if bytes of an unfinished instruction are buffered.
    pub fn has_partial(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Discard any buffered bytes.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.codec = InstructionCodec::with_max_length(self.codec.max_length());
    }
}
