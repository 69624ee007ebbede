//! Instruction filters
//!
//! A filter observes, rewrites, or drops instructions on their way through a
//! socket. Returning [`Instruction::dropped`] (an empty opcode) drops the
//! instruction; returning an error aborts the read or write.

use crate::error::Result;
use crate::protocol::instruction::Instruction;

/// Per-instruction transform applied by filtering readers and writers
pub trait Filter: Send + Sync {
    /// Transform an instruction, or drop it by returning an empty opcode.
    fn filter(&self, instruction: Instruction) -> Result<Instruction>;
}

/// Filter that routes to a closure
pub struct FnFilter<F>
where
    F: Fn(Instruction) -> Result<Instruction> + Send + Sync,
{
    callback: F,
}

impl<F> FnFilter<F>
where
    F: Fn(Instruction) -> Result<Instruction> + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> Filter for FnFilter<F>
where
    F: Fn(Instruction) -> Result<Instruction> + Send + Sync,
{
    fn filter(&self, instruction: Instruction) -> Result<Instruction> {
        (self.callback)(instruction)
    }
}

/// Drops every instruction whose opcode is in the list.
#[derive(Debug, Clone, Default)]
pub struct OpcodeBlocklist {
    opcodes: Vec<String>,
}

impl OpcodeBlocklist {
    pub fn new<I, S>(opcodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            opcodes: opcodes.into_iter().map(Into::into).collect(),
        }
    }
}

impl Filter for OpcodeBlocklist {
    fn filter(&self, instruction: Instruction) -> Result<Instruction> {
        if self.opcodes.iter().any(|o| o == instruction.opcode()) {
            log::debug!("Dropping blocked instruction \"{}\"", instruction.opcode());
            return Ok(Instruction::dropped());
        }
        Ok(instruction)
    }
}
