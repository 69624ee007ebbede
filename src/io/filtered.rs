//! Filtering readers and writers
//!
//! Both wrap another reader or writer and pass every instruction through a
//! [`Filter`]. Instructions the filter drops are never seen by the other side.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{Result, TunnelError};
use crate::io::{InstructionReader, InstructionWriter};
use crate::protocol::{Filter, Instruction, Parser};

/// Reader applying a filter to every instruction read.
pub struct FilteredReader {
    inner: Box<dyn InstructionReader>,
    filter: Arc<dyn Filter>,
}

impl FilteredReader {
    pub fn new(inner: Box<dyn InstructionReader>, filter: Arc<dyn Filter>) -> Self {
        Self { inner, filter }
    }
}

#[async_trait]
impl InstructionReader for FilteredReader {
    fn available(&self) -> bool {
        self.inner.available()
    }

    async fn read(&mut self) -> Result<Option<Bytes>> {
        Ok(self
            .read_instruction()
            .await?
            .map(|instruction| Bytes::from(instruction.to_bytes())))
    }

    async fn read_instruction(&mut self) -> Result<Option<Instruction>> {
        while let Some(instruction) = self.inner.read_instruction().await? {
            let filtered = self.filter.filter(instruction)?;
            if !filtered.is_dropped() {
                return Ok(Some(filtered));
            }
        }
        Ok(None)
    }
}

/// Writer applying a filter to every instruction written.
///
/// Raw chunks are parsed back into instructions first, so each chunk must
/// end on an instruction boundary.
pub struct FilteredWriter {
    inner: Box<dyn InstructionWriter>,
    filter: Arc<dyn Filter>,
    parser: Parser,
}

impl FilteredWriter {
    pub fn new(inner: Box<dyn InstructionWriter>, filter: Arc<dyn Filter>) -> Self {
        Self {
            inner,
            filter,
            parser: Parser::new(),
        }
    }

    /// Write every complete instruction currently held by the parser.
    async fn write_parsed(&mut self) -> Result<()> {
        while let Some(instruction) = self.parser.next_instruction()? {
            self.write_instruction(instruction).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl InstructionWriter for FilteredWriter {
    async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        self.parser.push(chunk);
        if let Err(e) = self.write_parsed().await {
            self.parser.reset();
            return Err(e);
        }

        if self.parser.has_partial() {
            self.parser.reset();
            return Err(TunnelError::Protocol(
                "Filtered write contained an incomplete instruction.".into(),
            ));
        }
        Ok(())
    }

    async fn write_instruction(&mut self, instruction: Instruction) -> Result<()> {
        let filtered = self.filter.filter(instruction)?;
        if filtered.is_dropped() {
            return Ok(());
        }
        self.inner.write_instruction(filtered).await
    }
}
