//! Filtered socket - applies instruction filters to a socket's halves.

use std::sync::Arc;

use crate::io::{FilteredReader, FilteredWriter, InstructionReader, InstructionWriter};
use crate::net::{Link, Socket, SplitSocket};
use crate::protocol::Filter;

/// Socket whose reads and writes may each pass through a filter.
pub struct FilteredSocket {
    inner: SplitSocket,
}

impl FilteredSocket {
    /// Wrap `socket`. A half without a filter is used unchanged.
    pub fn new<S: Socket + 'static>(
        socket: S,
        read_filter: Option<Arc<dyn Filter>>,
        write_filter: Option<Arc<dyn Filter>>,
    ) -> Self {
        let SplitSocket {
            mut reader,
            mut writer,
            link,
        } = Box::new(socket).into_split();

        if let Some(filter) = read_filter {
            reader = Box::new(FilteredReader::new(reader, filter));
        }
        if let Some(filter) = write_filter {
            writer = Box::new(FilteredWriter::new(writer, filter));
        }

        Self {
            inner: SplitSocket::new(reader, writer, link),
        }
    }
}

impl Socket for FilteredSocket {
    fn link(&self) -> &Link {
        self.inner.link()
    }

    fn reader(&mut self) -> &mut dyn InstructionReader {
        self.inner.reader()
    }

    fn writer(&mut self) -> &mut dyn InstructionWriter {
        self.inner.writer()
    }

    fn into_split(self: Box<Self>) -> SplitSocket {
        self.inner
    }
}
