//! Instruction model
//!
//! An instruction is an opcode followed by an ordered list of arguments. Its
//! wire form is a sequence of length-prefixed elements, opcode first:
//!
//! ```text
//! 6.select,3.vnc;
//! ```

use std::fmt;

use crate::error::{Result, TunnelError};

/// Terminator between two elements of an instruction.
pub const ELEMENT_SEPARATOR: u8 = b',';

/// Terminator after the final element of an instruction.
pub const INSTRUCTION_TERMINATOR: u8 = b';';

/// Separator between an element's length and its content.
pub const LENGTH_SEPARATOR: u8 = b'.';

/// A single protocol instruction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Instruction {
    opcode: String,
    args: Vec<String>,
}

impl Instruction {
    /// Create an instruction from an opcode and its arguments.
    pub fn new<O, I, A>(opcode: O, args: I) -> Self
    where
        O: Into<String>,
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        Self {
            opcode: opcode.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Create an instruction without arguments.
    pub fn bare(opcode: impl Into<String>) -> Self {
        Self {
            opcode: opcode.into(),
            args: Vec::new(),
        }
    }

    /// The instruction used by filters to signal "drop".
    pub fn dropped() -> Self {
        Self::default()
    }

    pub fn opcode(&self) -> &str {
        &self.opcode
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Get an argument by position.
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    /// True if a filter asked for this instruction to be dropped.
    pub fn is_dropped(&self) -> bool {
        self.opcode.is_empty()
    }

    /// Length in bytes of the encoded form.
    pub fn encoded_len(&self) -> usize {
        std::iter::once(&self.opcode)
            .chain(&self.args)
            .map(|e| decimal_width(e.len()) + 1 + e.len() + 1)
            .sum()
    }

    /// Append the wire form of this instruction to `dst`.
    pub fn encode_into(&self, dst: &mut Vec<u8>) {
        dst.reserve(self.encoded_len());
        let mut elements = std::iter::once(&self.opcode).chain(&self.args).peekable();
        while let Some(element) = elements.next() {
            dst.extend_from_slice(element.len().to_string().as_bytes());
            dst.push(LENGTH_SEPARATOR);
            dst.extend_from_slice(element.as_bytes());
            dst.push(if elements.peek().is_some() {
                ELEMENT_SEPARATOR
            } else {
                INSTRUCTION_TERMINATOR
            });
        }
    }

    /// Wire form as bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut out);
        out
    }

    /// Parse exactly one complete instruction.
    ///
    /// Trailing bytes after the terminating `;` are rejected.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let mut elements = Vec::new();
        let mut pos = 0;
        loop {
            let (content, terminator, next) = read_element(raw, pos)?
                .ok_or_else(|| TunnelError::Protocol("incomplete instruction".into()))?;
            let element = std::str::from_utf8(content)
                .map_err(|_| TunnelError::Protocol("element is not valid UTF-8".into()))?;
            elements.push(element.to_string());
            pos = next;
            if terminator == INSTRUCTION_TERMINATOR {
                break;
            }
        }
        if pos != raw.len() {
            return Err(TunnelError::Protocol(
                "trailing data after instruction".into(),
            ));
        }

        let mut elements = elements.into_iter();
        let opcode = elements.next().unwrap_or_default();
        Ok(Self {
            opcode,
            args: elements.collect(),
        })
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Elements are built from Strings, so the wire form is UTF-8.
        f.write_str(&String::from_utf8_lossy(&self.to_bytes()))
    }
}

/// Read the opcode of a complete raw instruction without parsing the rest.
pub fn opcode_of(raw: &[u8]) -> Option<&str> {
    match read_element(raw, 0) {
        Ok(Some((content, _, _))) => std::str::from_utf8(content).ok(),
        _ => None,
    }
}

/// Read one element starting at `pos`.
///
/// Returns the element content, its terminator, and the position after the
/// terminator, or `None` if `buf` ends before the element does.
pub(crate) fn read_element(buf: &[u8], pos: usize) -> Result<Option<(&[u8], u8, usize)>> {
    let mut length: usize = 0;
    let mut i = pos;
    loop {
        let Some(&byte) = buf.get(i) else {
            return Ok(None);
        };
        i += 1;
        match byte {
            b'0'..=b'9' => {
                length = length
                    .checked_mul(10)
                    .and_then(|l| l.checked_add(usize::from(byte - b'0')))
                    .ok_or_else(|| TunnelError::Protocol("element length overflow".into()))?;
            }
            LENGTH_SEPARATOR if i - 1 > pos => break,
            _ => {
                return Err(TunnelError::Protocol(
                    "non-numeric character in element length".into(),
                ));
            }
        }
    }

    let end = i
        .checked_add(length)
        .ok_or_else(|| TunnelError::Protocol("element length overflow".into()))?;
    let Some(&terminator) = buf.get(end) else {
        return Ok(None);
    };
    match terminator {
        ELEMENT_SEPARATOR | INSTRUCTION_TERMINATOR => Ok(Some((&buf[i..end], terminator, end + 1))),
        _ => Err(TunnelError::Protocol(
            "element terminator was neither ';' nor ','".into(),
        )),
    }
}

fn decimal_width(mut n: usize) -> usize {
    let mut width = 1;
    while n >= 10 {
        n /= 10;
        width += 1;
    }
    width
}
