//! Protocol layer - instructions and their wire format
//!
//! This module provides:
//! - The instruction value type
//! - A tokio codec framing instructions out of a byte stream
//! - A push parser for chunked input
//! - Instruction filters
//! - Status codes and connection configuration

pub mod codec;
pub mod configuration;
pub mod filter;
pub mod instruction;
pub mod parser;
pub mod status;

pub use codec::{DEFAULT_MAX_INSTRUCTION_LENGTH, InstructionCodec};
pub use configuration::{ClientInfo, Configuration, ERROR_MESSAGE_PARAMETER};
pub use filter::{Filter, FnFilter, OpcodeBlocklist};
pub use instruction::{Instruction, opcode_of};
pub use parser::Parser;
pub use status::Status;
