pub(crate) mod parser;

use derg_ir::{Module, ModuleError};
use thiserror::Error;

use crate::parser::{DecodeFailure, ParseWasmBinary, Span};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("Bad magic number (expected 0061736DH ('\\0asm'), got {0:X}H")]
    BadMagic(u32),

    #[error("Unexpected version {0}")]
    UnexpectedVersion(u32),

    #[error("Bad type prefix (expected 60H, got {0:X}H)")]
    BadTypePrefix(u8),

    #[error("Bad type (got {0:X}H)")]
    BadType(u8),

    #[error("Bad limits flag (got {0:X}H)")]
    BadLimitsFlag(u8),

    #[error("Bad mutability (got {0:X}H)")]
    BadMutability(u8),

    #[error("Bad block type {0}")]
    BadBlockType(i64),

    #[error("Bad import descriptor type (got {0:X}H)")]
    BadImportDesc(u8),

    #[error("Bad export descriptor type (got {0:X}H)")]
    BadExportDesc(u8),

    #[error("Bad element segment tag {0}")]
    BadElemTag(u32),

    #[error("Bad element kind (got {0:X}H)")]
    BadElemKind(u8),

    #[error("Bad data segment tag {0}")]
    BadDataTag(u32),

    #[error("Unknown opcode {0:X}H")]
    UnknownOpcode(u8),

    #[error("Unknown opcode {0:X}H {1}")]
    UnknownMultibyteOpcode(u8, u32),

    #[error("else outside of an if at position {position}")]
    UnexpectedElse { position: usize },

    #[error("{trailing} unread bytes at position {position}")]
    SizeMismatch { position: usize, trailing: usize },

    #[error("invalid utf-8 name at position {position}")]
    BadUtf8 { position: usize },

    #[error("malformed input at position {position} ({kind:?})")]
    Malformed {
        position: usize,
        kind: nom::error::ErrorKind,
    },

    #[error(transparent)]
    Module(#[from] ModuleError),
}

/// Decode a binary module.
pub fn parse(bytes: &[u8]) -> Result<Module, ParseError> {
    match Module::from_wasm_bytes::<DecodeFailure>(Span::new(bytes)) {
        Ok((_, module)) => Ok(module),
        Err(nom::Err::Error(err) | nom::Err::Failure(err)) => Err(err.into()),
        Err(nom::Err::Incomplete(_)) => Err(ParseError::Malformed {
            position: bytes.len(),
            kind: nom::error::ErrorKind::Eof,
        }),
    }
}
