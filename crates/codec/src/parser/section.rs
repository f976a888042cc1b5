use derg_ir::{
    Code, DataMode, DataSegment, Export, ExportDesc, Expr, FuncIdx, Global, GlobalIdx,
    GlobalType, Import, ImportDesc, Local, MemIdx, MemType, TableIdx, TableType, TypeIdx,
    ValType,
};

use super::{byte, fail_with, instr::sequence, ParseWasmBinary, Span, WasmParseError};
use crate::ParseError;

impl<'a> ParseWasmBinary<'a> for ImportDesc {
    fn from_wasm_bytes<E: WasmParseError<'a>>(
        input: Span<'a>,
    ) -> nom::IResult<Span<'a>, Self, E> {
        use nom::combinator::map;

        let (rest, kind) = byte(input)?;
        match kind {
            0x00 => map(TypeIdx::from_wasm_bytes, ImportDesc::Func)(rest),
            0x01 => map(TableType::from_wasm_bytes, ImportDesc::Table)(rest),
            0x02 => map(MemType::from_wasm_bytes, ImportDesc::Mem)(rest),
            0x03 => map(GlobalType::from_wasm_bytes, ImportDesc::Global)(rest),
            _ => fail_with(input, ParseError::BadImportDesc(kind)),
        }
    }
}

impl<'a> ParseWasmBinary<'a> for Import {
    fn from_wasm_bytes<E: WasmParseError<'a>>(
        input: Span<'a>,
    ) -> nom::IResult<Span<'a>, Self, E> {
        use nom::{combinator::map, sequence::tuple};

        map(
            tuple((
                String::from_wasm_bytes,
                String::from_wasm_bytes,
                ImportDesc::from_wasm_bytes,
            )),
            |(module, name, desc)| Import::new(module, name, desc),
        )(input)
    }
}

impl<'a> ParseWasmBinary<'a> for ExportDesc {
    fn from_wasm_bytes<E: WasmParseError<'a>>(
        input: Span<'a>,
    ) -> nom::IResult<Span<'a>, Self, E> {
        use nom::combinator::map;

        let (rest, kind) = byte(input)?;
        match kind {
            0x00 => map(FuncIdx::from_wasm_bytes, ExportDesc::Func)(rest),
            0x01 => map(TableIdx::from_wasm_bytes, ExportDesc::Table)(rest),
            0x02 => map(u32::from_wasm_bytes, |idx| ExportDesc::Mem(MemIdx(idx)))(rest),
            0x03 => map(GlobalIdx::from_wasm_bytes, ExportDesc::Global)(rest),
            _ => fail_with(input, ParseError::BadExportDesc(kind)),
        }
    }
}

impl<'a> ParseWasmBinary<'a> for Export {
    fn from_wasm_bytes<E: WasmParseError<'a>>(
        input: Span<'a>,
    ) -> nom::IResult<Span<'a>, Self, E> {
        use nom::{combinator::map, sequence::tuple};

        map(
            tuple((String::from_wasm_bytes, ExportDesc::from_wasm_bytes)),
            |(name, desc)| Export::new(name, desc),
        )(input)
    }
}

impl<'a> ParseWasmBinary<'a> for Global {
    fn from_wasm_bytes<E: WasmParseError<'a>>(
        input: Span<'a>,
    ) -> nom::IResult<Span<'a>, Self, E> {
        use nom::{combinator::map, sequence::tuple};

        map(
            tuple((GlobalType::from_wasm_bytes, Expr::from_wasm_bytes)),
            |(ty, init)| Global(ty, init),
        )(input)
    }
}

impl<'a> ParseWasmBinary<'a> for Local {
    fn from_wasm_bytes<E: WasmParseError<'a>>(
        input: Span<'a>,
    ) -> nom::IResult<Span<'a>, Self, E> {
        use nom::{combinator::map, sequence::tuple};

        map(
            tuple((u32::from_wasm_bytes, ValType::from_wasm_bytes)),
            |(count, ty)| Local(count, ty),
        )(input)
    }
}

/// A function body: its byte size, local declarations, then instructions.
/// The body must consume exactly the declared size.
impl<'a> ParseWasmBinary<'a> for Code {
    fn from_wasm_bytes<E: WasmParseError<'a>>(
        input: Span<'a>,
    ) -> nom::IResult<Span<'a>, Self, E> {
        use nom::bytes::complete::take;

        let (rest, size) = u32::from_wasm_bytes(input)?;
        let (rest, body) = take(size as usize)(rest)?;

        let (remaining, locals) = Vec::<Local>::from_wasm_bytes(body)?;
        let (remaining, instrs) = sequence(remaining)?;
        if !remaining.is_empty() {
            return fail_with(
                remaining,
                ParseError::SizeMismatch {
                    position: remaining.location_offset(),
                    trailing: remaining.len(),
                },
            );
        }

        Ok((
            rest,
            Code {
                locals: locals.into_boxed_slice(),
                body: instrs.into_boxed_slice(),
            },
        ))
    }
}

impl<'a> ParseWasmBinary<'a> for DataSegment {
    fn from_wasm_bytes<E: WasmParseError<'a>>(
        input: Span<'a>,
    ) -> nom::IResult<Span<'a>, Self, E> {
        let (rest, tag) = u32::from_wasm_bytes(input)?;

        let (rest, mode) = match tag {
            0x00 => {
                let (rest, offset) = Expr::from_wasm_bytes(rest)?;
                (
                    rest,
                    DataMode::Active {
                        mem_idx: MemIdx(0),
                        offset,
                    },
                )
            }
            0x01 => (rest, DataMode::Passive),
            0x02 => {
                let (rest, mem_idx) = u32::from_wasm_bytes(rest)?;
                let (rest, offset) = Expr::from_wasm_bytes(rest)?;
                (
                    rest,
                    DataMode::Active {
                        mem_idx: MemIdx(mem_idx),
                        offset,
                    },
                )
            }
            _ => return fail_with(input, ParseError::BadDataTag(tag)),
        };

        let (rest, bytes) = <Box<[u8]>>::from_wasm_bytes(rest)?;
        Ok((rest, DataSegment { mode, bytes }))
    }
}
