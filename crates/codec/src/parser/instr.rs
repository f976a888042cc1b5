use derg_ir::{
    BlockType, DataIdx, ElemIdx, Expr, Flattener, FuncIdx, GlobalIdx, Instr, LabelIdx, LocalIdx,
    MemArg, MemIdx, RefType, SimdImm, TableIdx, TypeIdx, ValType,
};

use super::{
    byte, fail_with, impl_parse_for_newtype, ParseWasmBinary, Span, WasmParseError,
};
use crate::ParseError;

impl_parse_for_newtype!(TypeIdx, u32);
impl_parse_for_newtype!(FuncIdx, u32);
impl_parse_for_newtype!(TableIdx, u32);
impl_parse_for_newtype!(GlobalIdx, u32);
impl_parse_for_newtype!(ElemIdx, u32);
impl_parse_for_newtype!(DataIdx, u32);
impl_parse_for_newtype!(LocalIdx, u32);
impl_parse_for_newtype!(LabelIdx, u32);

/// Memory indices inside instructions are a single reserved byte.
impl<'a> ParseWasmBinary<'a> for MemIdx {
    fn from_wasm_bytes<E: WasmParseError<'a>>(
        input: Span<'a>,
    ) -> nom::IResult<Span<'a>, Self, E> {
        let (input, b) = byte(input)?;
        Ok((input, MemIdx(b as u32)))
    }
}

/// Read a flattened instruction sequence up to and including the `end` that
/// closes it. Targets are absolute from position 0.
pub(crate) fn sequence<'a, E: WasmParseError<'a>>(
    mut input: Span<'a>,
) -> nom::IResult<Span<'a>, Vec<Instr>, E> {
    let mut flat = Flattener::new(0);
    while !flat.is_closed() {
        let at = input;
        let (rest, instr) = Instr::from_wasm_bytes(input)?;
        if flat.push(instr).is_err() {
            return fail_with(
                at,
                ParseError::UnexpectedElse {
                    position: at.location_offset(),
                },
            );
        }
        input = rest;
    }
    Ok((input, flat.into_instrs()))
}

impl<'a> ParseWasmBinary<'a> for Expr {
    fn from_wasm_bytes<E: WasmParseError<'a>>(
        input: Span<'a>,
    ) -> nom::IResult<Span<'a>, Self, E> {
        let (input, instrs) = sequence(input)?;
        Ok((input, Expr(instrs.into_boxed_slice())))
    }
}

/// A single instruction. Structured instructions come back with zeroed
/// targets; [`sequence`] resolves them.
impl<'a> ParseWasmBinary<'a> for Instr {
    fn from_wasm_bytes<E: WasmParseError<'a>>(
        input: Span<'a>,
    ) -> nom::IResult<Span<'a>, Self, E> {
        let (rest, opcode) = byte(input)?;
        plain_instr(input, opcode, rest)
    }
}

fn plain_instr<'a, E: WasmParseError<'a>>(
    at: Span<'a>,
    opcode: u8,
    rest: Span<'a>,
) -> nom::IResult<Span<'a>, Instr, E> {
    if let Some(instr) = numeric_instr(opcode) {
        return Ok((rest, instr));
    }

    match opcode {
        0x00..=0x11 => control_instr(at, opcode, rest),
        0x1a..=0x26 => variable_instr(at, opcode, rest),
        0x28..=0x44 => memory_instr(at, opcode, rest),
        0xd0..=0xd2 => ref_instr(at, opcode, rest),
        0xfc => multibyte_instr(at, rest),
        0xfd => simd_instr(at, rest),
        _ => fail_with(at, ParseError::UnknownOpcode(opcode)),
    }
}

fn control_instr<'a, E: WasmParseError<'a>>(
    at: Span<'a>,
    opcode: u8,
    rest: Span<'a>,
) -> nom::IResult<Span<'a>, Instr, E> {
    use nom::{combinator::map, sequence::tuple};

    match opcode {
        0x00 => Ok((rest, Instr::Unreachable)),
        0x01 => Ok((rest, Instr::Nop)),
        0x02 => map(BlockType::from_wasm_bytes, |ty| Instr::Block { ty, target: 0 })(rest),
        0x03 => map(BlockType::from_wasm_bytes, |ty| Instr::Loop { ty, target: 0 })(rest),
        0x04 => map(BlockType::from_wasm_bytes, |ty| Instr::If {
            ty,
            target: 0,
            else_target: 0,
        })(rest),
        0x05 => Ok((rest, Instr::Else { target: 0 })),
        0x0b => Ok((rest, Instr::End)),
        0x0c => map(LabelIdx::from_wasm_bytes, Instr::Br)(rest),
        0x0d => map(LabelIdx::from_wasm_bytes, Instr::BrIf)(rest),
        0x0e => map(
            tuple((Vec::<LabelIdx>::from_wasm_bytes, LabelIdx::from_wasm_bytes)),
            |(tbl, alt)| Instr::BrTable(tbl.into_boxed_slice(), alt),
        )(rest),
        0x0f => Ok((rest, Instr::Return)),
        0x10 => map(FuncIdx::from_wasm_bytes, Instr::Call)(rest),
        0x11 => map(
            tuple((TypeIdx::from_wasm_bytes, TableIdx::from_wasm_bytes)),
            |(ty, tbl)| Instr::CallIndirect(ty, tbl),
        )(rest),
        _ => fail_with(at, ParseError::UnknownOpcode(opcode)),
    }
}

fn ref_instr<'a, E: WasmParseError<'a>>(
    at: Span<'a>,
    opcode: u8,
    rest: Span<'a>,
) -> nom::IResult<Span<'a>, Instr, E> {
    use nom::combinator::map;

    match opcode {
        0xd0 => map(RefType::from_wasm_bytes, Instr::RefNull)(rest),
        0xd1 => Ok((rest, Instr::RefIsNull)),
        0xd2 => map(FuncIdx::from_wasm_bytes, Instr::RefFunc)(rest),
        _ => fail_with(at, ParseError::UnknownOpcode(opcode)),
    }
}

fn variable_instr<'a, E: WasmParseError<'a>>(
    at: Span<'a>,
    opcode: u8,
    rest: Span<'a>,
) -> nom::IResult<Span<'a>, Instr, E> {
    use nom::combinator::map;

    match opcode {
        0x1a => Ok((rest, Instr::Drop)),
        0x1b => Ok((rest, Instr::Select)),
        0x1c => map(Vec::<ValType>::from_wasm_bytes, |xs| {
            Instr::SelectTyped(xs.into_boxed_slice())
        })(rest),
        0x20 => map(LocalIdx::from_wasm_bytes, Instr::LocalGet)(rest),
        0x21 => map(LocalIdx::from_wasm_bytes, Instr::LocalSet)(rest),
        0x22 => map(LocalIdx::from_wasm_bytes, Instr::LocalTee)(rest),
        0x23 => map(GlobalIdx::from_wasm_bytes, Instr::GlobalGet)(rest),
        0x24 => map(GlobalIdx::from_wasm_bytes, Instr::GlobalSet)(rest),
        0x25 => map(TableIdx::from_wasm_bytes, Instr::TableGet)(rest),
        0x26 => map(TableIdx::from_wasm_bytes, Instr::TableSet)(rest),
        _ => fail_with(at, ParseError::UnknownOpcode(opcode)),
    }
}

fn memory_instr<'a, E: WasmParseError<'a>>(
    at: Span<'a>,
    opcode: u8,
    rest: Span<'a>,
) -> nom::IResult<Span<'a>, Instr, E> {
    use nom::{
        combinator::map,
        number::complete::{le_u32, le_u64},
    };

    let with_memarg: fn(MemArg) -> Instr = match opcode {
        0x28 => Instr::I32Load,
        0x29 => Instr::I64Load,
        0x2a => Instr::F32Load,
        0x2b => Instr::F64Load,
        0x2c => Instr::I32Load8S,
        0x2d => Instr::I32Load8U,
        0x2e => Instr::I32Load16S,
        0x2f => Instr::I32Load16U,
        0x30 => Instr::I64Load8S,
        0x31 => Instr::I64Load8U,
        0x32 => Instr::I64Load16S,
        0x33 => Instr::I64Load16U,
        0x34 => Instr::I64Load32S,
        0x35 => Instr::I64Load32U,
        0x36 => Instr::I32Store,
        0x37 => Instr::I64Store,
        0x38 => Instr::F32Store,
        0x39 => Instr::F64Store,
        0x3a => Instr::I32Store8,
        0x3b => Instr::I32Store16,
        0x3c => Instr::I64Store8,
        0x3d => Instr::I64Store16,
        0x3e => Instr::I64Store32,

        0x3f => return map(MemIdx::from_wasm_bytes, Instr::MemorySize)(rest),
        0x40 => return map(MemIdx::from_wasm_bytes, Instr::MemoryGrow)(rest),
        0x41 => return map(i32::from_wasm_bytes, Instr::I32Const)(rest),
        0x42 => return map(i64::from_wasm_bytes, Instr::I64Const)(rest),
        0x43 => return map(le_u32, Instr::F32Const)(rest),
        0x44 => return map(le_u64, Instr::F64Const)(rest),
        _ => return fail_with(at, ParseError::UnknownOpcode(opcode)),
    };

    map(MemArg::from_wasm_bytes, with_memarg)(rest)
}

fn multibyte_instr<'a, E: WasmParseError<'a>>(
    at: Span<'a>,
    rest: Span<'a>,
) -> nom::IResult<Span<'a>, Instr, E> {
    use nom::{combinator::map, sequence::tuple};

    let (rest, subop) = u32::from_wasm_bytes(rest)?;
    match subop {
        0x00 => Ok((rest, Instr::I32SConvertSatF32)),
        0x01 => Ok((rest, Instr::I32UConvertSatF32)),
        0x02 => Ok((rest, Instr::I32SConvertSatF64)),
        0x03 => Ok((rest, Instr::I32UConvertSatF64)),
        0x04 => Ok((rest, Instr::I64SConvertSatF32)),
        0x05 => Ok((rest, Instr::I64UConvertSatF32)),
        0x06 => Ok((rest, Instr::I64SConvertSatF64)),
        0x07 => Ok((rest, Instr::I64UConvertSatF64)),
        0x08 => map(
            tuple((DataIdx::from_wasm_bytes, MemIdx::from_wasm_bytes)),
            |(data, mem)| Instr::MemoryInit(data, mem),
        )(rest),
        0x09 => map(DataIdx::from_wasm_bytes, Instr::DataDrop)(rest),
        0x0a => map(
            tuple((MemIdx::from_wasm_bytes, MemIdx::from_wasm_bytes)),
            |(to, from)| Instr::MemoryCopy(to, from),
        )(rest),
        0x0b => map(MemIdx::from_wasm_bytes, Instr::MemoryFill)(rest),
        0x0c => map(
            tuple((ElemIdx::from_wasm_bytes, TableIdx::from_wasm_bytes)),
            |(elem, table)| Instr::TableInit(elem, table),
        )(rest),
        0x0d => map(ElemIdx::from_wasm_bytes, Instr::ElemDrop)(rest),
        0x0e => map(
            tuple((TableIdx::from_wasm_bytes, TableIdx::from_wasm_bytes)),
            |(to, from)| Instr::TableCopy(to, from),
        )(rest),
        0x0f => map(TableIdx::from_wasm_bytes, Instr::TableGrow)(rest),
        0x10 => map(TableIdx::from_wasm_bytes, Instr::TableSize)(rest),
        0x11 => map(TableIdx::from_wasm_bytes, Instr::TableFill)(rest),
        _ => fail_with(at, ParseError::UnknownMultibyteOpcode(0xfc, subop)),
    }
}

fn simd_instr<'a, E: WasmParseError<'a>>(
    at: Span<'a>,
    rest: Span<'a>,
) -> nom::IResult<Span<'a>, Instr, E> {
    use nom::{bytes::complete::take, combinator::map, sequence::tuple};

    let (rest, subop) = u32::from_wasm_bytes(rest)?;
    let (rest, imm) = match subop {
        // loads, splat loads, and v128.store
        0x00..=0x0b | 0x5c | 0x5d => map(MemArg::from_wasm_bytes, SimdImm::MemArg)(rest)?,
        0x0c | 0x0d => {
            let (rest, bytes) = take(16usize)(rest)?;
            let mut lanes = [0u8; 16];
            lanes.copy_from_slice(bytes.fragment());
            (
                rest,
                if subop == 0x0c {
                    SimdImm::V128(lanes)
                } else {
                    SimdImm::Shuffle(lanes)
                },
            )
        }
        0x15..=0x22 => map(byte, SimdImm::Lane)(rest)?,
        0x54..=0x5b => map(tuple((MemArg::from_wasm_bytes, byte)), |(arg, lane)| {
            SimdImm::MemArgLane(arg, lane)
        })(rest)?,
        0x0e..=0x14 | 0x23..=0x53 | 0x5e..=0xff => (rest, SimdImm::None),
        _ => return fail_with(at, ParseError::UnknownMultibyteOpcode(0xfd, subop)),
    };

    Ok((rest, Instr::Simd(subop, imm)))
}

fn numeric_instr(opcode: u8) -> Option<Instr> {
    Some(match opcode {
        0x45 => Instr::I32Eqz,
        0x46 => Instr::I32Eq,
        0x47 => Instr::I32Ne,
        0x48 => Instr::I32LtS,
        0x49 => Instr::I32LtU,
        0x4a => Instr::I32GtS,
        0x4b => Instr::I32GtU,
        0x4c => Instr::I32LeS,
        0x4d => Instr::I32LeU,
        0x4e => Instr::I32GeS,
        0x4f => Instr::I32GeU,
        0x50 => Instr::I64Eqz,
        0x51 => Instr::I64Eq,
        0x52 => Instr::I64Ne,
        0x53 => Instr::I64LtS,
        0x54 => Instr::I64LtU,
        0x55 => Instr::I64GtS,
        0x56 => Instr::I64GtU,
        0x57 => Instr::I64LeS,
        0x58 => Instr::I64LeU,
        0x59 => Instr::I64GeS,
        0x5a => Instr::I64GeU,
        0x5b => Instr::F32Eq,
        0x5c => Instr::F32Ne,
        0x5d => Instr::F32Lt,
        0x5e => Instr::F32Gt,
        0x5f => Instr::F32Le,
        0x60 => Instr::F32Ge,
        0x61 => Instr::F64Eq,
        0x62 => Instr::F64Ne,
        0x63 => Instr::F64Lt,
        0x64 => Instr::F64Gt,
        0x65 => Instr::F64Le,
        0x66 => Instr::F64Ge,
        0x67 => Instr::I32Clz,
        0x68 => Instr::I32Ctz,
        0x69 => Instr::I32Popcnt,
        0x6a => Instr::I32Add,
        0x6b => Instr::I32Sub,
        0x6c => Instr::I32Mul,
        0x6d => Instr::I32DivS,
        0x6e => Instr::I32DivU,
        0x6f => Instr::I32RemS,
        0x70 => Instr::I32RemU,
        0x71 => Instr::I32And,
        0x72 => Instr::I32Ior,
        0x73 => Instr::I32Xor,
        0x74 => Instr::I32Shl,
        0x75 => Instr::I32ShrS,
        0x76 => Instr::I32ShrU,
        0x77 => Instr::I32Rol,
        0x78 => Instr::I32Ror,
        0x79 => Instr::I64Clz,
        0x7a => Instr::I64Ctz,
        0x7b => Instr::I64Popcnt,
        0x7c => Instr::I64Add,
        0x7d => Instr::I64Sub,
        0x7e => Instr::I64Mul,
        0x7f => Instr::I64DivS,
        0x80 => Instr::I64DivU,
        0x81 => Instr::I64RemS,
        0x82 => Instr::I64RemU,
        0x83 => Instr::I64And,
        0x84 => Instr::I64Ior,
        0x85 => Instr::I64Xor,
        0x86 => Instr::I64Shl,
        0x87 => Instr::I64ShrS,
        0x88 => Instr::I64ShrU,
        0x89 => Instr::I64Rol,
        0x8a => Instr::I64Ror,
        0x8b => Instr::F32Abs,
        0x8c => Instr::F32Neg,
        0x8d => Instr::F32Ceil,
        0x8e => Instr::F32Floor,
        0x8f => Instr::F32Trunc,
        0x90 => Instr::F32NearestInt,
        0x91 => Instr::F32Sqrt,
        0x92 => Instr::F32Add,
        0x93 => Instr::F32Sub,
        0x94 => Instr::F32Mul,
        0x95 => Instr::F32Div,
        0x96 => Instr::F32Min,
        0x97 => Instr::F32Max,
        0x98 => Instr::F32CopySign,
        0x99 => Instr::F64Abs,
        0x9a => Instr::F64Neg,
        0x9b => Instr::F64Ceil,
        0x9c => Instr::F64Floor,
        0x9d => Instr::F64Trunc,
        0x9e => Instr::F64NearestInt,
        0x9f => Instr::F64Sqrt,
        0xa0 => Instr::F64Add,
        0xa1 => Instr::F64Sub,
        0xa2 => Instr::F64Mul,
        0xa3 => Instr::F64Div,
        0xa4 => Instr::F64Min,
        0xa5 => Instr::F64Max,
        0xa6 => Instr::F64CopySign,
        0xa7 => Instr::I32ConvertI64,
        0xa8 => Instr::I32SConvertF32,
        0xa9 => Instr::I32UConvertF32,
        0xaa => Instr::I32SConvertF64,
        0xab => Instr::I32UConvertF64,
        0xac => Instr::I64SConvertI32,
        0xad => Instr::I64UConvertI32,
        0xae => Instr::I64SConvertF32,
        0xaf => Instr::I64UConvertF32,
        0xb0 => Instr::I64SConvertF64,
        0xb1 => Instr::I64UConvertF64,
        0xb2 => Instr::F32SConvertI32,
        0xb3 => Instr::F32UConvertI32,
        0xb4 => Instr::F32SConvertI64,
        0xb5 => Instr::F32UConvertI64,
        0xb6 => Instr::F32ConvertF64,
        0xb7 => Instr::F64SConvertI32,
        0xb8 => Instr::F64UConvertI32,
        0xb9 => Instr::F64SConvertI64,
        0xba => Instr::F64UConvertI64,
        0xbb => Instr::F64ConvertF32,
        0xbc => Instr::I32ReinterpretF32,
        0xbd => Instr::I64ReinterpretF64,
        0xbe => Instr::F32ReinterpretI32,
        0xbf => Instr::F64ReinterpretI64,
        0xc0 => Instr::I32SExtendI8,
        0xc1 => Instr::I32SExtendI16,
        0xc2 => Instr::I64SExtendI8,
        0xc3 => Instr::I64SExtendI16,
        0xc4 => Instr::I64SExtendI32,
        _ => return None,
    })
}
