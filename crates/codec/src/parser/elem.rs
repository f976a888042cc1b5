use derg_ir::{ElemKind, ElemMode, ElementSegmentSpec, Expr, FuncIdx, RefType, TableIdx};

use super::{byte, fail_with, ParseWasmBinary, Span, WasmParseError};
use crate::ParseError;

/// The only legal `elemkind` byte stands for funcref.
fn elemkind<'a, E: WasmParseError<'a>>(input: Span<'a>) -> nom::IResult<Span<'a>, RefType, E> {
    let (rest, kind) = byte(input)?;
    if kind != 0x00 {
        return fail_with(input, ParseError::BadElemKind(kind));
    }
    Ok((rest, RefType::FuncRef))
}

fn func_idxs<'a, E: WasmParseError<'a>>(input: Span<'a>) -> nom::IResult<Span<'a>, ElemKind, E> {
    use nom::combinator::map;
    map(Vec::<FuncIdx>::from_wasm_bytes, |xs| {
        ElemKind::Indexes(xs.into_boxed_slice())
    })(input)
}

fn exprs<'a, E: WasmParseError<'a>>(input: Span<'a>) -> nom::IResult<Span<'a>, ElemKind, E> {
    use nom::combinator::map;
    map(Vec::<Expr>::from_wasm_bytes, |xs| {
        ElemKind::Exprs(xs.into_boxed_slice())
    })(input)
}

impl<'a> ParseWasmBinary<'a> for ElementSegmentSpec {
    fn from_wasm_bytes<E: WasmParseError<'a>>(
        input: Span<'a>,
    ) -> nom::IResult<Span<'a>, Self, E> {
        /*
        ┌─── element type+exprs vs element kind + element idx
        │┌── explicit table index (or distinguishes passive from declarative)
        ││┌─ passive or declarative
        ↓↓↓
        000: expr vec<funcidx>                      -> active
        001: elemkind vec<funcidx>                  -> passive
        010: tableidx expr elemkind vec<funcidx>    -> active
        011: elemkind vec<funcidx>                  -> declarative
        100: expr vec<expr>                         -> active
        101: reftype vec<expr>                      -> passive
        110: tableidx expr reftype vec<expr>        -> active
        111: reftype vec<expr>                      -> declarative
        */
        let (rest, flags) = u32::from_wasm_bytes(input)?;
        if flags > 7 {
            return fail_with(input, ParseError::BadElemTag(flags));
        }

        let (rest, mode) = match flags & 0b011 {
            0b000 => {
                let (rest, offset) = Expr::from_wasm_bytes(rest)?;
                (
                    rest,
                    ElemMode::Active {
                        table_idx: TableIdx(0),
                        offset,
                    },
                )
            }
            0b010 => {
                let (rest, table_idx) = TableIdx::from_wasm_bytes(rest)?;
                let (rest, offset) = Expr::from_wasm_bytes(rest)?;
                (rest, ElemMode::Active { table_idx, offset })
            }
            0b001 => (rest, ElemMode::Passive),
            _ => (rest, ElemMode::Declarative),
        };

        let (rest, ty) = match flags {
            0b000 | 0b100 => (rest, RefType::FuncRef),
            0b001..=0b011 => elemkind(rest)?,
            _ => RefType::from_wasm_bytes(rest)?,
        };

        let (rest, kind) = if flags & 0b100 == 0 {
            func_idxs(rest)?
        } else {
            exprs(rest)?
        };

        Ok((
            rest,
            ElementSegmentSpec {
                mode,
                ty,
                kind,
                flags: flags as u8,
            },
        ))
    }
}
