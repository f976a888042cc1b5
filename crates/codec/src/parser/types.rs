use derg_ir::{
    BlockType, FuncType, GlobalType, Limits, MemArg, MemType, Mutability, RefType, TableType,
    TypeIdx, ValType,
};

use super::{byte, fail_with, ParseWasmBinary, Span, WasmParseError};
use crate::ParseError;

pub(crate) fn valtype_from_byte(byte: u8) -> Option<ValType> {
    Some(match byte {
        0x7f => ValType::I32,
        0x7e => ValType::I64,
        0x7d => ValType::F32,
        0x7c => ValType::F64,
        0x7b => ValType::V128,
        0x70 => ValType::Ref(RefType::FuncRef),
        0x6f => ValType::Ref(RefType::ExternRef),
        _ => return None,
    })
}

impl<'a> ParseWasmBinary<'a> for ValType {
    fn from_wasm_bytes<E: WasmParseError<'a>>(
        input: Span<'a>,
    ) -> nom::IResult<Span<'a>, Self, E> {
        let (rest, b) = byte(input)?;
        match valtype_from_byte(b) {
            Some(ty) => Ok((rest, ty)),
            None => fail_with(input, ParseError::BadType(b)),
        }
    }
}

impl<'a> ParseWasmBinary<'a> for RefType {
    fn from_wasm_bytes<E: WasmParseError<'a>>(
        input: Span<'a>,
    ) -> nom::IResult<Span<'a>, Self, E> {
        let (rest, b) = byte(input)?;
        match b {
            0x70 => Ok((rest, RefType::FuncRef)),
            0x6f => Ok((rest, RefType::ExternRef)),
            _ => fail_with(input, ParseError::BadType(b)),
        }
    }
}

impl<'a> ParseWasmBinary<'a> for FuncType {
    fn from_wasm_bytes<E: WasmParseError<'a>>(
        input: Span<'a>,
    ) -> nom::IResult<Span<'a>, Self, E> {
        use nom::sequence::tuple;

        let (rest, tag) = byte(input)?;
        if tag != 0x60 {
            return fail_with(input, ParseError::BadTypePrefix(tag));
        }

        let (rest, (params, results)) = tuple((
            Vec::<ValType>::from_wasm_bytes,
            Vec::<ValType>::from_wasm_bytes,
        ))(rest)?;

        Ok((rest, FuncType::new(params, results)))
    }
}

impl<'a> ParseWasmBinary<'a> for Limits {
    fn from_wasm_bytes<E: WasmParseError<'a>>(
        input: Span<'a>,
    ) -> nom::IResult<Span<'a>, Self, E> {
        use nom::{combinator::map, sequence::pair};

        let (rest, flag) = byte(input)?;
        match flag {
            0x00 => map(u32::from_wasm_bytes, Limits::Min)(rest),
            0x01 => map(pair(u32::from_wasm_bytes, u32::from_wasm_bytes), |(lo, hi)| {
                Limits::Range(lo, hi)
            })(rest),
            _ => fail_with(input, ParseError::BadLimitsFlag(flag)),
        }
    }
}

impl<'a> ParseWasmBinary<'a> for MemType {
    fn from_wasm_bytes<E: WasmParseError<'a>>(
        input: Span<'a>,
    ) -> nom::IResult<Span<'a>, Self, E> {
        use nom::combinator::map;
        map(Limits::from_wasm_bytes, MemType)(input)
    }
}

impl<'a> ParseWasmBinary<'a> for TableType {
    fn from_wasm_bytes<E: WasmParseError<'a>>(
        b: Span<'a>,
    ) -> nom::IResult<Span<'a>, Self, E> {
        use nom::{combinator::map, sequence::tuple};
        map(
            tuple((RefType::from_wasm_bytes, Limits::from_wasm_bytes)),
            |(rt, limits)| TableType(rt, limits),
        )(b)
    }
}

impl<'a> ParseWasmBinary<'a> for Mutability {
    fn from_wasm_bytes<E: WasmParseError<'a>>(
        input: Span<'a>,
    ) -> nom::IResult<Span<'a>, Self, E> {
        let (rest, b) = byte(input)?;

        Ok((
            rest,
            match b {
                0x00 => Mutability::Const,
                0x01 => Mutability::Variable,
                _ => return fail_with(input, ParseError::BadMutability(b)),
            },
        ))
    }
}

impl<'a> ParseWasmBinary<'a> for GlobalType {
    fn from_wasm_bytes<E: WasmParseError<'a>>(
        b: Span<'a>,
    ) -> nom::IResult<Span<'a>, Self, E> {
        use nom::{combinator::map, sequence::tuple};
        map(
            tuple((ValType::from_wasm_bytes, Mutability::from_wasm_bytes)),
            |(ty, mutability)| GlobalType(ty, mutability),
        )(b)
    }
}

impl<'a> ParseWasmBinary<'a> for BlockType {
    fn from_wasm_bytes<E: WasmParseError<'a>>(
        input: Span<'a>,
    ) -> nom::IResult<Span<'a>, Self, E> {
        // Block types are a signed 33-bit LEB128. Single byte negative values
        // name a value type by its one-byte encoding.
        let (rest, idx) = i64::from_wasm_bytes(input)?;

        if idx == -0x40 {
            return Ok((rest, BlockType::Empty));
        }

        if idx < 0 {
            let encoded = (idx & 0x7f) as u8;
            return match valtype_from_byte(encoded) {
                Some(ty) if idx >= -0x40 => Ok((rest, BlockType::Val(ty))),
                _ => fail_with(input, ParseError::BadBlockType(idx)),
            };
        }

        if idx > u32::MAX as i64 {
            return fail_with(input, ParseError::BadBlockType(idx));
        }

        Ok((rest, BlockType::TypeIndex(TypeIdx(idx as u32))))
    }
}

impl<'a> ParseWasmBinary<'a> for MemArg {
    fn from_wasm_bytes<E: WasmParseError<'a>>(
        input: Span<'a>,
    ) -> nom::IResult<Span<'a>, Self, E> {
        use nom::{combinator::map, sequence::tuple};

        map(
            tuple((u32::from_wasm_bytes, u32::from_wasm_bytes)),
            |(align, offset)| MemArg(align, offset),
        )(input)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::parser::DecodeFailure;

    fn decode<'a, T: ParseWasmBinary<'a>>(bytes: &'a [u8]) -> Result<T, ParseError> {
        match T::from_wasm_bytes::<DecodeFailure>(Span::new(bytes)) {
            Ok((_, v)) => Ok(v),
            Err(nom::Err::Error(e) | nom::Err::Failure(e)) => Err(e.into()),
            Err(nom::Err::Incomplete(_)) => unreachable!(),
        }
    }

    #[test]
    fn test_read_functype() -> anyhow::Result<()> {
        let ty: FuncType = decode(&[0x60, 2, 0x7f, 0x7e, 1, 0x7c])?;
        assert_eq!(ty, FuncType::new([ValType::I32, ValType::I64], [ValType::F64]));
        Ok(())
    }

    #[test]
    fn test_read_functype_bad_tag() {
        let err = decode::<FuncType>(&[0x61, 0, 0]).unwrap_err();
        assert_eq!(err, ParseError::BadTypePrefix(0x61));
    }

    #[test]
    fn test_read_limits() -> anyhow::Result<()> {
        assert_eq!(decode::<Limits>(&[0x00, 0x10])?, Limits::Min(16));
        assert_eq!(decode::<Limits>(&[0x01, 0x10, 0x20])?, Limits::Range(16, 32));
        assert_eq!(
            decode::<Limits>(&[0x02, 0x10]).unwrap_err(),
            ParseError::BadLimitsFlag(2)
        );
        Ok(())
    }

    #[test]
    fn test_read_tabletype() -> anyhow::Result<()> {
        assert_eq!(
            decode::<TableType>(&[0x70, 0x01, 1, 10])?,
            TableType(RefType::FuncRef, Limits::Range(1, 10))
        );
        assert_eq!(
            decode::<TableType>(&[0x7f, 0x00, 1]).unwrap_err(),
            ParseError::BadType(0x7f)
        );
        Ok(())
    }

    #[test]
    fn test_read_globaltype() -> anyhow::Result<()> {
        assert_eq!(
            decode::<GlobalType>(&[0x7d, 0x00])?,
            GlobalType(ValType::F32, Mutability::Const)
        );
        assert_eq!(
            decode::<GlobalType>(&[0x7d, 0x01])?,
            GlobalType(ValType::F32, Mutability::Variable)
        );
        assert_eq!(
            decode::<GlobalType>(&[0x7d, 0x02]).unwrap_err(),
            ParseError::BadMutability(2)
        );
        Ok(())
    }

    #[test]
    fn test_read_blocktype() -> anyhow::Result<()> {
        assert_eq!(decode::<BlockType>(&[0x40])?, BlockType::Empty);
        assert_eq!(decode::<BlockType>(&[0x7f])?, BlockType::Val(ValType::I32));
        assert_eq!(decode::<BlockType>(&[0x6f])?, BlockType::Val(ValType::Ref(RefType::ExternRef)));
        assert_eq!(decode::<BlockType>(&[0x05])?, BlockType::TypeIndex(TypeIdx(5)));
        assert_eq!(
            decode::<BlockType>(&[0x80, 0x01])?,
            BlockType::TypeIndex(TypeIdx(128))
        );
        Ok(())
    }
}
