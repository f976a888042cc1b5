use derg_ir::{
    Code, DataSegment, ElementSegmentSpec, Export, FuncIdx, FuncType, Global, Import, MemType,
    Module, ModuleBuilder, TableType, TypeIdx,
};

use super::{fail_with, ParseWasmBinary, Span, WasmParseError};
use crate::ParseError;

const MAGIC: &[u8; 4] = b"\0asm";
const VERSION: u32 = 1;

/// Parse a section payload that must be consumed entirely.
fn whole<'a, T: ParseWasmBinary<'a>, E: WasmParseError<'a>>(
    section: Span<'a>,
) -> Result<T, nom::Err<E>> {
    let (rest, value) = T::from_wasm_bytes(section)?;
    if !rest.is_empty() {
        return fail_with(
            rest,
            ParseError::SizeMismatch {
                position: rest.location_offset(),
                trailing: rest.len(),
            },
        )
        .map(|(_, v)| v);
    }
    Ok(value)
}

macro_rules! vec_section {
    ($builder:ident, $section:ident, $name:ident, $ty:ty) => {
        paste::paste! {
            $builder.[<$name _section>](whole::<Vec<$ty>, E>($section)?)
        }
    };
}

fn header<'a, E: WasmParseError<'a>>(input: Span<'a>) -> nom::IResult<Span<'a>, (), E> {
    use nom::{bytes::complete::take, number::complete::le_u32};

    let (rest, magic) = take(4usize)(input)?;
    if magic.fragment() != MAGIC {
        let mut got = [0u8; 4];
        got.copy_from_slice(magic.fragment());
        return fail_with(input, ParseError::BadMagic(u32::from_be_bytes(got)));
    }

    let at = rest;
    let (rest, version) = le_u32(rest)?;
    if version != VERSION {
        return fail_with(at, ParseError::UnexpectedVersion(version));
    }

    Ok((rest, ()))
}

impl<'a> ParseWasmBinary<'a> for Module {
    fn from_wasm_bytes<E: WasmParseError<'a>>(
        input: Span<'a>,
    ) -> nom::IResult<Span<'a>, Self, E> {
        use nom::{bytes::complete::take, sequence::pair};

        let (mut input, _) = header(input)?;

        let mut builder = ModuleBuilder::new();
        while !input.is_empty() {
            let (rest, (section_id, size)) = pair(super::byte, u32::from_wasm_bytes)(input)?;
            let (rest, section) = take(size as usize)(rest)?;
            input = rest;

            log::debug!(
                "section {section_id} at offset {} ({size} bytes)",
                section.location_offset()
            );

            builder = match section_id {
                0x0 => {
                    let (payload, name) = String::from_wasm_bytes(section)?;
                    builder.custom_section(name, *payload.fragment())
                }
                0x1 => vec_section!(builder, section, type, FuncType),
                0x2 => vec_section!(builder, section, import, Import),
                0x3 => vec_section!(builder, section, function, TypeIdx),
                0x4 => vec_section!(builder, section, table, TableType),
                0x5 => vec_section!(builder, section, memory, MemType),
                0x6 => vec_section!(builder, section, global, Global),
                0x7 => vec_section!(builder, section, export, Export),
                0x8 => builder.start_section(whole::<FuncIdx, E>(section)?),
                0x9 => vec_section!(builder, section, element, ElementSegmentSpec),
                0xa => vec_section!(builder, section, code, Code),
                0xb => vec_section!(builder, section, data, DataSegment),
                0xc => builder.datacount_section(whole::<u32, E>(section)?),
                unknown => {
                    log::warn!("unknown section id {unknown}; keeping it as a custom section");
                    builder.custom_section(unknown.to_string(), *section.fragment())
                }
            };
        }

        match builder.build() {
            Ok(module) => Ok((input, module)),
            Err(err) => fail_with(input, err.into()),
        }
    }
}

#[cfg(test)]
mod test {
    use derg_ir::{ExportDesc, Instr, Limits, ValType};

    use super::*;
    use crate::parse;

    fn section(id: u8, payload: &[u8]) -> Vec<u8> {
        let mut v = vec![id];
        leb128::write::unsigned(&mut v, payload.len() as u64).unwrap();
        v.extend_from_slice(payload);
        v
    }

    fn module(sections: &[Vec<u8>]) -> Vec<u8> {
        let mut v = b"\0asm\x01\0\0\0".to_vec();
        for s in sections {
            v.extend_from_slice(s);
        }
        v
    }

    #[test]
    fn test_empty_module() -> anyhow::Result<()> {
        let module = parse(&module(&[]))?;
        assert!(module.funcs().is_empty());
        assert!(module.start().is_none());
        Ok(())
    }

    #[test]
    fn test_bad_magic() {
        let err = parse(b"\0asn\x01\0\0\0").unwrap_err();
        assert_eq!(err, ParseError::BadMagic(0x0061736e));
    }

    #[test]
    fn test_bad_version() {
        let err = parse(b"\0asm\x02\0\0\0").unwrap_err();
        assert_eq!(err, ParseError::UnexpectedVersion(2));
    }

    #[test]
    fn test_bad_magic_wins_over_sections() {
        let mut bytes = b"wasm\x01\0\0\0".to_vec();
        bytes.extend(section(0x1, &[1, 0x61]));
        assert!(matches!(parse(&bytes), Err(ParseError::BadMagic(_))));
    }

    #[test]
    fn test_custom_sections_round_trip() -> anyhow::Result<()> {
        let module = parse(&module(&[
            section(0x0, b"\x04name\x01\x02\x03"),
            section(0x0, b"\x05extra"),
            section(0x2a, b"\xff\xfe"),
        ]))?;

        let customs: Vec<_> = module.custom_sections().collect();
        assert_eq!(
            customs,
            vec![
                ("name", &[1u8, 2, 3][..]),
                ("extra", &[][..]),
                ("42", &[0xffu8, 0xfe][..]),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_function_module() -> anyhow::Result<()> {
        let module = parse(&module(&[
            // (i32, i32) -> i32
            section(0x1, &[1, 0x60, 2, 0x7f, 0x7f, 1, 0x7f]),
            section(0x3, &[1, 0]),
            section(0x5, &[1, 0x00, 1]),
            section(0x7, b"\x01\x03add\x00\x00"),
            section(0x8, &[0]),
            // local.get 0 local.get 1 i32.add end
            section(0xa, &[1, 7, 0, 0x20, 0, 0x20, 1, 0x6a, 0x0b]),
        ]))?;

        assert_eq!(module.funcs().len(), 1);
        let func = &module.funcs()[0];
        assert_eq!(&*func.ty.params, &[ValType::I32, ValType::I32]);
        let body = func.body.as_ref().expect("defined");
        assert_eq!(body.code.len(), 4);
        assert_eq!(body.code[2], Instr::I32Add);
        assert_eq!(module.memories()[0].0, Limits::Min(1));
        assert_eq!(module.export("add"), Some(&ExportDesc::Func(FuncIdx(0))));
        assert_eq!(module.start(), Some(FuncIdx(0)));
        Ok(())
    }

    #[test]
    fn test_section_size_mismatch() {
        // one type, but the section claims an extra trailing byte
        let err = parse(&module(&[section(0x1, &[1, 0x60, 0, 0, 0xaa])])).unwrap_err();
        assert!(matches!(err, ParseError::SizeMismatch { trailing: 1, .. }));
    }

    #[test]
    fn test_function_without_code() {
        let err = parse(&module(&[
            section(0x1, &[1, 0x60, 0, 0]),
            section(0x3, &[1, 0]),
        ]))
        .unwrap_err();
        assert!(matches!(err, ParseError::Module(_)));
    }
    fn one_function(body: &[u8]) -> Vec<u8> {
        let mut entry = Vec::new();
        leb128::write::unsigned(&mut entry, body.len() as u64).unwrap();
        entry.extend_from_slice(body);
        let mut code = vec![1];
        code.extend(entry);

        module(&[
            section(0x1, &[1, 0x60, 0, 0]),
            section(0x3, &[1, 0]),
            section(0xa, &code),
        ])
    }

    #[test]
    fn test_deeply_nested_blocks() -> anyhow::Result<()> {
        const DEPTH: usize = 100_000;

        let mut body = vec![0];
        for _ in 0..DEPTH {
            body.extend([0x02, 0x40]);
        }
        body.extend(std::iter::repeat(0x0b).take(DEPTH + 1));

        let module = parse(&one_function(&body))?;
        let code = &module.funcs()[0].body.as_ref().expect("defined").code;
        assert_eq!(code.len(), 2 * DEPTH + 1);
        assert_eq!(
            code[DEPTH - 1],
            Instr::Block {
                ty: derg_ir::BlockType::Empty,
                target: DEPTH + 1
            }
        );

        // one end short
        body.pop();
        assert!(parse(&one_function(&body)).is_err());
        Ok(())
    }

    #[test]
    fn test_huge_local_count_is_rejected() {
        // one group of 0xffffffff i64 locals, then end
        let err = parse(&one_function(&[1, 0xff, 0xff, 0xff, 0xff, 0x0f, 0x7e, 0x0b])).unwrap_err();
        assert_eq!(
            err,
            ParseError::Module(derg_ir::ModuleError::TooManyLocals { func: 0 })
        );
    }
}
