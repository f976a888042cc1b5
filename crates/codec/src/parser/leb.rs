use super::{ParseWasmBinary, Span, WasmParseError};

macro_rules! parse_leb128 {
    ($type:ident, signed) => {
        impl<'a> ParseWasmBinary<'a> for $type {
            fn from_wasm_bytes<E: WasmParseError<'a>>(
                input: Span<'a>,
            ) -> nom::IResult<Span<'a>, Self, E> {
                use nom::{
                    bytes::complete::{take, take_till},
                    combinator::fail,
                };

                let (input, leb_bytes) = take_till(|xs| xs & 0x80 == 0)(input)?;
                let (input, last) = take(1usize)(input)?;

                if leb_bytes.len() + 1 > divrem::DivCeil::div_ceil($type::BITS, 7) as usize {
                    return fail::<_, Self, _>(input);
                }

                let mut result: $type = 0;
                let mut shift = 0;
                for xs in &leb_bytes[..] {
                    result |= ((xs & 0x7f) as $type) << shift;
                    shift += 7;
                }
                result |= ((last[0] & 0x7f) as $type).wrapping_shl(shift);
                shift += 7;
                if shift < $type::BITS && (last[0] & 0x40) == 0x40 {
                    result |= !0 << shift;
                }

                Ok((input, result))
            }
        }
    };

    ($type:ident, unsigned) => {
        impl<'a> ParseWasmBinary<'a> for $type {
            fn from_wasm_bytes<E: WasmParseError<'a>>(
                input: Span<'a>,
            ) -> nom::IResult<Span<'a>, Self, E> {
                use nom::{
                    bytes::complete::{take, take_till},
                    combinator::fail,
                };

                let (input, leb_bytes) = take_till(|xs| xs & 0x80 == 0)(input)?;
                let (input, last) = take(1usize)(input)?;

                if leb_bytes.len() + 1 > divrem::DivCeil::div_ceil($type::BITS, 7) as usize {
                    return fail::<_, Self, _>(input);
                }

                let mut result: $type = 0;
                let mut shift = 0;
                for xs in &leb_bytes[..] {
                    result |= ((xs & 0x7f) as $type) << shift;
                    shift += 7;
                }
                result |= ((last[0] & 0x7f) as $type).wrapping_shl(shift);

                Ok((input, result))
            }
        }
    };
}

parse_leb128!(i32, signed);
parse_leb128!(i64, signed);
parse_leb128!(u32, unsigned);
parse_leb128!(u64, unsigned);

impl<'a> ParseWasmBinary<'a> for f32 {
    fn from_wasm_bytes<E: WasmParseError<'a>>(b: Span<'a>) -> nom::IResult<Span<'a>, Self, E> {
        use nom::number::complete::le_f32;
        le_f32(b)
    }
}

impl<'a> ParseWasmBinary<'a> for f64 {
    fn from_wasm_bytes<E: WasmParseError<'a>>(b: Span<'a>) -> nom::IResult<Span<'a>, Self, E> {
        use nom::number::complete::le_f64;
        le_f64(b)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_read_u32() {
        let mut v = Vec::new();
        leb128::write::unsigned(&mut v, 8082008).unwrap();
        let (rest, v) = u32::from_wasm_bytes::<nom::error::Error<Span>>(Span::new(&v[..])).unwrap();
        assert_eq!(v, 8082008);
        assert_eq!(rest.len(), 0);

        let mut v = Vec::new();
        leb128::write::unsigned(&mut v, u32::MAX as u64).unwrap();
        let (_, v) = u32::from_wasm_bytes::<nom::error::Error<Span>>(Span::new(&v[..])).unwrap();
        assert_eq!(v, u32::MAX);
    }

    #[test]
    fn test_read_u32_too_long() {
        let v = [0x80u8, 0x80, 0x80, 0x80, 0x80, 0x00];
        assert!(u32::from_wasm_bytes::<nom::error::Error<Span>>(Span::new(&v[..])).is_err());
    }

    #[test]
    fn test_read_i32() {
        for expected in [0i32, -1, 63, -64, 64, -65, 8082008, i32::MIN, i32::MAX] {
            let mut v = Vec::new();
            leb128::write::signed(&mut v, expected as i64).unwrap();
            let (rest, got) =
                i32::from_wasm_bytes::<nom::error::Error<Span>>(Span::new(&v[..])).unwrap();
            assert_eq!(got, expected);
            assert_eq!(rest.len(), 0);
        }
    }

    #[test]
    fn test_read_i64() {
        for expected in [0i64, -0x40, i64::MIN, i64::MAX, -123456789012] {
            let mut v = Vec::new();
            leb128::write::signed(&mut v, expected).unwrap();
            let (_, got) =
                i64::from_wasm_bytes::<nom::error::Error<Span>>(Span::new(&v[..])).unwrap();
            assert_eq!(got, expected);
        }
    }

    #[test]
    fn test_read_vec_i64() {
        let mut v = Vec::new();
        leb128::write::unsigned(&mut v, 3).unwrap();
        leb128::write::signed(&mut v, -1).unwrap();
        leb128::write::signed(&mut v, 1).unwrap();
        leb128::write::signed(&mut v, 1 << 40).unwrap();

        let (_, xs) =
            Vec::<i64>::from_wasm_bytes::<nom::error::Error<Span>>(Span::new(&v[..])).unwrap();
        assert_eq!(xs, vec![-1, 1, 1 << 40]);
    }
}
