use nom::error::{ErrorKind, FromExternalError};
use nom_locate::LocatedSpan;
use std::fmt::Debug;

use crate::ParseError;

pub(crate) mod elem;
pub(crate) mod instr;
pub(crate) mod leb;
pub(crate) mod module;
pub(crate) mod section;
pub(crate) mod types;

pub(crate) type Span<'a> = LocatedSpan<&'a [u8]>;

/// Every parser is generic over the nom error type, but must be able to carry
/// a [`ParseError`] out of the combinator stack.
pub(crate) trait WasmParseError<'a>:
    Debug + nom::error::ParseError<Span<'a>> + FromExternalError<Span<'a>, ParseError>
{
}

impl<'a, T> WasmParseError<'a> for T where
    T: Debug + nom::error::ParseError<Span<'a>> + FromExternalError<Span<'a>, ParseError>
{
}

pub(crate) trait ParseWasmBinary<'a>: Sized {
    fn from_wasm_bytes<E: WasmParseError<'a>>(b: Span<'a>) -> nom::IResult<Span<'a>, Self, E>;
}

/// Abort the parse with a decode error. Failures are not backtracked over.
pub(crate) fn fail_with<'a, T, E: WasmParseError<'a>>(
    input: Span<'a>,
    err: ParseError,
) -> nom::IResult<Span<'a>, T, E> {
    Err(nom::Err::Failure(E::from_external_error(
        input,
        ErrorKind::Verify,
        err,
    )))
}

pub(crate) fn byte<'a, E: WasmParseError<'a>>(input: Span<'a>) -> nom::IResult<Span<'a>, u8, E> {
    use nom::bytes::complete::take;
    let (input, xs) = take(1usize)(input)?;
    Ok((input, xs[0]))
}

macro_rules! impl_parse_for_newtype {
    ($type:ident, $innertype:ident) => {
        impl<'a> ParseWasmBinary<'a> for $type {
            fn from_wasm_bytes<E: WasmParseError<'a>>(
                input: Span<'a>,
            ) -> nom::IResult<Span<'a>, Self, E> {
                use nom::combinator::map;
                map($innertype::from_wasm_bytes, $type)(input)
            }
        }
    };
}
pub(crate) use impl_parse_for_newtype;

impl<'a, T: Debug + ParseWasmBinary<'a>> ParseWasmBinary<'a> for Vec<T> {
    fn from_wasm_bytes<E: WasmParseError<'a>>(b: Span<'a>) -> nom::IResult<Span<'a>, Self, E> {
        let (mut rest, sz) = <u32 as ParseWasmBinary>::from_wasm_bytes(b)?;
        // Cap the preallocation; a count is only a claim until the items parse.
        let mut v = Vec::with_capacity((sz as usize).min(rest.len()));
        for _ in 0..sz {
            let (r, item) = <T as ParseWasmBinary>::from_wasm_bytes(rest)?;
            v.push(item);
            rest = r;
        }
        Ok((rest, v))
    }
}

impl<'a> ParseWasmBinary<'a> for Box<[u8]> {
    fn from_wasm_bytes<E: WasmParseError<'a>>(
        input: Span<'a>,
    ) -> nom::IResult<Span<'a>, Self, E> {
        use nom::bytes::complete::take;
        let (input, sz) = <u32 as ParseWasmBinary>::from_wasm_bytes(input)?;
        let (input, span) = take(sz as usize)(input)?;
        Ok((input, (*span.fragment()).into()))
    }
}

impl<'a> ParseWasmBinary<'a> for String {
    fn from_wasm_bytes<E: WasmParseError<'a>>(
        input: Span<'a>,
    ) -> nom::IResult<Span<'a>, Self, E> {
        use nom::bytes::complete::take;
        let (rest, sz) = <u32 as ParseWasmBinary>::from_wasm_bytes(input)?;
        let (rest, span) = take(sz as usize)(rest)?;
        let Ok(xs) = std::str::from_utf8(span.fragment()) else {
            return fail_with(input, ParseError::BadUtf8 {
                position: input.location_offset(),
            });
        };

        Ok((rest, xs.to_string()))
    }
}

/// The error type used by [`crate::parse`]. It remembers the first decode
/// error raised, or the nom error kind and position otherwise.
#[derive(Debug)]
pub(crate) struct DecodeFailure {
    pub(crate) position: usize,
    pub(crate) kind: ErrorKind,
    pub(crate) error: Option<ParseError>,
}

impl<'a> nom::error::ParseError<Span<'a>> for DecodeFailure {
    fn from_error_kind(input: Span<'a>, kind: ErrorKind) -> Self {
        Self {
            position: input.location_offset(),
            kind,
            error: None,
        }
    }

    fn append(_input: Span<'a>, _kind: ErrorKind, other: Self) -> Self {
        other
    }
}

impl<'a> FromExternalError<Span<'a>, ParseError> for DecodeFailure {
    fn from_external_error(input: Span<'a>, kind: ErrorKind, e: ParseError) -> Self {
        Self {
            position: input.location_offset(),
            kind,
            error: Some(e),
        }
    }
}

impl From<DecodeFailure> for ParseError {
    fn from(value: DecodeFailure) -> Self {
        let DecodeFailure {
            position,
            kind,
            error,
        } = value;

        error.unwrap_or(ParseError::Malformed { position, kind })
    }
}
