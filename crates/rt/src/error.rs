use derg_codec::ParseError;
use thiserror::Error;

/// The single fatal error kind. A trap unwinds the whole top-level
/// invocation back to the embedder.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct Trap {
    message: String,
}

impl Trap {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<ParseError> for Trap {
    fn from(value: ParseError) -> Self {
        Trap::new(value.to_string())
    }
}

/// Everything that can stop a running frame chain.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecError {
    #[error(transparent)]
    Trap(#[from] Trap),

    /// The guest asked to exit the process with the given code.
    #[error("exit({0})")]
    Exit(i32),

    /// Non-local jump back to the nearest call trampoline.
    #[error("longjmp")]
    Longjmp,
}

impl ExecError {
    pub fn as_trap(&self) -> Option<&Trap> {
        match self {
            ExecError::Trap(trap) => Some(trap),
            _ => None,
        }
    }
}

/// Build a [`Trap`] from a format string.
macro_rules! trap {
    ($($arg:tt)*) => {
        $crate::error::Trap::new(format!($($arg)*))
    };
}
pub(crate) use trap;

/// Return early with a [`Trap`], converted into the function's error type.
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::error::trap!($($arg)*).into())
    };
}
pub(crate) use bail;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_trap_from_parse_error() {
        let trap = Trap::from(ParseError::UnexpectedVersion(2));
        assert_eq!(trap.message(), "Unexpected version 2");
    }

    #[test]
    fn test_bail_converts() {
        fn fails() -> Result<(), ExecError> {
            bail!("undefined element {}", 3);
        }

        let err = fails().unwrap_err();
        assert_eq!(err.as_trap().map(Trap::message), Some("undefined element 3"));
    }
}
