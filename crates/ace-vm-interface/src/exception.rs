use std::fmt;

/// A runtime exception (§7), as distinct from a host/embedding error.
///
/// Raised by [`InstructionHandler`](crate) methods via the per-thread exception
/// flag (§4.6); never unwinds native frames. `Display` renders the `<kind>: <detail>`
/// half of the `unhandled exception: <kind>: <detail>` line the dispatcher prints
/// when an exception escapes every `try`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExceptionKind {
    #[error("NullReference")]
    NullReference,
    #[error("IndexOutOfBounds")]
    IndexOutOfBounds,
    #[error("MemberNotFound")]
    MemberNotFound,
    #[error("NotAnObject")]
    NotAnObject,
    #[error("NotAnArray")]
    NotAnArray,
    #[error("BadIndexType")]
    BadIndexType,
    #[error("NotCallable: cannot invoke type '{0}' as a function")]
    NotCallable(String),
    #[error("InvalidArgs: expected {expected}{} args, got {got}", if *variadic { " (variadic, minimum)" } else { "" })]
    InvalidArgs {
        expected: u8,
        got: u8,
        variadic: bool,
    },
    #[error("DivisionByZero")]
    DivisionByZero,
    #[error("InvalidComparison: cannot compare '{lhs_type}' and '{rhs_type}'")]
    InvalidComparison {
        lhs_type: &'static str,
        rhs_type: &'static str,
    },
    #[error("TypeError: {0}")]
    TypeError(String),
    #[error("HeapOverflow")]
    HeapOverflow,
    #[error("LibraryLoadFailed: {0}")]
    LibraryLoadFailed(String),
    #[error("LibraryFunctionNotFound: {0}")]
    LibraryFunctionNotFound(String),
    #[error("NotImplemented: {0}")]
    NotImplemented(String),
}

impl ExceptionKind {
    /// The stable short name used as the `<kind>` token of the unhandled-exception line.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::NullReference => "NullReference",
            Self::IndexOutOfBounds => "IndexOutOfBounds",
            Self::MemberNotFound => "MemberNotFound",
            Self::NotAnObject => "NotAnObject",
            Self::NotAnArray => "NotAnArray",
            Self::BadIndexType => "BadIndexType",
            Self::NotCallable(_) => "NotCallable",
            Self::InvalidArgs { .. } => "InvalidArgs",
            Self::DivisionByZero => "DivisionByZero",
            Self::InvalidComparison { .. } => "InvalidComparison",
            Self::TypeError(_) => "TypeError",
            Self::HeapOverflow => "HeapOverflow",
            Self::LibraryLoadFailed(_) => "LibraryLoadFailed",
            Self::LibraryFunctionNotFound(_) => "LibraryFunctionNotFound",
            Self::NotImplemented(_) => "NotImplemented",
        }
    }
}

/// Renders the exact `unhandled exception: <kind>: <detail>` line from §7.
pub struct UnhandledExceptionLine<'a>(pub &'a ExceptionKind);

impl fmt::Display for UnhandledExceptionLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unhandled exception: {}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unhandled_line_matches_spec_format() {
        let line = UnhandledExceptionLine(&ExceptionKind::NullReference).to_string();
        assert_eq!(line, "unhandled exception: NullReference");
    }

    #[test]
    fn invalid_args_mentions_variadic() {
        let kind = ExceptionKind::InvalidArgs {
            expected: 2,
            got: 0,
            variadic: true,
        };
        assert!(kind.to_string().contains("variadic"));
    }
}
