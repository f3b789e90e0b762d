//! Runtime error values.
//!
//! Every fallible operation in the collector returns an [`Error`] value.
//! Errors are never thrown; callers decide whether to recover, retry, or
//! abort. Internal invariant violations are debug assertions instead.

/// Result alias used throughout the runtime.
pub type Result<T> = std::result::Result<T, Error>;

/// The runtime's error taxonomy.
///
/// Each kind carries a stable numeric code so embedders can match on errors
/// across the FFI boundary without string comparison.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Error {
    /// Catch-all for failures with no more precise kind.
    #[error("generic runtime error")]
    Generic,
    /// The requested operation exists but has no implementation yet.
    #[error("operation not implemented")]
    NotImplemented,
    /// The requested operation is not supported by this configuration.
    #[error("operation not supported")]
    NotSupported,
    /// An allocation request could not be satisfied.
    #[error("out of managed memory")]
    OutOfMemory,
    /// An insertion would create a forbidden duplicate.
    #[error("illegal duplicate")]
    IllegalDuplicate,
    /// The operation is invalid in the current lifecycle state, e.g.
    /// initializing an already-initialized collector.
    #[error("invalid state")]
    InvalidState,
    /// A caller-supplied argument is out of range or malformed.
    #[error("invalid argument")]
    InvalidArgument,
    /// A required pointer resolved to null.
    #[error("null pointer")]
    NullPointer,
    /// A lookup (table record, property, registry entry) found nothing.
    #[error("data set not found")]
    DataSetNotFound,
    /// A callback escaped with a panic the runtime had to absorb.
    #[error("uncaught exception in callback")]
    UncaughtException,
}

impl Error {
    /// Stable numeric code of this error kind.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Generic => 1,
            Self::NotImplemented => 2,
            Self::NotSupported => 3,
            Self::OutOfMemory => 4,
            Self::IllegalDuplicate => 5,
            Self::InvalidState => 6,
            Self::InvalidArgument => 7,
            Self::NullPointer => 8,
            Self::DataSetNotFound => 9,
            Self::UncaughtException => 10,
        }
    }

    /// Short identifier of this error kind.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Generic => "Generic",
            Self::NotImplemented => "NotImplemented",
            Self::NotSupported => "NotSupported",
            Self::OutOfMemory => "OutOfMemory",
            Self::IllegalDuplicate => "IllegalDuplicate",
            Self::InvalidState => "InvalidState",
            Self::InvalidArgument => "InvalidArgument",
            Self::NullPointer => "NullPointer",
            Self::DataSetNotFound => "DataSetNotFound",
            Self::UncaughtException => "UncaughtException",
        }
    }

    /// Looks an error kind up by its numeric code.
    #[must_use]
    pub const fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            1 => Self::Generic,
            2 => Self::NotImplemented,
            3 => Self::NotSupported,
            4 => Self::OutOfMemory,
            5 => Self::IllegalDuplicate,
            6 => Self::InvalidState,
            7 => Self::InvalidArgument,
            8 => Self::NullPointer,
            9 => Self::DataSetNotFound,
            10 => Self::UncaughtException,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        for code in 1..=10 {
            let err = Error::from_code(code).unwrap();
            assert_eq!(err.code(), code);
        }
        assert_eq!(Error::from_code(0), None);
        assert_eq!(Error::from_code(99), None);
    }

    #[test]
    fn names_are_stable() {
        assert_eq!(Error::OutOfMemory.name(), "OutOfMemory");
        assert_eq!(Error::DataSetNotFound.name(), "DataSetNotFound");
    }
}
