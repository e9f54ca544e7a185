//! Decode error kinds

use thiserror::Error;

/// Errors raised while decoding SHEF text
///
/// The first five kinds are *recoverable*: in permissive mode the decoder
/// reports them, skips to the next field delimiter, and keeps mining the
/// message. `Io` and `Config` always abort the run.
#[derive(Error, Debug)]
pub enum ShefError {
    /// A token does not match the grammar at the current cursor
    #[error("syntax error: {0}")]
    Syntax(String),

    /// A PE/duration/TS/extremum/qualifier code is not in the registry
    #[error("unknown code: {0}")]
    RegistryMiss(String),

    /// A value token fails numeric parse and is not a recognized sentinel
    #[error("invalid data value: [{0}]")]
    Numeric(String),

    /// A date/time is invalid, or ambiguous across a zone transition
    #[error("invalid date/time: {0}")]
    Time(String),

    /// A required inherited default is missing
    #[error("missing context: {0}")]
    Context(String),

    /// Reading the input or writing the output failed
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Contradictory options or an unusable SHEFPARM override
    #[error("configuration error: {0}")]
    Config(String),

    /// The recoverable-error budget was exhausted
    #[error("maximum number of errors ({0}) exceeded - aborting")]
    TooManyErrors(u32),
}

impl ShefError {
    /// Whether permissive mode may continue past this error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ShefError::Syntax(_)
                | ShefError::RegistryMiss(_)
                | ShefError::Numeric(_)
                | ShefError::Time(_)
                | ShefError::Context(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable() {
        assert!(ShefError::Syntax("x".into()).is_recoverable());
        assert!(ShefError::RegistryMiss("XX".into()).is_recoverable());
        assert!(!ShefError::Config("bad".into()).is_recoverable());
        assert!(!ShefError::TooManyErrors(500).is_recoverable());
    }
}
