//! Error types for the simulation stack.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by dynamics, controllers, actuators and the trajectory I/O.
///
/// Dimension and index errors are configuration faults: the object that
/// reported them is left exactly as it was before the call.
#[derive(Debug, Error)]
pub enum Error {
    /// A vector does not have the length its owner was configured with.
    #[error("dimension mismatch for {what}: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// What was being set or read.
        what: &'static str,
        /// Configured length.
        expected: usize,
        /// Length that was supplied.
        actual: usize,
    },

    /// A per-channel setter addressed a channel that does not exist.
    #[error("channel index {index} out of range for {len} channels")]
    IndexOutOfRange {
        /// Requested channel.
        index: usize,
        /// Number of channels.
        len: usize,
    },

    /// A matrix that must be inverted is singular or nearly so.
    #[error("singular matrix (determinant {determinant:e})")]
    SingularMatrix {
        /// Determinant of the offending matrix.
        determinant: f64,
    },

    /// A control law was stepped before it had what it needs to act.
    #[error("control unavailable: {0}")]
    ControlUnavailable(&'static str),

    /// A scalar parameter is outside its physical range.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Reading or writing a trajectory or config file failed.
    #[error("i/o error on {path}: {source}")]
    Io {
        /// File being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A trajectory or config file has malformed content.
    #[error("parse error: {0}")]
    Parse(String),
}

impl Error {
    /// Creates a dimension mismatch error.
    #[must_use]
    pub const fn dimension(what: &'static str, expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch {
            what,
            expected,
            actual,
        }
    }

    /// Creates an index out of range error.
    #[must_use]
    pub const fn index(index: usize, len: usize) -> Self {
        Self::IndexOutOfRange { index, len }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Fails with [`Error::DimensionMismatch`] unless `actual == expected`.
pub(crate) fn ensure_len(what: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(Error::dimension(what, expected, actual))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_message_names_both_lengths() {
        let msg = format!("{}", Error::dimension("gains", 3, 2));
        assert!(msg.contains("gains"));
        assert!(msg.contains('3'));
        assert!(msg.contains('2'));
    }

    #[test]
    fn ensure_len_accepts_match_only() {
        assert!(ensure_len("x", 4, 4).is_ok());
        assert!(matches!(
            ensure_len("x", 4, 5),
            Err(Error::DimensionMismatch {
                expected: 4,
                actual: 5,
                ..
            })
        ));
    }

    #[test]
    fn singular_message() {
        let msg = format!("{}", Error::SingularMatrix { determinant: 1e-12 });
        assert!(msg.contains("singular"));
    }
}
