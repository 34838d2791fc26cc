use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the binning core.
///
/// Recoverable per-contig and per-string conditions (degenerate coverage,
/// malformed taxonomy strings) are logged and never surface here.
#[derive(Error, Debug)]
pub enum BinError {
    /// Array dimensions are inconsistent with each other.
    #[error("Shape mismatch in {context}: expected {expected}, got {actual}")]
    InputShape {
        context: String,
        expected: usize,
        actual: usize,
    },

    /// A linkage tree is cyclic, disconnected or otherwise inconsistent.
    #[error("Invalid linkage tree: {0}")]
    InvalidTree(String),

    /// Mediod growth did not stabilise within the round budget.
    #[error("Bin {bin} did not converge after {rounds} rounds")]
    NonConvergence { bin: usize, rounds: usize },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse {path:?} line {line}: {message}")]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },
}

impl BinError {
    pub fn shape(context: impl Into<String>, expected: usize, actual: usize) -> Self {
        BinError::InputShape {
            context: context.into(),
            expected,
            actual,
        }
    }

    pub fn parse(path: impl Into<PathBuf>, line: usize, message: impl Into<String>) -> Self {
        BinError::Parse {
            path: path.into(),
            line,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BinError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failure() {
        let e = BinError::shape("weights", 4, 3);
        assert_eq!(e.to_string(), "Shape mismatch in weights: expected 4, got 3");

        let e = BinError::NonConvergence { bin: 7, rounds: 50 };
        assert!(e.to_string().contains("Bin 7"));

        let e = BinError::parse("x.tsv", 3, "bad float");
        assert!(e.to_string().contains("line 3"));
    }
}
