//! Error types for the parity harness
//!
//! Every fault the harness detects is fatal at the point of detection.
//! Diverging prompts are findings, not errors, and never appear here.

use std::path::Path;

use thiserror::Error;

/// Result type alias for harness operations
pub type Result<T> = std::result::Result<T, ParityError>;

/// Error type for all harness operations
#[derive(Debug, Error)]
pub enum ParityError {
    /// The corpus holds fewer usable prompts than requested
    #[error("Corpus exhausted: requested {requested} prompts, only {available} available")]
    CorpusExhausted {
        /// Number of prompts requested
        requested: usize,
        /// Number of non-blank prompts found
        available: usize,
    },

    /// Nothing to compare; accuracy is undefined
    #[error("Empty corpus: no prompts to compare")]
    EmptyCorpus,

    /// The two kernel runs produced different result counts
    #[error(
        "Pipeline count mismatch: baseline={baseline} candidate={candidate} prompts={prompts}"
    )]
    PipelineCountMismatch {
        /// Entries parsed from the baseline log
        baseline: usize,
        /// Entries parsed from the candidate log
        candidate: usize,
        /// Prompts submitted to each run
        prompts: usize,
    },

    /// A result log line does not follow the framing format
    #[error("Malformed log line {line_number}: {reason}")]
    MalformedLogLine {
        /// 1-based line number in the log
        line_number: usize,
        /// What was wrong with the line
        reason: String,
    },

    /// Prompt text violates the single-line invariant
    #[error("Invalid prompt: {reason}")]
    InvalidPrompt {
        /// Description of the violation
        reason: String,
    },

    /// Kernel is unknown or not built for this architecture
    #[error("Unsupported kernel '{kernel}' on {arch}")]
    UnsupportedKernel {
        /// Kernel tag as given
        kernel: String,
        /// Architecture name
        arch: String,
    },

    /// Host machine architecture has no kernel table
    #[error("Unsupported architecture: {0}")]
    UnsupportedArchitecture(String),

    /// A prompt produced no output block and the policy is to abort
    #[error("Generation failed for kernel {kernel} at prompt {index}: {reason}")]
    GenerationFailed {
        /// Kernel being run
        kernel: String,
        /// 0-based prompt index
        index: usize,
        /// Failure description
        reason: String,
    },

    /// External conversion or quantization tool failed
    #[error("Tool '{tool}' failed: {reason}")]
    ToolFailed {
        /// Tool name or path
        tool: String,
        /// Failure description
        reason: String,
    },

    /// Filesystem or process I/O failure
    #[error("I/O error at {path}: {message}")]
    IoError {
        /// Path involved in the failing operation
        path: String,
        /// Underlying error message
        message: String,
    },

    /// Harness configuration is inconsistent
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// JSON serialization of a manifest or report failed
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ParityError {
    /// Wrap an `std::io::Error` with the path it occurred on
    pub fn io(path: impl AsRef<Path>, err: &std::io::Error) -> Self {
        Self::IoError {
            path: path.as_ref().display().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for ParityError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corpus_exhausted_display() {
        let err = ParityError::CorpusExhausted {
            requested: 5,
            available: 3,
        };
        assert_eq!(
            err.to_string(),
            "Corpus exhausted: requested 5 prompts, only 3 available"
        );
    }

    #[test]
    fn test_pipeline_mismatch_display() {
        let err = ParityError::PipelineCountMismatch {
            baseline: 4,
            candidate: 5,
            prompts: 5,
        };
        let msg = err.to_string();
        assert!(msg.contains("baseline=4"));
        assert!(msg.contains("candidate=5"));
    }

    #[test]
    fn test_io_helper_keeps_path() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = ParityError::io("results/i2_s.txt", &io);
        match err {
            ParityError::IoError { path, message } => {
                assert_eq!(path, "results/i2_s.txt");
                assert_eq!(message, "gone");
            },
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_from_serde_json() {
        let bad = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: ParityError = bad.into();
        assert!(matches!(err, ParityError::Serialization(_)));
    }
}
