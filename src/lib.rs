//! # Kernel Parity
//!
//! Deterministic equivalence testing for quantized inference kernels.
//!
//! The same prompts are run through two kernels with an identical seed and
//! token budget. Any difference in the emitted token sequences is a kernel
//! bug, so the harness reports, per prompt, whether the two kernels agreed
//! exactly and where they first diverged.
//!
//! ## Pipeline
//!
//! 1. Reset the model directory and build both kernels' artifacts
//!    ([`artifacts`])
//! 2. Load N prompts from the corpus ([`corpus`])
//! 3. Run every prompt through the baseline, then the candidate
//!    ([`executor`], [`runner`])
//! 4. Parse both result logs ([`log_format`])
//! 5. Compare them prompt by prompt ([`compare`])
//!
//! [`harness::Harness`] drives the whole sequence.
//!
//! ## Example
//!
//! ```rust
//! use kernel_parity::compare::compare;
//! use kernel_parity::corpus::Prompt;
//! use kernel_parity::log_format::LineFormat;
//!
//! let format = LineFormat::default();
//! let a = format.parse_str("0000<#>Hello<#>there\n0000<#>Blue\n").unwrap();
//! let b = format.parse_str("0000<#>Hello<#>there\n0000<#>Red\n").unwrap();
//! let prompts = vec![Prompt::new("Hi").unwrap(), Prompt::new("Color?").unwrap()];
//!
//! let report = compare(&a, &b, &prompts).unwrap();
//! assert_eq!(report.right, 1);
//! assert_eq!(report.accuracy, 0.5);
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
// Clippy allows (MUST come after deny/warn to override them)
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)] // usize -> f64 for accuracy
#![allow(clippy::must_use_candidate)] // Not all methods need #[must_use]
#![allow(clippy::doc_markdown)] // Allow technical terms without backticks
#![allow(clippy::uninlined_format_args)] // Prefer explicit format args
#![allow(clippy::missing_panics_doc)] // Allow missing Panics doc sections
#![allow(clippy::float_cmp)] // Exact accuracy values in tests

/// CPU architectures and their kernel sets
pub mod arch;
/// Model artifact preparation
pub mod artifacts;
/// CLI command implementations (extracted for testability)
pub mod cli;
/// Token-sequence equivalence checking
pub mod compare;
/// Harness configuration
pub mod config;
/// Prompt corpus loading
pub mod corpus;
/// Error types
pub mod error;
/// Per-kernel run executor
pub mod executor;
/// Dual-kernel comparison driver
pub mod harness;
/// Kernel identifiers
pub mod kernel;
/// Result log framing and parsing
pub mod log_format;
/// External inference process
pub mod runner;

// Re-exports for convenience
pub use error::{ParityError, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(VERSION.starts_with("0."));
        assert!(VERSION.contains('.'));
    }
}
