//! Result log line format and parser
//!
//! The inference binary appends one line per prompt to its result file.
//! Each non-blank line is a record:
//!
//! ```text
//! <N-char framing prefix><sep><block>{<sep><block>}*
//! ```
//!
//! Blocks are the emitted tokens, trimmed of surrounding whitespace. With
//! the default format the prefix is 4 characters wide and `<sep>` is
//! `<#>`. A record whose prefix is `N` copies of `!` followed by a bare
//! separator marks a prompt that produced no output at all; the executor
//! writes these so later prompts stay aligned with their index.
//!
//! Lines that are too short for the prefix, or whose prefix is not
//! followed by the separator, are rejected rather than guessed at. A tool
//! that splits one generation across several physical lines will surface
//! as a count mismatch downstream.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ParityError, Result};

/// Ordered tokens emitted for one prompt
pub type TokenSequence = Vec<String>;

const FAILURE_FILL: char = '!';
const RECORD_FILL: char = '0';

/// Framing parameters of the result log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineFormat {
    /// Width of the framing prefix in characters
    pub prefix_width: usize,
    /// Block separator token
    pub separator: String,
}

impl Default for LineFormat {
    fn default() -> Self {
        Self {
            prefix_width: 4,
            separator: "<#>".to_string(),
        }
    }
}

/// Outcome of one generation as recorded in the log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Generation {
    /// Tokens emitted for the prompt
    Tokens(TokenSequence),
    /// The inference process emitted nothing for the prompt
    Failed,
}

impl Generation {
    /// Tokens if the generation succeeded
    #[must_use]
    pub fn tokens(&self) -> Option<&[String]> {
        match self {
            Self::Tokens(tokens) => Some(tokens),
            Self::Failed => None,
        }
    }

    /// Whether this entry is a failure record
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl From<Vec<&str>> for Generation {
    fn from(tokens: Vec<&str>) -> Self {
        Self::Tokens(tokens.into_iter().map(str::to_string).collect())
    }
}

/// Per-prompt generations of one kernel, in prompt order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedResult {
    entries: Vec<Generation>,
}

impl ParsedResult {
    /// Build from already-parsed entries
    #[must_use]
    pub fn from_entries(entries: Vec<Generation>) -> Self {
        Self { entries }
    }

    /// Build from plain token lists (no failures)
    #[must_use]
    pub fn from_tokens(sequences: Vec<TokenSequence>) -> Self {
        Self {
            entries: sequences.into_iter().map(Generation::Tokens).collect(),
        }
    }

    /// Number of prompts with a record
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no records were parsed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in prompt order
    pub fn iter(&self) -> std::slice::Iter<'_, Generation> {
        self.entries.iter()
    }

    /// Count of failure records
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.entries.iter().filter(|g| g.is_failed()).count()
    }
}

impl LineFormat {
    /// Create a format with a custom prefix width and separator
    #[must_use]
    pub fn new(prefix_width: usize, separator: &str) -> Self {
        Self {
            prefix_width,
            separator: separator.to_string(),
        }
    }

    /// Reject formats that cannot be parsed unambiguously
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` for a zero-width prefix (failure
    /// records would be indistinguishable from empty generations) or an
    /// empty or whitespace separator.
    pub fn validate(&self) -> Result<()> {
        if self.prefix_width == 0 {
            return Err(ParityError::InvalidConfiguration(
                "log prefix width must be at least 1".to_string(),
            ));
        }
        if self.separator.trim().is_empty() {
            return Err(ParityError::InvalidConfiguration(
                "log separator must contain a non-whitespace character".to_string(),
            ));
        }
        Ok(())
    }

    /// Record line written in place of a missing generation
    #[must_use]
    pub fn failure_record(&self) -> String {
        let mut line: String = std::iter::repeat(FAILURE_FILL)
            .take(self.prefix_width)
            .collect();
        line.push_str(&self.separator);
        line
    }

    /// Render a record line for the given tokens
    ///
    /// Matches what the inference binary writes; used by test runners.
    #[must_use]
    pub fn format_record<S: AsRef<str>>(&self, tokens: &[S]) -> String {
        let mut line: String = std::iter::repeat(RECORD_FILL)
            .take(self.prefix_width)
            .collect();
        for token in tokens {
            line.push_str(&self.separator);
            line.push_str(token.as_ref());
        }
        if tokens.is_empty() {
            line.push_str(&self.separator);
        }
        line
    }

    /// Parse one non-blank record line
    ///
    /// # Errors
    ///
    /// Returns `MalformedLogLine` if the line is shorter than the prefix
    /// or the separator does not follow the prefix.
    pub fn parse_line(&self, line: &str, line_number: usize) -> Result<Generation> {
        let line = line.trim_end_matches(['\r', '\n']);
        let split_at = line
            .char_indices()
            .nth(self.prefix_width)
            .map(|(idx, _)| idx)
            .ok_or_else(|| ParityError::MalformedLogLine {
                line_number,
                reason: format!(
                    "line has {} characters, framing prefix needs {} plus separator",
                    line.chars().count(),
                    self.prefix_width
                ),
            })?;

        let (prefix, rest) = line.split_at(split_at);
        let Some(body) = rest.strip_prefix(self.separator.as_str()) else {
            return Err(ParityError::MalformedLogLine {
                line_number,
                reason: format!(
                    "expected separator '{}' after {}-character prefix",
                    self.separator, self.prefix_width
                ),
            });
        };

        if body.trim().is_empty() {
            if prefix.chars().all(|c| c == FAILURE_FILL) {
                return Ok(Generation::Failed);
            }
            return Ok(Generation::Tokens(Vec::new()));
        }

        let tokens = body
            .split(self.separator.as_str())
            .map(|block| block.trim().to_string())
            .collect();
        Ok(Generation::Tokens(tokens))
    }

    /// Parse a whole log, skipping blank lines
    ///
    /// # Errors
    ///
    /// Propagates the first malformed line.
    pub fn parse_str(&self, text: &str) -> Result<ParsedResult> {
        let mut entries = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(self.parse_line(line, idx + 1)?);
        }
        Ok(ParsedResult { entries })
    }

    /// Read and parse a log file
    ///
    /// Invalid UTF-8 is replaced rather than rejected; the inference binary
    /// may emit partial multi-byte sequences at the token budget cut-off.
    ///
    /// # Errors
    ///
    /// Returns `IoError` if the file cannot be read, or the parse error.
    pub fn parse_file(&self, path: &Path) -> Result<ParsedResult> {
        let bytes = std::fs::read(path).map_err(|e| ParityError::io(path, &e))?;
        self.parse_str(&String::from_utf8_lossy(&bytes))
    }
}

/// Count non-blank lines in a log, treating a missing file as empty
///
/// # Errors
///
/// Returns `IoError` for any read failure other than not-found.
pub fn count_records(path: &Path) -> Result<usize> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes)
            .lines()
            .filter(|line| !line.trim().is_empty())
            .count()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(ParityError::io(path, &e)),
    }
}
