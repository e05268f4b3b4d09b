//! Token-sequence equivalence checking
//!
//! Two kernels are equivalent on a prompt only if they emitted exactly the
//! same ordered tokens. There is no partial credit: a length difference
//! diverges without looking at the tokens, otherwise the first differing
//! position is reported.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{REPORT_FILE_NAME, RIGHT_PROMPT_FILE_NAME, WRONG_PROMPT_FILE_NAME};
use crate::corpus::{write_prompt_file, Prompt};
use crate::error::{ParityError, Result};
use crate::log_format::{Generation, ParsedResult};

/// Why a prompt diverged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Divergence {
    /// Sequences have different lengths
    LengthMismatch {
        /// Baseline token count
        baseline: usize,
        /// Candidate token count
        candidate: usize,
    },
    /// Same length, different token at `position`
    TokenMismatch {
        /// First differing index
        position: usize,
        /// Baseline token there
        baseline: String,
        /// Candidate token there
        candidate: String,
    },
    /// At least one side produced no output
    GenerationFailed {
        /// Baseline emitted nothing
        baseline: bool,
        /// Candidate emitted nothing
        candidate: bool,
    },
}

/// Classification of one prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", content = "divergence", rename_all = "snake_case")]
pub enum Verdict {
    /// Identical token sequences
    Match,
    /// Sequences differ
    Diverge(Divergence),
}

impl Verdict {
    /// Whether the prompt matched
    #[must_use]
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Match)
    }
}

/// Compare two token sequences
#[must_use]
pub fn compare_sequences<S: AsRef<str>>(baseline: &[S], candidate: &[S]) -> Verdict {
    if baseline.len() != candidate.len() {
        return Verdict::Diverge(Divergence::LengthMismatch {
            baseline: baseline.len(),
            candidate: candidate.len(),
        });
    }
    match baseline
        .iter()
        .zip(candidate)
        .position(|(a, b)| a.as_ref() != b.as_ref())
    {
        None => Verdict::Match,
        Some(position) => Verdict::Diverge(Divergence::TokenMismatch {
            position,
            baseline: baseline[position].as_ref().to_string(),
            candidate: candidate[position].as_ref().to_string(),
        }),
    }
}

/// Compare two recorded generations
///
/// A failed generation never matches, not even another failure.
#[must_use]
pub fn classify(baseline: &Generation, candidate: &Generation) -> Verdict {
    match (baseline.tokens(), candidate.tokens()) {
        (Some(a), Some(b)) => compare_sequences(a, b),
        _ => Verdict::Diverge(Divergence::GenerationFailed {
            baseline: baseline.is_failed(),
            candidate: candidate.is_failed(),
        }),
    }
}

/// Verdict for one prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptVerdict {
    /// Position in the corpus
    pub index: usize,
    /// Prompt text
    pub prompt: Prompt,
    /// Outcome
    pub verdict: Verdict,
}

/// Aggregate comparison outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracyReport {
    /// Prompts compared
    pub total: usize,
    /// Matching prompts
    pub right: usize,
    /// Diverging prompts
    pub wrong: usize,
    /// right / total
    pub accuracy: f64,
    /// Per-prompt verdicts in corpus order
    pub verdicts: Vec<PromptVerdict>,
}

/// Compare two kernels' parsed results prompt by prompt
///
/// Pure function of its inputs.
///
/// # Errors
///
/// Returns `EmptyCorpus` when there is nothing to compare and
/// `PipelineCountMismatch` when either result does not have exactly one
/// entry per prompt.
pub fn compare(
    baseline: &ParsedResult,
    candidate: &ParsedResult,
    prompts: &[Prompt],
) -> Result<AccuracyReport> {
    if baseline.len() != candidate.len() || baseline.len() != prompts.len() {
        return Err(ParityError::PipelineCountMismatch {
            baseline: baseline.len(),
            candidate: candidate.len(),
            prompts: prompts.len(),
        });
    }
    if prompts.is_empty() {
        return Err(ParityError::EmptyCorpus);
    }

    let verdicts: Vec<PromptVerdict> = baseline
        .iter()
        .zip(candidate.iter())
        .zip(prompts)
        .enumerate()
        .map(|(index, ((a, b), prompt))| {
            let verdict = classify(a, b);
            if let Verdict::Diverge(ref why) = verdict {
                debug!(index, ?why, "prompt diverged");
            }
            PromptVerdict {
                index,
                prompt: prompt.clone(),
                verdict,
            }
        })
        .collect();

    let total = verdicts.len();
    let right = verdicts.iter().filter(|v| v.verdict.is_match()).count();
    let wrong = total - right;
    debug_assert_eq!(right + wrong, prompts.len());

    Ok(AccuracyReport {
        total,
        right,
        wrong,
        accuracy: right as f64 / total as f64,
        verdicts,
    })
}

impl AccuracyReport {
    /// Prompts that matched, in corpus order
    #[must_use]
    pub fn right_prompts(&self) -> Vec<Prompt> {
        self.prompts_where(true)
    }

    /// Prompts that diverged, in corpus order
    #[must_use]
    pub fn wrong_prompts(&self) -> Vec<Prompt> {
        self.prompts_where(false)
    }

    fn prompts_where(&self, matched: bool) -> Vec<Prompt> {
        self.verdicts
            .iter()
            .filter(|v| v.verdict.is_match() == matched)
            .map(|v| v.prompt.clone())
            .collect()
    }

    /// Write `wrong_prompt.txt`, `right_prompt.txt` and `report.json`
    ///
    /// # Errors
    ///
    /// Returns `IoError` or `Serialization` on failure.
    pub fn persist(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir).map_err(|e| ParityError::io(dir, &e))?;
        write_prompt_file(&dir.join(WRONG_PROMPT_FILE_NAME), &self.wrong_prompts())?;
        write_prompt_file(&dir.join(RIGHT_PROMPT_FILE_NAME), &self.right_prompts())?;
        let path = dir.join(REPORT_FILE_NAME);
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json).map_err(|e| ParityError::io(&path, &e))
    }
}

impl fmt::Display for AccuracyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "total: {}", self.total)?;
        writeln!(f, "right: {}", self.right)?;
        writeln!(f, "wrong: {}", self.wrong)?;
        write!(f, "accuracy: {}", self.accuracy)
    }
}
