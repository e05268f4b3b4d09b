//! Prompt corpus loading
//!
//! A corpus is read once at harness start into an ordered list of
//! single-line prompts. A prompt's position is its identity for the rest
//! of the run: the n-th result record belongs to the n-th prompt.
//!
//! Two strategies are provided behind [`CorpusLoader`]:
//! - [`LineCorpusLoader`]: one prompt per non-blank line of a text file
//! - [`ConversationCorpusLoader`]: first user turn of each record in a
//!   JSON-lines conversational dump, filtered by language and deduplicated

use std::collections::HashSet;
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ParityError, Result};

/// One single-line prompt
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Prompt(String);

impl Prompt {
    /// Create a prompt, rejecting embedded line breaks
    ///
    /// # Errors
    ///
    /// Returns `InvalidPrompt` if the text contains `\n` or `\r`.
    pub fn new(text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        if text.contains(['\n', '\r']) {
            return Err(ParityError::InvalidPrompt {
                reason: format!("embedded line break in {:?}", truncate_for_log(&text)),
            });
        }
        Ok(Self(text))
    }

    /// Prompt text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Length in characters
    #[must_use]
    pub fn char_len(&self) -> usize {
        self.0.chars().count()
    }
}

impl fmt::Display for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Prompt {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn truncate_for_log(text: &str) -> String {
    text.chars().take(40).collect()
}

/// Strategy for turning a corpus source into prompts
pub trait CorpusLoader {
    /// Short identifier for logging
    fn name(&self) -> &'static str;

    /// Load at most `max` prompts from `source`, in source order
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be read or decoded.
    fn load(&self, source: &Path, max: usize) -> Result<Vec<Prompt>>;
}

/// Load exactly `count` prompts
///
/// # Errors
///
/// Returns `EmptyCorpus` for a zero count, `CorpusExhausted` if the source
/// holds fewer usable prompts than requested, or the loader's error.
pub fn load_exact(loader: &dyn CorpusLoader, source: &Path, count: usize) -> Result<Vec<Prompt>> {
    if count == 0 {
        return Err(ParityError::EmptyCorpus);
    }
    let prompts = loader.load(source, count)?;
    if prompts.len() != count {
        return Err(ParityError::CorpusExhausted {
            requested: count,
            available: prompts.len(),
        });
    }
    debug!(
        loader = loader.name(),
        count,
        source = %source.display(),
        "corpus loaded"
    );
    Ok(prompts)
}

fn read_lossy(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).map_err(|e| ParityError::io(path, &e))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// One prompt per non-blank line
///
/// Lines holding a carriage return anywhere but at the end are skipped.
#[derive(Debug, Clone, Default)]
pub struct LineCorpusLoader {
    max_chars: Option<usize>,
}

impl LineCorpusLoader {
    /// Create a loader with no length bound
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip lines longer than `max_chars` characters
    #[must_use]
    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = Some(max_chars);
        self
    }
}

impl CorpusLoader for LineCorpusLoader {
    fn name(&self) -> &'static str {
        "lines"
    }

    fn load(&self, source: &Path, max: usize) -> Result<Vec<Prompt>> {
        let text = read_lossy(source)?;
        let mut prompts = Vec::new();
        for line in text.split('\n') {
            if prompts.len() >= max {
                break;
            }
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.trim().is_empty() {
                continue;
            }
            if line.contains('\r') {
                debug!(line = %truncate_for_log(line), "skipping line with stray carriage return");
                continue;
            }
            let prompt = Prompt::new(line)?;
            if self.max_chars.is_some_and(|limit| prompt.char_len() > limit) {
                continue;
            }
            prompts.push(prompt);
        }
        Ok(prompts)
    }
}

#[derive(Debug, Deserialize)]
struct ConversationRecord {
    #[serde(default)]
    conversation: Vec<ConversationTurn>,
    #[serde(default)]
    language: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConversationTurn {
    role: String,
    content: String,
}

/// First user turn of each JSON-lines conversation record
///
/// Records look like
/// `{"language": "English", "conversation": [{"role": "user", "content": "..."}]}`.
/// Turns spanning several lines are dropped since prompts must be single
/// lines. Duplicate prompts are kept only at their first occurrence.
#[derive(Debug, Clone, Default)]
pub struct ConversationCorpusLoader {
    language: Option<String>,
    max_chars: Option<usize>,
}

impl ConversationCorpusLoader {
    /// Create a loader accepting every language
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep only records tagged with this language (case-insensitive)
    #[must_use]
    pub fn with_language(mut self, language: &str) -> Self {
        self.language = Some(language.to_string());
        self
    }

    /// Skip prompts longer than `max_chars` characters
    #[must_use]
    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = Some(max_chars);
        self
    }

    fn accepts_language(&self, record: &ConversationRecord) -> bool {
        match (&self.language, &record.language) {
            (None, _) => true,
            (Some(wanted), Some(actual)) => wanted.eq_ignore_ascii_case(actual),
            (Some(_), None) => false,
        }
    }
}

impl CorpusLoader for ConversationCorpusLoader {
    fn name(&self) -> &'static str {
        "conversation"
    }

    fn load(&self, source: &Path, max: usize) -> Result<Vec<Prompt>> {
        let text = read_lossy(source)?;
        let mut seen = HashSet::new();
        let mut prompts = Vec::new();

        for (idx, line) in text.lines().enumerate() {
            if prompts.len() >= max {
                break;
            }
            if line.trim().is_empty() {
                continue;
            }
            let record: ConversationRecord = serde_json::from_str(line).map_err(|e| {
                ParityError::Serialization(format!(
                    "{} line {}: {e}",
                    source.display(),
                    idx + 1
                ))
            })?;
            if !self.accepts_language(&record) {
                continue;
            }
            let Some(turn) = record.conversation.iter().find(|t| t.role == "user") else {
                continue;
            };
            let content = turn.content.trim();
            if content.is_empty() || content.contains(['\n', '\r']) {
                continue;
            }
            if self.max_chars.is_some_and(|limit| content.chars().count() > limit) {
                continue;
            }
            if !seen.insert(content.to_string()) {
                continue;
            }
            prompts.push(Prompt::new(content)?);
        }
        Ok(prompts)
    }
}

/// Corpus source format selectable from the CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorpusFormat {
    /// Plain text, one prompt per line
    #[default]
    Lines,
    /// JSON-lines conversational records
    Conversation,
}

impl CorpusFormat {
    /// Build the loader for this format
    ///
    /// `max_chars` drops prompts longer than that many characters.
    #[must_use]
    pub fn loader(&self, language: Option<&str>, max_chars: Option<usize>) -> Box<dyn CorpusLoader> {
        match self {
            Self::Lines => {
                let loader = LineCorpusLoader::new();
                Box::new(match max_chars {
                    Some(limit) => loader.with_max_chars(limit),
                    None => loader,
                })
            },
            Self::Conversation => {
                let mut loader = ConversationCorpusLoader::new();
                if let Some(lang) = language {
                    loader = loader.with_language(lang);
                }
                if let Some(limit) = max_chars {
                    loader = loader.with_max_chars(limit);
                }
                Box::new(loader)
            },
        }
    }
}

impl FromStr for CorpusFormat {
    type Err = ParityError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "lines" | "text" => Ok(Self::Lines),
            "conversation" | "jsonl" => Ok(Self::Conversation),
            other => Err(ParityError::InvalidConfiguration(format!(
                "unknown corpus format '{other}' (expected lines or conversation)"
            ))),
        }
    }
}

/// Persist prompts one per line, unescaped and in order
///
/// # Errors
///
/// Returns `IoError` if the file cannot be written.
pub fn write_prompt_file(path: &Path, prompts: &[Prompt]) -> Result<()> {
    let file = File::create(path).map_err(|e| ParityError::io(path, &e))?;
    let mut writer = BufWriter::new(file);
    for prompt in prompts {
        writeln!(writer, "{prompt}").map_err(|e| ParityError::io(path, &e))?;
    }
    writer.flush().map_err(|e| ParityError::io(path, &e))
}
