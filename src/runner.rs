//! Inference process abstraction
//!
//! The harness never links the model. It drives an external binary that,
//! given a model artifact, a seed, a thread count and a prompt, appends one
//! generation record to a fixed-name result file. [`InferenceRunner`] is the
//! seam: [`LlamaCliRunner`] spawns the real binary, [`MockRunner`] writes
//! scripted records so the rest of the pipeline can run without a model.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::config::{RunConfig, RESULT_FILE_NAME};
use crate::corpus::Prompt;
use crate::error::{ParityError, Result};
use crate::kernel::KernelId;
use crate::log_format::{LineFormat, TokenSequence};

/// One generation to perform
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    /// Kernel run parameters
    pub run: &'a RunConfig,
    /// Prompt to generate from
    pub prompt: &'a Prompt,
    /// Position of the prompt in the corpus
    pub index: usize,
}

/// Exit information of one inference invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationOutcome {
    /// Process exit code, `None` if killed by a signal
    pub exit_code: Option<i32>,
    /// Last lines of stderr, for diagnostics
    pub stderr_tail: String,
}

impl InvocationOutcome {
    /// Outcome of a clean exit
    #[must_use]
    pub fn ok() -> Self {
        Self {
            exit_code: Some(0),
            stderr_tail: String::new(),
        }
    }

    /// Whether the process exited with status 0
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs one generation for one prompt
///
/// Implementations are stateless between calls: invoking the same
/// request twice must append an identical record.
pub trait InferenceRunner {
    /// Short identifier for logging
    fn name(&self) -> &'static str;

    /// File the runner appends its records to
    ///
    /// The executor counts records here and moves the file into the
    /// results directory once a kernel run is complete.
    fn result_file(&self) -> PathBuf;

    /// Generate for one prompt, appending a record to the result file
    ///
    /// # Errors
    ///
    /// Returns an error only when the process cannot be started at all.
    /// A non-zero exit is reported through the outcome.
    fn generate(&self, request: &GenerationRequest<'_>) -> Result<InvocationOutcome>;
}

/// Escape backslashes and double quotes for the `-p` argument
///
/// The inference binary unescapes its prompt argument, so the escaped
/// form reaches the model as the original text.
#[must_use]
pub fn escape_prompt(prompt: &str) -> String {
    prompt.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Inverse of [`escape_prompt`]
///
/// Backslashes not followed by `\` or `"` are kept literally.
#[must_use]
pub fn unescape_prompt(escaped: &str) -> String {
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(&next) = chars.peek() {
                if next == '\\' || next == '"' {
                    out.push(next);
                    chars.next();
                    continue;
                }
            }
        }
        out.push(c);
    }
    out
}

/// Directory the inference binary appends its result file to, relative to
/// its working directory
pub const BINARY_OUTPUT_DIR: &str = "results";

/// Runner spawning a llama.cpp-style CLI binary
#[derive(Debug, Clone)]
pub struct LlamaCliRunner {
    binary: PathBuf,
    working_dir: Option<PathBuf>,
    output: PathBuf,
}

impl LlamaCliRunner {
    /// Create a runner for the given binary
    #[must_use]
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            working_dir: None,
            output: Path::new(BINARY_OUTPUT_DIR).join(RESULT_FILE_NAME),
        }
    }

    /// Run the binary from this directory (it resolves the result file
    /// relative to its working directory)
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Binary path
    #[must_use]
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Build CLI arguments for one invocation
    #[must_use]
    pub fn build_args(request: &GenerationRequest<'_>) -> Vec<String> {
        let run = request.run;
        vec![
            "-m".to_string(),
            run.model_path.display().to_string(),
            "-b".to_string(),
            "1".to_string(),
            "-t".to_string(),
            run.threads.to_string(),
            "-n".to_string(),
            run.token_budget.to_string(),
            "-ngl".to_string(),
            "0".to_string(),
            "--seed".to_string(),
            run.seed.to_string(),
            "-p".to_string(),
            escape_prompt(request.prompt.as_str()),
        ]
    }
}

fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(n)..].join("\n")
}

impl InferenceRunner for LlamaCliRunner {
    fn name(&self) -> &'static str {
        "llama-cli"
    }

    fn result_file(&self) -> PathBuf {
        match self.working_dir {
            Some(ref dir) => dir.join(&self.output),
            None => self.output.clone(),
        }
    }

    fn generate(&self, request: &GenerationRequest<'_>) -> Result<InvocationOutcome> {
        let args = Self::build_args(request);
        debug!(
            binary = %self.binary.display(),
            kernel = %request.run.kernel,
            index = request.index,
            "spawning inference"
        );

        let mut cmd = Command::new(&self.binary);
        cmd.args(&args);
        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }
        let output = cmd.output().map_err(|e| ParityError::IoError {
            path: self.binary.display().to_string(),
            message: format!("failed to execute inference binary: {e}"),
        })?;

        Ok(InvocationOutcome {
            exit_code: output.status.code(),
            stderr_tail: tail_lines(&String::from_utf8_lossy(&output.stderr), 5),
        })
    }
}

type Script = dyn Fn(KernelId, &Prompt, usize) -> Option<TokenSequence>;

/// Runner that appends scripted records instead of spawning a process
///
/// The script maps `(kernel, prompt, index)` to the tokens to record;
/// `None` simulates a process that emitted nothing.
pub struct MockRunner {
    result_file: PathBuf,
    format: LineFormat,
    script: Box<Script>,
}

impl MockRunner {
    /// Create a mock writing to `result_file`
    pub fn new<F>(result_file: impl Into<PathBuf>, format: LineFormat, script: F) -> Self
    where
        F: Fn(KernelId, &Prompt, usize) -> Option<TokenSequence> + 'static,
    {
        Self {
            result_file: result_file.into(),
            format,
            script: Box::new(script),
        }
    }
}

impl std::fmt::Debug for MockRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRunner")
            .field("result_file", &self.result_file)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

impl InferenceRunner for MockRunner {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn result_file(&self) -> PathBuf {
        self.result_file.clone()
    }

    fn generate(&self, request: &GenerationRequest<'_>) -> Result<InvocationOutcome> {
        let Some(tokens) = (self.script)(request.run.kernel, request.prompt, request.index) else {
            return Ok(InvocationOutcome {
                exit_code: Some(1),
                stderr_tail: "mock: no output".to_string(),
            });
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.result_file)
            .map_err(|e| ParityError::io(&self.result_file, &e))?;
        writeln!(file, "{}", self.format.format_record(&tokens))
            .map_err(|e| ParityError::io(&self.result_file, &e))?;
        Ok(InvocationOutcome::ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_config() -> RunConfig {
        RunConfig {
            kernel: KernelId::I2S,
            threads: 4,
            seed: 0,
            token_budget: 100,
            model_path: PathBuf::from("models/m/ggml-model-i2_s.gguf"),
        }
    }

    #[test]
    fn test_escape_prompt() {
        assert_eq!(escape_prompt("plain"), "plain");
        assert_eq!(escape_prompt(r#"say "hi""#), r#"say \"hi\""#);
        assert_eq!(escape_prompt(r"a\b"), r"a\\b");
        assert_eq!(escape_prompt(r#"\""#), r#"\\\""#);
    }

    #[test]
    fn test_unescape_inverts_escape() {
        for s in [r#"say "hi""#, r"C:\dir\file", r#"\"mixed\\"#, "", "naïve"] {
            assert_eq!(unescape_prompt(&escape_prompt(s)), s);
        }
    }

    #[test]
    fn test_unescape_keeps_unknown_sequences() {
        assert_eq!(unescape_prompt(r"a\nb"), r"a\nb");
        assert_eq!(unescape_prompt("trailing\\"), "trailing\\");
    }

    #[test]
    fn test_build_args_layout() {
        let run = run_config();
        let prompt = Prompt::new(r#"What is "2+2"?"#).unwrap();
        let request = GenerationRequest {
            run: &run,
            prompt: &prompt,
            index: 0,
        };
        let args = LlamaCliRunner::build_args(&request);
        assert_eq!(
            args,
            vec![
                "-m",
                "models/m/ggml-model-i2_s.gguf",
                "-b",
                "1",
                "-t",
                "4",
                "-n",
                "100",
                "-ngl",
                "0",
                "--seed",
                "0",
                "-p",
                r#"What is \"2+2\"?"#,
            ]
        );
    }

    #[test]
    fn test_missing_binary_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let runner = LlamaCliRunner::new(dir.path().join("no-such-llama-cli"));
        let run = run_config();
        let prompt = Prompt::new("hi").unwrap();
        let err = runner
            .generate(&GenerationRequest {
                run: &run,
                prompt: &prompt,
                index: 0,
            })
            .unwrap_err();
        assert!(matches!(err, ParityError::IoError { .. }));
    }

    #[test]
    fn test_mock_runner_appends_records() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("generate_result.txt");
        let runner = MockRunner::new(&log, LineFormat::default(), |_, prompt, _| {
            Some(vec![prompt.as_str().to_string(), "!".to_string()])
        });
        let run = run_config();
        for text in ["a", "b"] {
            let prompt = Prompt::new(text).unwrap();
            let outcome = runner
                .generate(&GenerationRequest {
                    run: &run,
                    prompt: &prompt,
                    index: 0,
                })
                .unwrap();
            assert!(outcome.success());
        }
        let written = std::fs::read_to_string(&log).unwrap();
        assert_eq!(written, "0000<#>a<#>!\n0000<#>b<#>!\n");
    }

    #[test]
    fn test_mock_runner_none_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("generate_result.txt");
        let runner = MockRunner::new(&log, LineFormat::default(), |_, _, _| None);
        let run = run_config();
        let prompt = Prompt::new("x").unwrap();
        let outcome = runner
            .generate(&GenerationRequest {
                run: &run,
                prompt: &prompt,
                index: 0,
            })
            .unwrap();
        assert!(!outcome.success());
        assert!(!log.exists());
    }

    #[test]
    fn test_tail_lines() {
        assert_eq!(tail_lines("a\nb\nc", 2), "b\nc");
        assert_eq!(tail_lines("a", 5), "a");
        assert_eq!(tail_lines("", 5), "");
    }
}
