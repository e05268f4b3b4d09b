//! Per-kernel run executor
//!
//! Drives the inference runner once per prompt, strictly in corpus order
//! and one invocation at a time, so the n-th record in the result file
//! belongs to the n-th prompt. Once the loop finishes the shared result
//! file is renamed to a kernel-qualified log.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info, info_span, warn};

use crate::config::{FailurePolicy, HarnessConfig, RunConfig};
use crate::corpus::Prompt;
use crate::error::{ParityError, Result};
use crate::kernel::KernelId;
use crate::log_format::{count_records, LineFormat};
use crate::runner::{GenerationRequest, InferenceRunner};

/// Renamed result log of one kernel run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResultLog {
    /// Kernel that produced the log
    pub kernel: KernelId,
    /// Kernel-qualified log path
    pub path: PathBuf,
    /// Non-blank records in the log
    pub records: usize,
    /// Prompt indices that produced no output block
    pub failed_prompts: Vec<usize>,
}

/// Remove a file, treating a missing file as success
///
/// Returns whether a file was actually removed.
///
/// # Errors
///
/// Returns `IoError` for anything other than not-found.
pub fn remove_if_exists(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no stale file");
            Ok(false)
        },
        Err(e) => Err(ParityError::io(path, &e)),
    }
}

/// Rename `from` to `to`, copying when they sit on different filesystems
fn move_file(from: &Path, to: &Path) -> Result<()> {
    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }
    std::fs::copy(from, to).map_err(|e| ParityError::io(from, &e))?;
    std::fs::remove_file(from).map_err(|e| ParityError::io(from, &e))
}

/// Sequential executor for one kernel at a time
pub struct RunExecutor<'a> {
    runner: &'a dyn InferenceRunner,
    results_dir: PathBuf,
    format: LineFormat,
    policy: FailurePolicy,
}

impl<'a> RunExecutor<'a> {
    /// Create an executor writing under `results_dir`
    pub fn new(
        runner: &'a dyn InferenceRunner,
        results_dir: impl Into<PathBuf>,
        format: LineFormat,
        policy: FailurePolicy,
    ) -> Self {
        Self {
            runner,
            results_dir: results_dir.into(),
            format,
            policy,
        }
    }

    /// Create an executor from the harness configuration
    pub fn from_config(runner: &'a dyn InferenceRunner, config: &HarnessConfig) -> Self {
        Self::new(
            runner,
            config.results_dir.clone(),
            config.line_format.clone(),
            config.failure_policy,
        )
    }

    /// Shared file the runner appends to
    #[must_use]
    pub fn result_file(&self) -> PathBuf {
        self.runner.result_file()
    }

    /// Where a kernel's log ends up
    #[must_use]
    pub fn kernel_log(&self, kernel: KernelId) -> PathBuf {
        self.results_dir.join(kernel.log_file_name())
    }

    /// Run every prompt through one kernel
    ///
    /// # Errors
    ///
    /// Returns `IoError` on filesystem failures or when the runner cannot be
    /// started, and `GenerationFailed` for a missing block under
    /// [`FailurePolicy::Abort`].
    pub fn run(&self, run: &RunConfig, prompts: &[Prompt]) -> Result<RawResultLog> {
        let span = info_span!("kernel_run", kernel = %run.kernel, threads = run.threads);
        let _guard = span.enter();

        std::fs::create_dir_all(&self.results_dir)
            .map_err(|e| ParityError::io(&self.results_dir, &e))?;
        let result_file = self.result_file();
        if let Some(parent) = result_file.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ParityError::io(parent, &e))?;
        }
        let kernel_log = self.kernel_log(run.kernel);
        remove_if_exists(&result_file)?;
        remove_if_exists(&kernel_log)?;

        info!(
            prompts = prompts.len(),
            runner = self.runner.name(),
            model = %run.model_path.display(),
            "starting kernel run"
        );

        let mut records = 0usize;
        let mut failed_prompts = Vec::new();
        for (index, prompt) in prompts.iter().enumerate() {
            let request = GenerationRequest { run, prompt, index };
            let outcome = self.runner.generate(&request)?;
            let after = count_records(&result_file)?;

            if after <= records {
                let reason = format!(
                    "no output block (exit code {:?}) {}",
                    outcome.exit_code, outcome.stderr_tail
                );
                match self.policy {
                    FailurePolicy::Abort => {
                        return Err(ParityError::GenerationFailed {
                            kernel: run.kernel.to_string(),
                            index,
                            reason: reason.trim_end().to_string(),
                        });
                    },
                    FailurePolicy::Diverge => {
                        warn!(index, %reason, "generation missing, recording failure");
                        self.append_failure_record(&result_file)?;
                        failed_prompts.push(index);
                        records += 1;
                    },
                }
                continue;
            }

            if !outcome.success() {
                warn!(
                    index,
                    exit_code = ?outcome.exit_code,
                    "inference exited non-zero but produced output"
                );
            }
            if after > records + 1 {
                warn!(
                    index,
                    lines = after - records,
                    "generation spans several lines; counts will not line up"
                );
            }
            records = after;
            debug!(index, records, "prompt done");
        }

        if result_file.exists() {
            move_file(&result_file, &kernel_log)?;
        } else {
            std::fs::File::create(&kernel_log).map_err(|e| ParityError::io(&kernel_log, &e))?;
        }

        info!(
            records,
            failed = failed_prompts.len(),
            log = %kernel_log.display(),
            "kernel run finished"
        );

        Ok(RawResultLog {
            kernel: run.kernel,
            path: kernel_log,
            records,
            failed_prompts,
        })
    }

    fn append_failure_record(&self, result_file: &Path) -> Result<()> {
        let unterminated = std::fs::read(result_file)
            .map(|bytes| bytes.last().is_some_and(|&b| b != b'\n'))
            .unwrap_or(false);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(result_file)
            .map_err(|e| ParityError::io(result_file, &e))?;
        if unterminated {
            writeln!(file).map_err(|e| ParityError::io(result_file, &e))?;
        }
        writeln!(file, "{}", self.format.failure_record())
            .map_err(|e| ParityError::io(result_file, &e))
    }
}
