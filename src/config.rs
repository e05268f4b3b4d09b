//! Harness configuration
//!
//! Built once from the command line and read-only afterwards. Per-kernel
//! [`RunConfig`]s are derived from the single [`HarnessConfig`], so the
//! seed and token budget are shared between both runs by construction.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::arch::{Arch, ToolLayout};
use crate::corpus::CorpusFormat;
use crate::error::{ParityError, Result};
use crate::kernel::{KernelId, ModelFamily};
use crate::log_format::LineFormat;

/// File the inference binary appends its generations to
pub const RESULT_FILE_NAME: &str = "generate_result.txt";
/// Persisted corpus
pub const PROMPT_FILE_NAME: &str = "prompt.txt";
/// Prompts whose generations diverged
pub const WRONG_PROMPT_FILE_NAME: &str = "wrong_prompt.txt";
/// Prompts whose generations matched
pub const RIGHT_PROMPT_FILE_NAME: &str = "right_prompt.txt";
/// Machine-readable comparison report
pub const REPORT_FILE_NAME: &str = "report.json";
/// Snapshot of the configuration used for a run
pub const MANIFEST_FILE_NAME: &str = "harness.json";

/// What to do when a prompt produces no output block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Record a failure entry and classify the prompt as diverging
    #[default]
    Diverge,
    /// Abort the whole harness run
    Abort,
}

impl FailurePolicy {
    /// Get string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Diverge => "diverge",
            Self::Abort => "abort",
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailurePolicy {
    type Err = ParityError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "diverge" => Ok(Self::Diverge),
            "abort" => Ok(Self::Abort),
            other => Err(ParityError::InvalidConfiguration(format!(
                "unknown failure policy '{other}' (expected diverge or abort)"
            ))),
        }
    }
}

/// Which side of the comparison a kernel run is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KernelSlot {
    /// Reference kernel
    Baseline,
    /// Kernel under test
    Candidate,
}

/// Immutable parameters of one kernel run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Kernel being run
    pub kernel: KernelId,
    /// Threads for the inference process
    pub threads: usize,
    /// Sampling seed
    pub seed: u64,
    /// Tokens generated per prompt
    pub token_budget: usize,
    /// GGUF artifact for this kernel
    pub model_path: PathBuf,
}

/// Full harness configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Target architecture
    pub arch: Arch,
    /// Reference kernel
    pub baseline: KernelId,
    /// Kernel under test
    pub candidate: KernelId,
    /// Threads for the baseline run
    pub baseline_threads: usize,
    /// Threads for the candidate run
    pub candidate_threads: usize,
    /// Number of prompts to compare
    pub data_num: usize,
    /// Model family
    pub model: ModelFamily,
    /// Corpus source
    pub prompt_file: PathBuf,
    /// Corpus source format
    pub corpus_format: CorpusFormat,
    /// Language filter for conversational corpora
    pub corpus_language: Option<String>,
    /// Prompts longer than this many characters are skipped
    #[serde(default)]
    pub max_prompt_chars: Option<usize>,
    /// Shared seed
    pub seed: u64,
    /// Tokens generated per prompt
    pub token_num: usize,
    /// Where logs and reports are written
    pub results_dir: PathBuf,
    /// Parent of the per-family model directories
    pub models_root: PathBuf,
    /// Root of the native build (holds `bin/`)
    pub build_dir: PathBuf,
    /// Missing-generation policy
    pub failure_policy: FailurePolicy,
    /// Result log framing
    pub line_format: LineFormat,
}

impl HarnessConfig {
    /// Create a config with the default harness parameters
    #[must_use]
    pub fn new(arch: Arch, baseline: KernelId, candidate: KernelId) -> Self {
        Self {
            arch,
            baseline,
            candidate,
            baseline_threads: 4,
            candidate_threads: 4,
            data_num: 5,
            model: ModelFamily::default(),
            prompt_file: PathBuf::from("./prompt/WildChat-1M.txt"),
            corpus_format: CorpusFormat::default(),
            corpus_language: None,
            max_prompt_chars: None,
            seed: 0,
            token_num: 100,
            results_dir: PathBuf::from("results"),
            models_root: PathBuf::from("./models"),
            build_dir: PathBuf::from("build"),
            failure_policy: FailurePolicy::default(),
            line_format: LineFormat::default(),
        }
    }

    /// Set per-kernel thread counts
    #[must_use]
    pub fn with_threads(mut self, baseline: usize, candidate: usize) -> Self {
        self.baseline_threads = baseline;
        self.candidate_threads = candidate;
        self
    }

    /// Set number of prompts
    #[must_use]
    pub fn with_data_num(mut self, data_num: usize) -> Self {
        self.data_num = data_num;
        self
    }

    /// Set model family
    #[must_use]
    pub fn with_model(mut self, model: ModelFamily) -> Self {
        self.model = model;
        self
    }

    /// Set corpus source
    #[must_use]
    pub fn with_prompt_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.prompt_file = path.into();
        self
    }

    /// Set corpus format and optional language filter
    #[must_use]
    pub fn with_corpus_format(mut self, format: CorpusFormat, language: Option<String>) -> Self {
        self.corpus_format = format;
        self.corpus_language = language;
        self
    }

    /// Bound prompt length in characters
    #[must_use]
    pub fn with_max_prompt_chars(mut self, max_chars: usize) -> Self {
        self.max_prompt_chars = Some(max_chars);
        self
    }

    /// Set shared seed
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set tokens per prompt
    #[must_use]
    pub fn with_token_num(mut self, token_num: usize) -> Self {
        self.token_num = token_num;
        self
    }

    /// Set results directory
    #[must_use]
    pub fn with_results_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.results_dir = dir.into();
        self
    }

    /// Set models root
    #[must_use]
    pub fn with_models_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.models_root = dir.into();
        self
    }

    /// Set build directory
    #[must_use]
    pub fn with_build_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.build_dir = dir.into();
        self
    }

    /// Set missing-generation policy
    #[must_use]
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Set result log framing
    #[must_use]
    pub fn with_line_format(mut self, format: LineFormat) -> Self {
        self.line_format = format;
        self
    }

    /// Check the configuration before anything touches the filesystem
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` for zero counts or thread numbers or
    /// identical kernels, `UnsupportedKernel` for kernels outside the architecture set.
    pub fn validate(&self) -> Result<()> {
        if self.data_num == 0 {
            return Err(ParityError::InvalidConfiguration(
                "data_num must be at least 1".to_string(),
            ));
        }
        if self.token_num == 0 {
            return Err(ParityError::InvalidConfiguration(
                "token_num must be at least 1".to_string(),
            ));
        }
        if self.max_prompt_chars == Some(0) {
            return Err(ParityError::InvalidConfiguration(
                "max_prompt_chars must be at least 1".to_string(),
            ));
        }
        if self.baseline_threads == 0 || self.candidate_threads == 0 {
            return Err(ParityError::InvalidConfiguration(
                "thread counts must be at least 1".to_string(),
            ));
        }
        if self.baseline == self.candidate {
            return Err(ParityError::InvalidConfiguration(format!(
                "baseline and candidate are both {}; their logs would collide",
                self.baseline
            )));
        }
        self.arch.ensure_supported(self.baseline)?;
        self.arch.ensure_supported(self.candidate)?;
        self.line_format.validate()
    }

    /// Kernel assigned to a slot
    #[must_use]
    pub fn kernel(&self, slot: KernelSlot) -> KernelId {
        match slot {
            KernelSlot::Baseline => self.baseline,
            KernelSlot::Candidate => self.candidate,
        }
    }

    /// Derive the run parameters for one side of the comparison
    #[must_use]
    pub fn run_config(&self, slot: KernelSlot) -> RunConfig {
        let kernel = self.kernel(slot);
        let threads = match slot {
            KernelSlot::Baseline => self.baseline_threads,
            KernelSlot::Candidate => self.candidate_threads,
        };
        RunConfig {
            kernel,
            threads,
            seed: self.seed,
            token_budget: self.token_num,
            model_path: self.model_path(kernel),
        }
    }

    /// Directory holding the model family's artifacts
    #[must_use]
    pub fn model_dir(&self) -> PathBuf {
        self.models_root.join(self.model.as_str())
    }

    /// GGUF artifact path for a kernel
    #[must_use]
    pub fn model_path(&self, kernel: KernelId) -> PathBuf {
        self.model_dir().join(kernel.artifact_file_name())
    }

    /// Tool location convention for this host
    #[must_use]
    pub fn tool_layout(&self) -> ToolLayout {
        ToolLayout::for_host(&self.build_dir)
    }

    /// Path of a file inside the results directory
    #[must_use]
    pub fn results_path(&self, file_name: &str) -> PathBuf {
        self.results_dir.join(file_name)
    }

    /// Renamed result log for a kernel
    #[must_use]
    pub fn kernel_log_path(&self, kernel: KernelId) -> PathBuf {
        self.results_dir.join(kernel.log_file_name())
    }

    /// Write the configuration snapshot as pretty JSON
    ///
    /// # Errors
    ///
    /// Returns `Serialization` or `IoError` on failure.
    pub fn write_manifest(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|e| ParityError::io(path, &e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> HarnessConfig {
        HarnessConfig::new(Arch::X86_64, KernelId::I2S, KernelId::Tl2)
    }

    #[test]
    fn test_defaults() {
        let cfg = config();
        assert_eq!(cfg.baseline_threads, 4);
        assert_eq!(cfg.candidate_threads, 4);
        assert_eq!(cfg.data_num, 5);
        assert_eq!(cfg.seed, 0);
        assert_eq!(cfg.token_num, 100);
        assert_eq!(cfg.failure_policy, FailurePolicy::Diverge);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_run_configs_share_seed_and_budget() {
        let cfg = config().with_threads(2, 8).with_seed(42).with_token_num(16);
        let base = cfg.run_config(KernelSlot::Baseline);
        let cand = cfg.run_config(KernelSlot::Candidate);
        assert_eq!(base.seed, cand.seed);
        assert_eq!(base.token_budget, cand.token_budget);
        assert_eq!(base.threads, 2);
        assert_eq!(cand.threads, 8);
        assert_eq!(base.kernel, KernelId::I2S);
        assert_eq!(cand.kernel, KernelId::Tl2);
    }

    #[test]
    fn test_model_path_templated_with_kernel() {
        let cfg = config().with_models_root("/m");
        assert_eq!(
            cfg.run_config(KernelSlot::Candidate).model_path,
            PathBuf::from("/m/bitnet_b1_58-large/ggml-model-tl2.gguf")
        );
    }

    #[test]
    fn test_validate_rejects_zero_counts() {
        assert!(config().with_data_num(0).validate().is_err());
        assert!(config().with_token_num(0).validate().is_err());
        assert!(config().with_threads(0, 4).validate().is_err());
        assert!(config().with_max_prompt_chars(0).validate().is_err());
        assert!(config().with_max_prompt_chars(64).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_foreign_kernel() {
        let cfg = HarnessConfig::new(Arch::X86_64, KernelId::I2S, KernelId::Tl1);
        assert!(matches!(
            cfg.validate(),
            Err(ParityError::UnsupportedKernel { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_same_kernel_twice() {
        let cfg = HarnessConfig::new(Arch::Arm64, KernelId::Tl1, KernelId::Tl1);
        assert!(matches!(
            cfg.validate(),
            Err(ParityError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_validate_checks_line_format() {
        let cfg = config().with_line_format(LineFormat::new(4, ""));
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_failure_policy_parse() {
        assert_eq!(
            "Abort".parse::<FailurePolicy>().unwrap(),
            FailurePolicy::Abort
        );
        assert_eq!(
            "diverge".parse::<FailurePolicy>().unwrap(),
            FailurePolicy::Diverge
        );
        assert!("retry".parse::<FailurePolicy>().is_err());
    }

    #[test]
    fn test_results_paths() {
        let cfg = config().with_results_dir("out");
        assert_eq!(cfg.kernel_log_path(KernelId::I2S), PathBuf::from("out/i2_s.txt"));
        assert_eq!(
            cfg.results_path(RESULT_FILE_NAME),
            PathBuf::from("out/generate_result.txt")
        );
    }

    #[test]
    fn test_manifest_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(MANIFEST_FILE_NAME);
        let cfg = config().with_seed(7);
        cfg.write_manifest(&path).unwrap();
        let back: HarnessConfig =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back, cfg);
    }
}
