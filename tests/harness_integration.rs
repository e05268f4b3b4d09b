//! End-to-end harness runs with scripted inference and artifact builders
//!
//! No native tools are spawned: the mock runner appends framed records to
//! the result file exactly like the inference binary, and the mock builder
//! just touches the artifact files.

use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};

use kernel_parity::arch::Arch;
use kernel_parity::artifacts::{ArtifactBuilder, ModelWorkspace};
use kernel_parity::config::{FailurePolicy, HarnessConfig, RESULT_FILE_NAME};
use kernel_parity::corpus::Prompt;
use kernel_parity::harness::Harness;
use kernel_parity::kernel::KernelId;
use kernel_parity::log_format::{LineFormat, TokenSequence};
use kernel_parity::runner::{GenerationRequest, InferenceRunner, InvocationOutcome, MockRunner};
use kernel_parity::{ParityError, Result};
use tempfile::TempDir;

// ============================================================================
// FIXTURES
// ============================================================================

struct Fixture {
    _dir: TempDir,
    config: HarnessConfig,
}

impl Fixture {
    fn new(corpus: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let model_dir = root.join("models").join("bitnet_b1_58-large");
        std::fs::create_dir_all(&model_dir).unwrap();
        std::fs::write(model_dir.join("ggml-model-i2_s.gguf"), b"stale").unwrap();
        std::fs::write(model_dir.join("config.json"), b"{}").unwrap();
        std::fs::write(root.join("corpus.txt"), corpus).unwrap();

        let config = HarnessConfig::new(Arch::X86_64, KernelId::I2S, KernelId::Tl2)
            .with_data_num(3)
            .with_prompt_file(root.join("corpus.txt"))
            .with_models_root(root.join("models"))
            .with_results_dir(root.join("results"));
        Self { _dir: dir, config }
    }

    fn results(&self) -> &Path {
        &self.config.results_dir
    }

    fn read_result(&self, name: &str) -> String {
        std::fs::read_to_string(self.results().join(name)).unwrap()
    }
}

const CORPUS: &str = "Hello\n\n2+2=?\nName a color\nUnused tail prompt\n";

#[derive(Default)]
struct TouchBuilder {
    built: RefCell<Vec<KernelId>>,
    fail_on: Option<KernelId>,
}

impl ArtifactBuilder for TouchBuilder {
    fn build(&self, workspace: &ModelWorkspace, kernel: KernelId) -> Result<()> {
        self.built.borrow_mut().push(kernel);
        if self.fail_on == Some(kernel) {
            return Err(ParityError::ToolFailed {
                tool: "llama-quantize".to_string(),
                reason: "exited with exit status: 1".to_string(),
            });
        }
        std::fs::write(workspace.artifact_path(kernel), b"gguf").unwrap();
        Ok(())
    }
}

struct CountingRunner {
    inner: MockRunner,
    calls: Cell<usize>,
}

impl InferenceRunner for CountingRunner {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn generate(&self, request: &GenerationRequest<'_>) -> Result<InvocationOutcome> {
        self.calls.set(self.calls.get() + 1);
        self.inner.generate(request)
    }

    fn result_file(&self) -> PathBuf {
        self.inner.result_file()
    }
}

/// Deterministic script: the candidate says "Red" where the baseline says "Blue"
fn color_script(kernel: KernelId, prompt: &Prompt, _index: usize) -> Option<TokenSequence> {
    let tokens: &[&str] = match prompt.as_str() {
        "Hello" => &["Hello", "there"],
        "2+2=?" => &["4"],
        "Name a color" if kernel == KernelId::Tl2 => &["Red"],
        "Name a color" => &["Blue"],
        _ => &["?"],
    };
    Some(tokens.iter().map(|t| (*t).to_string()).collect())
}

fn runner_for(fixture: &Fixture, script: fn(KernelId, &Prompt, usize) -> Option<TokenSequence>) -> CountingRunner {
    CountingRunner {
        inner: MockRunner::new(
            fixture.results().join(RESULT_FILE_NAME),
            LineFormat::default(),
            script,
        ),
        calls: Cell::new(0),
    }
}

// ============================================================================
// FULL RUNS
// ============================================================================

#[test]
fn test_full_run_reports_single_divergence() {
    let fixture = Fixture::new(CORPUS);
    let runner = runner_for(&fixture, color_script);
    let builder = TouchBuilder::default();

    let outcome = Harness::new(fixture.config.clone(), &runner, &builder)
        .run_all()
        .unwrap();

    assert_eq!(outcome.report.total, 3);
    assert_eq!(outcome.report.right, 2);
    assert_eq!(outcome.report.wrong, 1);
    assert_eq!(runner.calls.get(), 6);
    assert_eq!(
        builder.built.into_inner(),
        vec![KernelId::F32, KernelId::I2S, KernelId::Tl2]
    );

    assert_eq!(fixture.read_result("prompt.txt"), "Hello\n2+2=?\nName a color\n");
    assert_eq!(fixture.read_result("wrong_prompt.txt"), "Name a color\n");
    assert_eq!(fixture.read_result("right_prompt.txt"), "Hello\n2+2=?\n");
    assert_eq!(
        fixture.read_result("i2_s.txt"),
        "0000<#>Hello<#>there\n0000<#>4\n0000<#>Blue\n"
    );
    assert!(fixture.results().join("tl2.txt").exists());
    assert!(fixture.results().join("report.json").exists());
    assert!(fixture.results().join("harness.json").exists());
    assert!(!fixture.results().join(RESULT_FILE_NAME).exists());
}

#[test]
fn test_model_directory_is_reset() {
    let fixture = Fixture::new(CORPUS);
    let model_dir = fixture.config.model_dir();
    std::fs::write(model_dir.join("ggml-model-tq10.gguf"), b"stale").unwrap();
    let runner = runner_for(&fixture, color_script);

    Harness::new(fixture.config.clone(), &runner, &TouchBuilder::default())
        .run_all()
        .unwrap();

    assert!(!model_dir.join("ggml-model-tq10.gguf").exists());
    assert!(model_dir.join("config.json").exists());
    assert_eq!(
        std::fs::read(model_dir.join("ggml-model-i2_s.gguf")).unwrap(),
        b"gguf"
    );
}

#[test]
fn test_rerun_is_deterministic_and_clears_previous_results() {
    let fixture = Fixture::new(CORPUS);
    let runner = runner_for(&fixture, color_script);
    let builder = TouchBuilder::default();
    let harness = Harness::new(fixture.config.clone(), &runner, &builder);

    let first = harness.run_all().unwrap();
    let second = harness.run_all().unwrap();

    assert_eq!(first.report, second.report);
    assert_eq!(fixture.read_result("prompt.txt").lines().count(), 3);
    assert_eq!(fixture.read_result("tl2.txt").lines().count(), 3);
}

#[test]
fn test_identical_kernels_output_is_full_accuracy() {
    let fixture = Fixture::new(CORPUS);
    let runner = runner_for(&fixture, |_, prompt, _| {
        Some(vec![prompt.as_str().to_uppercase()])
    });
    let outcome = Harness::new(fixture.config.clone(), &runner, &TouchBuilder::default())
        .run_all()
        .unwrap();
    assert_eq!(outcome.report.accuracy, 1.0);
    assert!(fixture.read_result("wrong_prompt.txt").is_empty());
}

// ============================================================================
// FATAL STAGES
// ============================================================================

#[test]
fn test_short_corpus_fails_before_any_run() {
    let fixture = Fixture::new("only one\n\n");
    let runner = runner_for(&fixture, color_script);
    let builder = TouchBuilder::default();

    let err = Harness::new(fixture.config.clone(), &runner, &builder)
        .run_all()
        .unwrap_err();

    assert!(matches!(
        err,
        ParityError::CorpusExhausted {
            requested: 3,
            available: 1
        }
    ));
    assert_eq!(runner.calls.get(), 0);
    assert!(builder.built.borrow().is_empty());
    assert_eq!(
        std::fs::read(fixture.config.model_dir().join("ggml-model-i2_s.gguf")).unwrap(),
        b"stale"
    );
}

#[test]
fn test_tool_failure_aborts_before_any_run() {
    let fixture = Fixture::new(CORPUS);
    let runner = runner_for(&fixture, color_script);
    let builder = TouchBuilder {
        fail_on: Some(KernelId::I2S),
        ..TouchBuilder::default()
    };

    let err = Harness::new(fixture.config.clone(), &runner, &builder)
        .run_all()
        .unwrap_err();

    assert!(matches!(err, ParityError::ToolFailed { .. }));
    assert_eq!(runner.calls.get(), 0);
    assert!(!fixture.results().join("prompt.txt").exists());
}

#[test]
fn test_prompt_length_bound_skips_long_lines() {
    let fixture = Fixture::new("Hello\nName a color\n2+2=?\nBye\n");
    let config = fixture.config.clone().with_max_prompt_chars(5);
    let runner = runner_for(&fixture, color_script);

    let outcome = Harness::new(config, &runner, &TouchBuilder::default())
        .run_all()
        .unwrap();

    let prompts: Vec<&str> = outcome.prompts.iter().map(Prompt::as_str).collect();
    assert_eq!(prompts, vec!["Hello", "2+2=?", "Bye"]);
    assert_eq!(fixture.read_result("prompt.txt"), "Hello\n2+2=?\nBye\n");
    assert_eq!(outcome.report.right, 3);
}

#[test]
fn test_prompt_length_bound_can_exhaust_corpus() {
    let fixture = Fixture::new(CORPUS);
    let config = fixture.config.clone().with_max_prompt_chars(5);
    let runner = runner_for(&fixture, color_script);

    let err = Harness::new(config, &runner, &TouchBuilder::default())
        .run_all()
        .unwrap_err();

    assert!(matches!(
        err,
        ParityError::CorpusExhausted {
            requested: 3,
            available: 2
        }
    ));
    assert_eq!(runner.calls.get(), 0);
}

#[test]
fn test_invalid_config_touches_nothing() {
    let fixture = Fixture::new(CORPUS);
    let config = fixture.config.clone().with_token_num(0);
    let runner = runner_for(&fixture, color_script);

    let err = Harness::new(config, &runner, &TouchBuilder::default())
        .run_all()
        .unwrap_err();

    assert!(matches!(err, ParityError::InvalidConfiguration(_)));
    assert!(fixture.config.model_dir().join("ggml-model-i2_s.gguf").exists());
    assert!(!fixture.results().exists());
}

// ============================================================================
// GENERATION FAILURES
// ============================================================================

fn candidate_crashes_on_arithmetic(
    kernel: KernelId,
    prompt: &Prompt,
    index: usize,
) -> Option<TokenSequence> {
    if kernel == KernelId::Tl2 && prompt.as_str() == "2+2=?" {
        return None;
    }
    color_script(KernelId::I2S, prompt, index)
}

#[test]
fn test_missing_generation_counts_as_divergence() {
    let fixture = Fixture::new(CORPUS);
    let runner = runner_for(&fixture, candidate_crashes_on_arithmetic);

    let outcome = Harness::new(fixture.config.clone(), &runner, &TouchBuilder::default())
        .run_all()
        .unwrap();

    assert_eq!(outcome.candidate.failed_prompts, vec![1]);
    assert_eq!(outcome.report.wrong, 1);
    assert_eq!(fixture.read_result("wrong_prompt.txt"), "2+2=?\n");
}

#[test]
fn test_missing_generation_aborts_under_abort_policy() {
    let fixture = Fixture::new(CORPUS);
    let config = fixture.config.clone().with_failure_policy(FailurePolicy::Abort);
    let runner = runner_for(&fixture, candidate_crashes_on_arithmetic);

    let err = Harness::new(config, &runner, &TouchBuilder::default())
        .run_all()
        .unwrap_err();

    assert!(matches!(
        err,
        ParityError::GenerationFailed { index: 1, .. }
    ));
    assert!(!fixture.results().join("report.json").exists());
}
