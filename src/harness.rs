//! Harness controller
//!
//! Sequences one full comparison: corpus load, fresh model environment,
//! artifact build, baseline run, candidate run, parse, compare and report.
//! The corpus is loaded first so a short corpus fails before any external
//! tool runs. Every step is fatal; there is no partial-completion state.

use tracing::{info, info_span};

use crate::artifacts::{prepare_artifacts, ArtifactBuilder, ModelWorkspace};
use crate::compare::{compare, AccuracyReport};
use crate::config::{HarnessConfig, KernelSlot, MANIFEST_FILE_NAME, PROMPT_FILE_NAME};
use crate::corpus::{load_exact, write_prompt_file, Prompt};
use crate::error::{ParityError, Result};
use crate::executor::{remove_if_exists, RawResultLog, RunExecutor};
use crate::log_format::ParsedResult;
use crate::runner::InferenceRunner;

/// Everything a finished harness run produced
#[derive(Debug, Clone)]
pub struct HarnessOutcome {
    /// Prompts that were run, in corpus order
    pub prompts: Vec<Prompt>,
    /// Baseline log
    pub baseline: RawResultLog,
    /// Candidate log
    pub candidate: RawResultLog,
    /// Comparison report
    pub report: AccuracyReport,
}

/// Dual-kernel comparison driver
pub struct Harness<'a> {
    config: HarnessConfig,
    runner: &'a dyn InferenceRunner,
    builder: &'a dyn ArtifactBuilder,
}

impl<'a> Harness<'a> {
    /// Create a harness
    pub fn new(
        config: HarnessConfig,
        runner: &'a dyn InferenceRunner,
        builder: &'a dyn ArtifactBuilder,
    ) -> Self {
        Self {
            config,
            runner,
            builder,
        }
    }

    /// Run the whole comparison
    ///
    /// # Errors
    ///
    /// Returns the first error any stage raises. Files written by earlier
    /// stages are left in place.
    pub fn run_all(&self) -> Result<HarnessOutcome> {
        let cfg = &self.config;
        cfg.validate()?;

        let span = info_span!("harness", baseline = %cfg.baseline, candidate = %cfg.candidate);
        let _guard = span.enter();

        let loader = cfg
            .corpus_format
            .loader(cfg.corpus_language.as_deref(), cfg.max_prompt_chars);
        let prompts = load_exact(loader.as_ref(), &cfg.prompt_file, cfg.data_num)?;
        info!(count = prompts.len(), loader = loader.name(), "corpus ready");

        let workspace = ModelWorkspace::new(cfg.model_dir());
        let removed = workspace.fresh()?;
        info!(removed = removed.len(), dir = %workspace.dir().display(), "model environment reset");
        prepare_artifacts(self.builder, &workspace, &[cfg.baseline, cfg.candidate])?;

        self.reset_results()?;
        write_prompt_file(&cfg.results_path(PROMPT_FILE_NAME), &prompts)?;
        cfg.write_manifest(&cfg.results_path(MANIFEST_FILE_NAME))?;

        let executor = RunExecutor::from_config(self.runner, cfg);
        let baseline = executor.run(&cfg.run_config(KernelSlot::Baseline), &prompts)?;
        let candidate = executor.run(&cfg.run_config(KernelSlot::Candidate), &prompts)?;

        let baseline_result = self.parse(&baseline)?;
        let candidate_result = self.parse(&candidate)?;

        let report = compare(&baseline_result, &candidate_result, &prompts)?;
        report.persist(&cfg.results_dir)?;
        info!(
            total = report.total,
            right = report.right,
            wrong = report.wrong,
            "comparison finished"
        );

        Ok(HarnessOutcome {
            prompts,
            baseline,
            candidate,
            report,
        })
    }

    fn reset_results(&self) -> Result<()> {
        let cfg = &self.config;
        std::fs::create_dir_all(&cfg.results_dir)
            .map_err(|e| ParityError::io(&cfg.results_dir, &e))?;
        for path in [
            cfg.results_path(PROMPT_FILE_NAME),
            self.runner.result_file(),
            cfg.kernel_log_path(cfg.baseline),
            cfg.kernel_log_path(cfg.candidate),
        ] {
            remove_if_exists(&path)?;
        }
        Ok(())
    }

    fn parse(&self, log: &RawResultLog) -> Result<ParsedResult> {
        let parsed = self.config.line_format.parse_file(&log.path)?;
        info!(
            kernel = %log.kernel,
            entries = parsed.len(),
            failed = parsed.failed_count(),
            "log parsed"
        );
        Ok(parsed)
    }
}
