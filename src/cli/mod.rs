//! CLI command implementations
//!
//! All command logic lives here rather than in `main.rs` so it can be
//! unit-tested.

// CLI glue code - relaxed lint requirements
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::needless_pass_by_value)]

use std::path::Path;

use tracing::info;

use crate::arch::Arch;
use crate::artifacts::ToolchainBuilder;
use crate::compare::{compare, AccuracyReport};
use crate::config::HarnessConfig;
use crate::corpus::{CorpusLoader, LineCorpusLoader};
use crate::error::{ParityError, Result};
use crate::harness::Harness;
use crate::log_format::LineFormat;
use crate::runner::{InferenceRunner, LlamaCliRunner};

pub mod handlers;
pub use handlers::{Cli, Commands, RunArgs};

/// Multi-character short flags and their long forms
const LEGACY_FLAGS: [(&str, &str); 4] = [
    ("-k1", "--kernel1"),
    ("-k2", "--kernel2"),
    ("-t1", "--thread1"),
    ("-t2", "--thread2"),
];

/// Rewrite `-k1 -k2 -t1 -t2` to their long forms
///
/// clap reads `-t1` as `-t 1`, so these must be rewritten before parsing.
/// Both `-k1 x` and `-k1=x` are accepted.
pub fn normalize_legacy_flags<I, S>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    args.into_iter()
        .map(Into::into)
        .map(|arg| {
            for (short, long) in LEGACY_FLAGS {
                if arg == short {
                    return long.to_string();
                }
                if let Some(value) = arg.strip_prefix(short).and_then(|r| r.strip_prefix('=')) {
                    return format!("{long}={value}");
                }
            }
            arg
        })
        .collect()
}

/// Resolve the target architecture from an optional override
pub fn resolve_arch(name: Option<&str>) -> Result<Arch> {
    match name {
        Some(name) => Arch::from_alias(name),
        None => Arch::detect(),
    }
}

/// Build the harness configuration from `run` flags
pub fn build_config(args: &RunArgs) -> Result<HarnessConfig> {
    let arch = resolve_arch(args.arch.as_deref())?;
    let mut config = HarnessConfig::new(arch, args.kernel1, args.kernel2)
        .with_model(args.model)
        .with_threads(args.thread1, args.thread2)
        .with_data_num(args.data_num)
        .with_prompt_file(args.prompt_file.clone())
        .with_corpus_format(args.corpus_format, args.language.clone())
        .with_seed(args.seed)
        .with_token_num(args.token_num)
        .with_results_dir(args.results_dir.clone())
        .with_models_root(args.models_dir.clone())
        .with_build_dir(args.build_dir.clone())
        .with_failure_policy(args.failure_policy);
    if let Some(limit) = args.max_prompt_chars {
        config = config.with_max_prompt_chars(limit);
    }
    config.validate()?;
    Ok(config)
}

/// Main CLI entrypoint - dispatches commands to handlers
pub fn entrypoint(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run(args) => run_harness(&args),
        Commands::Compare {
            baseline,
            candidate,
            prompts,
            output,
        } => {
            let report = compare_logs(&baseline, &candidate, &prompts)?;
            if let Some(dir) = output {
                report.persist(&dir)?;
                info!(dir = %dir.display(), "report written");
            }
            println!("{report}");
            Ok(())
        },
        Commands::Kernels { arch } => {
            let arch = resolve_arch(arch.as_deref())?;
            println!("{}", format_kernel_list(arch));
            Ok(())
        },
    }
}

/// Run the full harness with the native toolchain
pub fn run_harness(args: &RunArgs) -> Result<()> {
    let config = anchor_paths(build_config(args)?)?;
    let layout = config.tool_layout();
    let runner = inference_runner(&config, args);
    let builder = ToolchainBuilder::new(layout).with_python(&args.python);

    info!(
        binary = %runner.binary().display(),
        output = %runner.result_file().display(),
        arch = %config.arch,
        baseline = %config.baseline,
        candidate = %config.candidate,
        prompts = config.data_num,
        "starting harness"
    );
    let outcome = Harness::new(config, &runner, &builder).run_all()?;
    println!("{}", outcome.report);
    Ok(())
}

/// Make the model and build directories absolute
///
/// The inference binary runs from `--workdir`, so paths handed to it must
/// not depend on the harness's own working directory.
pub fn anchor_paths(config: HarnessConfig) -> Result<HarnessConfig> {
    let cwd = std::env::current_dir().map_err(|e| ParityError::io(".", &e))?;
    let models_root = cwd.join(&config.models_root);
    let build_dir = cwd.join(&config.build_dir);
    Ok(config.with_models_root(models_root).with_build_dir(build_dir))
}

/// Runner for the native inference binary, launched from `--workdir`
pub fn inference_runner(config: &HarnessConfig, args: &RunArgs) -> LlamaCliRunner {
    LlamaCliRunner::new(config.tool_layout().tool_path("llama-cli")).with_working_dir(args.workdir.clone())
}

/// Re-run the comparison over persisted logs and prompts
pub fn compare_logs(baseline: &Path, candidate: &Path, prompts: &Path) -> Result<AccuracyReport> {
    let format = LineFormat::default();
    let prompts = LineCorpusLoader::new().load(prompts, usize::MAX)?;
    let baseline = format.parse_file(baseline)?;
    let candidate = format.parse_file(candidate)?;
    compare(&baseline, &candidate, &prompts)
}

/// One line per kernel, table-lookup kernel marked
#[must_use]
pub fn format_kernel_list(arch: Arch) -> String {
    let mut out = format!("Kernels for {arch}:");
    for kernel in arch.supported_kernels() {
        out.push_str("\n  ");
        out.push_str(kernel.as_str());
        if *kernel == arch.table_lookup_kernel() {
            out.push_str(" (table lookup)");
        }
    }
    out
}
