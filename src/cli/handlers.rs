//! Command-line surface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::FailurePolicy;
use crate::corpus::CorpusFormat;
use crate::kernel::{KernelId, ModelFamily};

/// Dual-kernel equivalence testing harness
///
/// Runs the same prompts through two inference kernels with identical
/// seeds and checks that they emit identical token sequences.
#[derive(Parser, Debug)]
#[command(name = "kernel-parity")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand
    #[command(subcommand)]
    pub command: Commands,
}

/// Harness subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build artifacts, run both kernels and compare their outputs
    ///
    /// Examples:
    ///   kernel-parity run -k1 i2_s -k2 tl2
    ///   kernel-parity run -k1 i2_s -k2 tq20 -n 50 -t 32 -s 7
    Run(RunArgs),
    /// Compare two existing kernel logs without regenerating
    ///
    /// Examples:
    ///   kernel-parity compare results/i2_s.txt results/tl2.txt
    Compare {
        /// Baseline kernel log
        #[arg(value_name = "BASELINE")]
        baseline: PathBuf,

        /// Candidate kernel log
        #[arg(value_name = "CANDIDATE")]
        candidate: PathBuf,

        /// Prompt list the logs were generated from
        #[arg(short, long, default_value = "results/prompt.txt")]
        prompts: PathBuf,

        /// Directory to write prompt lists and report into
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List the kernels supported on an architecture
    Kernels {
        /// Architecture name (defaults to this machine)
        #[arg(long)]
        arch: Option<String>,
    },
}

/// Flags of the `run` subcommand
#[derive(clap::Args, Debug, Clone)]
pub struct RunArgs {
    /// Baseline kernel (`-k1`)
    #[arg(long)]
    pub kernel1: KernelId,

    /// Candidate kernel (`-k2`)
    #[arg(long)]
    pub kernel2: KernelId,

    /// Threads for the baseline run (`-t1`)
    #[arg(long, default_value = "4")]
    pub thread1: usize,

    /// Threads for the candidate run (`-t2`)
    #[arg(long, default_value = "4")]
    pub thread2: usize,

    /// Number of prompts to compare
    #[arg(short = 'n', long, default_value = "5")]
    pub data_num: usize,

    /// Model family
    #[arg(short, long, default_value = "bitnet_b1_58-large")]
    pub model: ModelFamily,

    /// Corpus source
    #[arg(short = 'f', long, default_value = "./prompt/WildChat-1M.txt")]
    pub prompt_file: PathBuf,

    /// Seed shared by both runs
    #[arg(short, long, default_value = "0")]
    pub seed: u64,

    /// Tokens generated per prompt
    #[arg(short = 't', long, default_value = "100")]
    pub token_num: usize,

    /// Corpus format: lines or conversation
    #[arg(long, default_value = "lines")]
    pub corpus_format: CorpusFormat,

    /// Keep only conversations in this language
    #[arg(long)]
    pub language: Option<String>,

    /// Skip prompts longer than this many characters
    #[arg(long)]
    pub max_prompt_chars: Option<usize>,

    /// What to do when a prompt produces no output: diverge or abort
    #[arg(long, default_value = "diverge")]
    pub failure_policy: FailurePolicy,

    /// Results directory
    #[arg(long, default_value = "results")]
    pub results_dir: PathBuf,

    /// Parent directory of the model families
    #[arg(long, default_value = "./models")]
    pub models_dir: PathBuf,

    /// Native build directory containing bin/
    #[arg(long, default_value = "build")]
    pub build_dir: PathBuf,

    /// Working directory of the inference binary (it appends to
    /// `results/generate_result.txt` there)
    #[arg(long, default_value = ".")]
    pub workdir: PathBuf,

    /// Override the detected architecture
    #[arg(long)]
    pub arch: Option<String>,

    /// Python interpreter for the conversion scripts
    #[arg(long, default_value = "python")]
    pub python: String,
}
