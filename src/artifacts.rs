//! Model artifact preparation
//!
//! Every harness run starts from a clean model directory: previously
//! converted GGUF files are deleted so a stale artifact can never be
//! compared by accident. The f32 artifact is converted from the HF
//! checkpoint, then each kernel's artifact is derived from it.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info};

use crate::arch::ToolLayout;
use crate::error::{ParityError, Result};
use crate::kernel::{ArtifactRecipe, KernelId};

/// Whether a file name is a converted model artifact
///
/// Matches names starting with `ggml` that contain `.gguf`.
#[must_use]
pub fn is_converted_artifact(name: &str) -> bool {
    name.strip_prefix("ggml")
        .is_some_and(|rest| rest.contains(".gguf"))
}

/// Directory holding one model family's checkpoint and artifacts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelWorkspace {
    dir: PathBuf,
}

impl ModelWorkspace {
    /// Workspace rooted at `dir`
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Model directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Artifact path for a kernel
    #[must_use]
    pub fn artifact_path(&self, kernel: KernelId) -> PathBuf {
        self.dir.join(kernel.artifact_file_name())
    }

    /// Delete every converted artifact, returning what was removed
    ///
    /// # Errors
    ///
    /// Returns `IoError` if the directory cannot be listed or a file
    /// cannot be removed.
    pub fn fresh(&self) -> Result<Vec<PathBuf>> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| ParityError::io(&self.dir, &e))?;
        let mut removed = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ParityError::io(&self.dir, &e))?;
            let is_file = entry
                .file_type()
                .map_err(|e| ParityError::io(entry.path(), &e))?
                .is_file();
            if !is_file || !is_converted_artifact(&entry.file_name().to_string_lossy()) {
                continue;
            }
            let path = entry.path();
            std::fs::remove_file(&path).map_err(|e| ParityError::io(&path, &e))?;
            debug!(path = %path.display(), "removed stale artifact");
            removed.push(path);
        }
        removed.sort();
        Ok(removed)
    }
}

/// Produces one kernel's artifact inside a workspace
pub trait ArtifactBuilder {
    /// Build the artifact for `kernel`
    ///
    /// Quantized kernels may assume the f32 artifact already exists.
    ///
    /// # Errors
    ///
    /// Returns `ToolFailed` or `IoError` if the artifact cannot be built.
    fn build(&self, workspace: &ModelWorkspace, kernel: KernelId) -> Result<()>;
}

/// Build the artifacts for the given kernels, f32 first
///
/// # Errors
///
/// Propagates builder failures, and returns `ToolFailed` when a builder
/// reports success without producing the artifact.
pub fn prepare_artifacts(
    builder: &dyn ArtifactBuilder,
    workspace: &ModelWorkspace,
    kernels: &[KernelId],
) -> Result<()> {
    let mut order: BTreeSet<KernelId> = kernels.iter().copied().collect();
    let needs_source = order
        .iter()
        .any(|k| matches!(k.recipe(), ArtifactRecipe::Quantize { .. } | ArtifactRecipe::Convert));
    order.remove(&KernelId::F32);

    let mut plan = Vec::with_capacity(order.len() + 1);
    if needs_source {
        plan.push(KernelId::F32);
    }
    plan.extend(order);

    for kernel in plan {
        info!(%kernel, dir = %workspace.dir().display(), "building model artifact");
        builder.build(workspace, kernel)?;
        let artifact = workspace.artifact_path(kernel);
        if !artifact.is_file() {
            return Err(ParityError::ToolFailed {
                tool: format!("{kernel} artifact builder"),
                reason: format!("{} was not produced", artifact.display()),
            });
        }
    }
    Ok(())
}

/// Builder driving the native conversion and quantization tools
#[derive(Debug, Clone)]
pub struct ToolchainBuilder {
    layout: ToolLayout,
    python: String,
    converter_script: PathBuf,
    setup_script: PathBuf,
}

impl ToolchainBuilder {
    /// Builder using the tools under `layout`
    #[must_use]
    pub fn new(layout: ToolLayout) -> Self {
        Self {
            layout,
            python: "python".to_string(),
            converter_script: PathBuf::from("utils/convert-hf-to-gguf-bitnet.py"),
            setup_script: PathBuf::from("setup_env.py"),
        }
    }

    /// Set the Python interpreter
    #[must_use]
    pub fn with_python(mut self, python: &str) -> Self {
        self.python = python.to_string();
        self
    }

    /// Command that produces `kernel`'s artifact
    #[must_use]
    pub fn command_for(&self, workspace: &ModelWorkspace, kernel: KernelId) -> Command {
        match kernel.recipe() {
            ArtifactRecipe::Convert => {
                let mut cmd = Command::new(&self.python);
                cmd.arg(&self.converter_script)
                    .arg(workspace.dir())
                    .args(["--outtype", "f32"]);
                cmd
            },
            ArtifactRecipe::Quantize { format_tag } => {
                let mut cmd = Command::new(self.layout.tool_path("llama-quantize"));
                cmd.args(["--token-embedding-type", "f32"])
                    .arg(workspace.artifact_path(KernelId::F32))
                    .arg(workspace.artifact_path(kernel))
                    .args([format_tag, "1"]);
                cmd
            },
            ArtifactRecipe::SetupScript => {
                let mut cmd = Command::new(&self.python);
                cmd.arg(&self.setup_script)
                    .arg("-md")
                    .arg(workspace.dir())
                    .args(["-q", kernel.as_str(), "-fa"]);
                cmd
            },
        }
    }
}

impl ArtifactBuilder for ToolchainBuilder {
    fn build(&self, workspace: &ModelWorkspace, kernel: KernelId) -> Result<()> {
        let mut cmd = self.command_for(workspace, kernel);
        let tool = cmd.get_program().to_string_lossy().into_owned();
        debug!(%tool, args = ?cmd.get_args().collect::<Vec<_>>(), "running tool");
        let status = cmd.status().map_err(|e| ParityError::ToolFailed {
            tool: tool.clone(),
            reason: format!("failed to execute: {e}"),
        })?;
        if !status.success() {
            return Err(ParityError::ToolFailed {
                tool,
                reason: format!("exited with {status}"),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::ffi::OsStr;

    use super::*;

    #[test]
    fn test_is_converted_artifact() {
        assert!(is_converted_artifact("ggml-model-i2_s.gguf"));
        assert!(is_converted_artifact("ggml-model-f32.gguf.tmp"));
        assert!(!is_converted_artifact("model.safetensors"));
        assert!(!is_converted_artifact("my-ggml-model.gguf"));
        assert!(!is_converted_artifact("ggml-vocab.json"));
    }

    #[test]
    fn test_fresh_removes_only_converted_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "ggml-model-i2_s.gguf",
            "ggml-model-f32.gguf",
            "config.json",
            "model.safetensors",
        ] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let workspace = ModelWorkspace::new(dir.path());
        let removed = workspace.fresh().unwrap();
        assert_eq!(removed.len(), 2);
        assert!(dir.path().join("config.json").exists());
        assert!(!dir.path().join("ggml-model-f32.gguf").exists());
    }

    #[test]
    fn test_fresh_on_missing_dir_errors() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = ModelWorkspace::new(dir.path().join("absent"));
        assert!(matches!(
            workspace.fresh(),
            Err(ParityError::IoError { .. })
        ));
    }

    struct TouchBuilder {
        built: RefCell<Vec<KernelId>>,
        skip: Option<KernelId>,
    }

    impl ArtifactBuilder for TouchBuilder {
        fn build(&self, workspace: &ModelWorkspace, kernel: KernelId) -> Result<()> {
            self.built.borrow_mut().push(kernel);
            if self.skip != Some(kernel) {
                std::fs::write(workspace.artifact_path(kernel), b"gguf").unwrap();
            }
            Ok(())
        }
    }

    #[test]
    fn test_prepare_builds_f32_first_once() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = ModelWorkspace::new(dir.path());
        let builder = TouchBuilder {
            built: RefCell::new(Vec::new()),
            skip: None,
        };
        prepare_artifacts(&builder, &workspace, &[KernelId::Tq20, KernelId::F32]).unwrap();
        assert_eq!(builder.built.into_inner(), vec![KernelId::F32, KernelId::Tq20]);
    }

    #[test]
    fn test_prepare_table_lookup_only_skips_f32() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = ModelWorkspace::new(dir.path());
        let builder = TouchBuilder {
            built: RefCell::new(Vec::new()),
            skip: None,
        };
        prepare_artifacts(&builder, &workspace, &[KernelId::Tl1]).unwrap();
        assert_eq!(builder.built.into_inner(), vec![KernelId::Tl1]);
    }

    #[test]
    fn test_prepare_detects_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = ModelWorkspace::new(dir.path());
        let builder = TouchBuilder {
            built: RefCell::new(Vec::new()),
            skip: Some(KernelId::I2S),
        };
        let err = prepare_artifacts(&builder, &workspace, &[KernelId::I2S, KernelId::Tl2])
            .unwrap_err();
        assert!(matches!(err, ParityError::ToolFailed { .. }));
    }

    #[test]
    fn test_quantize_command() {
        let builder = ToolchainBuilder::new(ToolLayout::new("build", false));
        let workspace = ModelWorkspace::new("models/bitnet_b1_58-large");
        let cmd = builder.command_for(&workspace, KernelId::I2S);
        assert_eq!(
            cmd.get_program(),
            PathBuf::from("build/bin/llama-quantize").as_os_str()
        );
        let args: Vec<&OsStr> = cmd.get_args().collect();
        assert_eq!(args[0], "--token-embedding-type");
        assert_eq!(args[1], "f32");
        assert_eq!(
            Path::new(args[2]),
            Path::new("models/bitnet_b1_58-large/ggml-model-f32.gguf")
        );
        assert_eq!(
            Path::new(args[3]),
            Path::new("models/bitnet_b1_58-large/ggml-model-i2_s.gguf")
        );
        assert_eq!(args[4], "I2_S");
        assert_eq!(args[5], "1");
    }

    #[test]
    fn test_convert_and_setup_commands() {
        let builder = ToolchainBuilder::new(ToolLayout::new("build", false)).with_python("python3");
        let workspace = ModelWorkspace::new("m");

        let convert = builder.command_for(&workspace, KernelId::F32);
        assert_eq!(convert.get_program(), "python3");
        let args: Vec<&OsStr> = convert.get_args().collect();
        assert_eq!(args[args.len() - 2..], [OsStr::new("--outtype"), OsStr::new("f32")]);

        let setup = builder.command_for(&workspace, KernelId::Tl2);
        let args: Vec<&OsStr> = setup.get_args().collect();
        assert_eq!(args[0], "setup_env.py");
        assert_eq!(args[3], "-q");
        assert_eq!(args[4], "tl2");
        assert_eq!(args[5], "-fa");
    }

    #[test]
    fn test_missing_tool_is_tool_failed() {
        let dir = tempfile::tempdir().unwrap();
        let builder = ToolchainBuilder::new(ToolLayout::new(dir.path(), false));
        let workspace = ModelWorkspace::new(dir.path());
        let err = builder.build(&workspace, KernelId::Tq10).unwrap_err();
        assert!(matches!(err, ParityError::ToolFailed { .. }));
    }
}
