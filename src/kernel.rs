//! Kernel identifiers and model artifact naming
//!
//! A kernel is one numeric compute path for the same model architecture.
//! Each kernel runs against its own GGUF artifact, produced from a shared
//! full-precision source.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParityError;

/// Quantization/compute kernel under test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KernelId {
    /// 2-bit signed ternary packing
    #[serde(rename = "i2_s")]
    I2S,
    /// ARM table-lookup kernel
    #[serde(rename = "tl1")]
    Tl1,
    /// x86 table-lookup kernel
    #[serde(rename = "tl2")]
    Tl2,
    /// ggml ternary TQ1_0
    #[serde(rename = "tq10")]
    Tq10,
    /// ggml ternary TQ2_0
    #[serde(rename = "tq20")]
    Tq20,
    /// Full-precision reference
    #[serde(rename = "f32")]
    F32,
}

/// How the artifact for a kernel is produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactRecipe {
    /// HF checkpoint converted straight to f32 GGUF
    Convert,
    /// `llama-quantize` from the f32 artifact with the given format tag
    Quantize {
        /// Format tag passed to the quantizer (e.g. `I2_S`)
        format_tag: &'static str,
    },
    /// Table-lookup kernels are generated by the environment setup script
    SetupScript,
}

impl KernelId {
    /// Every known kernel, in display order
    pub const ALL: [KernelId; 6] = [
        Self::I2S,
        Self::Tl1,
        Self::Tl2,
        Self::Tq10,
        Self::Tq20,
        Self::F32,
    ];

    /// Get string representation (also the artifact/log file stem)
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::I2S => "i2_s",
            Self::Tl1 => "tl1",
            Self::Tl2 => "tl2",
            Self::Tq10 => "tq10",
            Self::Tq20 => "tq20",
            Self::F32 => "f32",
        }
    }

    /// Parse from string
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "i2_s" | "i2s" => Some(Self::I2S),
            "tl1" => Some(Self::Tl1),
            "tl2" => Some(Self::Tl2),
            "tq10" | "tq1_0" => Some(Self::Tq10),
            "tq20" | "tq2_0" => Some(Self::Tq20),
            "f32" => Some(Self::F32),
            _ => None,
        }
    }

    /// GGUF artifact file name for this kernel
    #[must_use]
    pub fn artifact_file_name(&self) -> String {
        format!("ggml-model-{}.gguf", self.as_str())
    }

    /// Raw result log file name once a run has been renamed
    #[must_use]
    pub fn log_file_name(&self) -> String {
        format!("{}.txt", self.as_str())
    }

    /// Artifact production recipe
    #[must_use]
    pub fn recipe(&self) -> ArtifactRecipe {
        match self {
            Self::F32 => ArtifactRecipe::Convert,
            Self::I2S => ArtifactRecipe::Quantize { format_tag: "I2_S" },
            Self::Tq10 => ArtifactRecipe::Quantize {
                format_tag: "TQ1_0",
            },
            Self::Tq20 => ArtifactRecipe::Quantize {
                format_tag: "TQ2_0",
            },
            Self::Tl1 | Self::Tl2 => ArtifactRecipe::SetupScript,
        }
    }
}

impl fmt::Display for KernelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KernelId {
    type Err = ParityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| ParityError::UnsupportedKernel {
            kernel: s.to_string(),
            arch: "any architecture".to_string(),
        })
    }
}

/// Model family the harness knows how to prepare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelFamily {
    /// BitNet b1.58 large (0.7B)
    #[serde(rename = "bitnet_b1_58-large")]
    BitnetB158Large,
}

impl ModelFamily {
    /// Directory name under the models root
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BitnetB158Large => "bitnet_b1_58-large",
        }
    }
}

impl Default for ModelFamily {
    fn default() -> Self {
        Self::BitnetB158Large
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelFamily {
    type Err = ParityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bitnet_b1_58-large" => Ok(Self::BitnetB158Large),
            other => Err(ParityError::InvalidConfiguration(format!(
                "unknown model family '{other}' (supported: bitnet_b1_58-large)"
            ))),
        }
    }
}
