//! Target architecture detection and platform conventions
//!
//! The supported kernel set depends on the CPU architecture: the
//! table-lookup kernel is `tl1` on ARM and `tl2` on x86. Tool binaries
//! follow the build layout of the host operating system.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ParityError, Result};
use crate::kernel::KernelId;

const ARM64_KERNELS: [KernelId; 5] = [
    KernelId::I2S,
    KernelId::Tl1,
    KernelId::Tq10,
    KernelId::Tq20,
    KernelId::F32,
];

const X86_64_KERNELS: [KernelId; 5] = [
    KernelId::I2S,
    KernelId::Tl2,
    KernelId::Tq10,
    KernelId::Tq20,
    KernelId::F32,
];

/// CPU architecture family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Arch {
    /// aarch64 / ARM64
    #[serde(rename = "arm64")]
    Arm64,
    /// x86_64 / AMD64
    #[serde(rename = "x86_64")]
    X86_64,
}

impl Arch {
    /// Resolve a machine name (as reported by the OS) to an architecture
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedArchitecture` for names outside the alias table.
    pub fn from_alias(name: &str) -> Result<Self> {
        match name {
            "AMD64" | "x86" | "x86_64" => Ok(Self::X86_64),
            "aarch64" | "arm64" | "ARM64" => Ok(Self::Arm64),
            other => Err(ParityError::UnsupportedArchitecture(other.to_string())),
        }
    }

    /// Detect the architecture this binary was built for
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedArchitecture` on targets with no kernel table.
    pub fn detect() -> Result<Self> {
        Self::from_alias(std::env::consts::ARCH)
    }

    /// Canonical name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Arm64 => "arm64",
            Self::X86_64 => "x86_64",
        }
    }

    /// Kernels that have an implementation on this architecture
    #[must_use]
    pub fn supported_kernels(&self) -> &'static [KernelId] {
        match self {
            Self::Arm64 => &ARM64_KERNELS,
            Self::X86_64 => &X86_64_KERNELS,
        }
    }

    /// The table-lookup kernel for this architecture
    #[must_use]
    pub fn table_lookup_kernel(&self) -> KernelId {
        match self {
            Self::Arm64 => KernelId::Tl1,
            Self::X86_64 => KernelId::Tl2,
        }
    }

    /// Check that a kernel can run here
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedKernel` when the kernel is not in the set.
    pub fn ensure_supported(&self, kernel: KernelId) -> Result<()> {
        if self.supported_kernels().contains(&kernel) {
            Ok(())
        } else {
            Err(ParityError::UnsupportedKernel {
                kernel: kernel.to_string(),
                arch: self.as_str().to_string(),
            })
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Location convention for the inference and quantization binaries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolLayout {
    build_dir: PathBuf,
    windows: bool,
}

impl ToolLayout {
    /// Create a layout rooted at `build_dir`
    #[must_use]
    pub fn new(build_dir: impl Into<PathBuf>, windows: bool) -> Self {
        Self {
            build_dir: build_dir.into(),
            windows,
        }
    }

    /// Layout for the host operating system
    #[must_use]
    pub fn for_host(build_dir: impl Into<PathBuf>) -> Self {
        Self::new(build_dir, cfg!(windows))
    }

    /// Root build directory
    #[must_use]
    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    /// Path to a tool binary
    ///
    /// MSVC builds land in `bin/Release/<tool>.exe`, everything else in
    /// `bin/<tool>`.
    #[must_use]
    pub fn tool_path(&self, tool: &str) -> PathBuf {
        if self.windows {
            self.build_dir
                .join("bin")
                .join("Release")
                .join(format!("{tool}.exe"))
        } else {
            self.build_dir.join("bin").join(tool)
        }
    }
}
