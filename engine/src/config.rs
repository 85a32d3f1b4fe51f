//! Configuration for a photoflow installation.
//!
//! One `Config` value is loaded at process start and passed by reference to
//! every component. Nothing in the engine reads paths or tunables from
//! anywhere else.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::checksums::ChecksumAlgorithm;
use crate::error::{EngineError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub remote: RemoteConfig,
    pub compression: CompressionSettings,
    pub fingerprint: FingerprintSettings,
    pub publish: PublishSettings,
    pub device: DeviceSettings,
    pub media: MediaSettings,
}

impl Config {
    /// Default config file location (`~/.config/photoflow/config.toml` on Linux).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("photoflow").join("config.toml"))
    }

    /// Load and validate configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| EngineError::InvalidConfig {
            path: path.to_path_buf(),
            reason: format!("Failed to read config file: {}", e),
        })?;
        let config = Self::from_toml_str(&content).map_err(|e| match e {
            EngineError::InvalidConfig { reason, .. } => EngineError::InvalidConfig {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })?;
        Ok(config)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(|e| EngineError::InvalidConfig {
            path: PathBuf::new(),
            reason: format!("Failed to parse config: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| EngineError::InvalidConfig {
            path: PathBuf::new(),
            reason,
        };

        let c = &self.compression;
        if c.quality == 0 || c.quality > 100 {
            return Err(invalid(format!("compression.quality must be 1..=100, got {}", c.quality)));
        }
        if c.max_width == 0 || c.max_height == 0 {
            return Err(invalid("compression bounds must be non-zero".to_string()));
        }
        if c.max_width > u16::MAX as u32 || c.max_height > u16::MAX as u32 {
            return Err(invalid(format!("compression bounds must not exceed {}", u16::MAX)));
        }
        if self.fingerprint.window_bytes == 0 {
            return Err(invalid("fingerprint.window_bytes must be non-zero".to_string()));
        }
        if self.publish.min_rating > 5 {
            return Err(invalid(format!(
                "publish.min_rating must be 0..=5, got {}",
                self.publish.min_rating
            )));
        }
        Ok(())
    }
}

/// Storage roles. Each is an opaque directory; absence is checked right before use.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Camera card, e.g. `/Volumes/Fuji X-T4/DCIM`
    pub capture_source: Option<PathBuf>,
    /// Local review folder for still images
    pub staging: Option<PathBuf>,
    /// Raw sidecar archive
    pub raw_archive: Option<PathBuf>,
    /// Compressed, finalized still images
    pub final_archive: Option<PathBuf>,
    /// Off-device storage for motion clips
    pub bulk_storage: Option<PathBuf>,
    /// Source tree of the published gallery
    pub publish_root: Option<PathBuf>,
}

/// Storage role names, used in errors and logs.
pub mod roles {
    pub const CAPTURE_SOURCE: &str = "capture source";
    pub const STAGING: &str = "staging";
    pub const RAW_ARCHIVE: &str = "raw archive";
    pub const FINAL_ARCHIVE: &str = "final archive";
    pub const BULK_STORAGE: &str = "bulk storage";
    pub const PUBLISH_ROOT: &str = "publish source tree";
    pub const BACKUP_TARGET: &str = "remote backup target";
    pub const PUBLISH_TARGET: &str = "remote publish target";
}

impl StorageConfig {
    /// Resolve a configured role or fail with a precondition error.
    pub fn require<'a>(
        role: &'static str,
        value: &'a Option<PathBuf>,
    ) -> Result<&'a Path> {
        value
            .as_deref()
            .ok_or(EngineError::StorageNotConfigured { role })
    }

    /// Resolve a configured role that must also exist on disk right now.
    pub fn require_existing<'a>(
        role: &'static str,
        value: &'a Option<PathBuf>,
    ) -> Result<&'a Path> {
        let path = Self::require(role, value)?;
        if !path.is_dir() {
            return Err(EngineError::StorageUnavailable {
                role,
                path: path.to_path_buf(),
            });
        }
        Ok(path)
    }
}

/// Remote destinations, in `rsync` syntax (`host:/path` or a local path).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Off-site mirror of the archives
    pub backup_target: Option<String>,
    /// Where the built gallery is deployed
    pub publish_target: Option<String>,
    /// Jump hosts tried in order when the direct route fails
    pub jump_hosts: Vec<String>,
    /// Sync program
    pub rsync_program: String,
}

impl RemoteConfig {
    /// The sync program, falling back to `rsync`.
    pub fn rsync_program(&self) -> &str {
        if self.rsync_program.is_empty() {
            "rsync"
        } else {
            &self.rsync_program
        }
    }
}

/// JPEG chroma subsampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChromaMode {
    /// No subsampling
    #[serde(rename = "444")]
    Yuv444,
    /// Horizontal subsampling
    #[serde(rename = "422")]
    Yuv422,
    /// Horizontal and vertical subsampling
    #[serde(rename = "420")]
    Yuv420,
}

impl std::fmt::Display for ChromaMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChromaMode::Yuv444 => write!(f, "4:4:4"),
            ChromaMode::Yuv422 => write!(f, "4:2:2"),
            ChromaMode::Yuv420 => write!(f, "4:2:0"),
        }
    }
}

/// Native sensor resolution of the capture device (Fujifilm X-T4).
pub const NATIVE_WIDTH: u32 = 6240;
/// Native sensor height.
pub const NATIVE_HEIGHT: u32 = 4160;

/// Transform pipeline constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionSettings {
    pub max_width: u32,
    pub max_height: u32,
    pub quality: u8,
    pub chroma: ChromaMode,
}

impl Default for CompressionSettings {
    // ~83% of native resolution
    fn default() -> Self {
        CompressionSettings {
            max_width: NATIVE_WIDTH * 5 / 6,
            max_height: (NATIVE_HEIGHT * 5).div_ceil(6),
            quality: 92,
            chroma: ChromaMode::Yuv444,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintSettings {
    pub algorithm: ChecksumAlgorithm,
    /// Files strictly larger than this are sampled
    pub partial_threshold_bytes: u64,
    /// Size of the head and tail windows in partial mode
    pub window_bytes: u64,
}

impl Default for FingerprintSettings {
    fn default() -> Self {
        FingerprintSettings {
            algorithm: ChecksumAlgorithm::Blake3,
            partial_threshold_bytes: 64 * 1024 * 1024,
            window_bytes: 4 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishSettings {
    /// Minimum rating for the published collection
    pub min_rating: u8,
    /// Image directory inside the publish source tree
    pub photos_dir: PathBuf,
    /// Manifest location inside the publish source tree
    pub manifest_path: PathBuf,
    /// Build command run in the publish source tree; empty disables the build
    pub build_command: Vec<String>,
    /// Build output inside the publish source tree, synced to the publish target
    pub build_output: PathBuf,
}

impl Default for PublishSettings {
    fn default() -> Self {
        PublishSettings {
            min_rating: 4,
            photos_dir: PathBuf::from("public/photos"),
            manifest_path: PathBuf::from("src/data/photos.json"),
            build_command: Vec::new(),
            build_output: PathBuf::from("dist"),
        }
    }
}

/// Where finalized images are copied back on the capture device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceFolder {
    /// First subfolder (by name) that is not read-only
    FirstWritable,
    /// A fixed subfolder of the capture source
    Named(String),
    /// The capture source itself
    Root,
}

/// Capture device behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    pub copy_back: bool,
    pub folder: DeviceFolder,
    pub remove_raws: bool,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        DeviceSettings {
            copy_back: true,
            folder: DeviceFolder::FirstWritable,
            remove_raws: true,
        }
    }
}

/// Extension table for the three tracked media kinds (case-insensitive, no dot).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaSettings {
    pub still_extensions: Vec<String>,
    pub raw_extensions: Vec<String>,
    pub motion_extensions: Vec<String>,
}

impl Default for MediaSettings {
    fn default() -> Self {
        MediaSettings {
            still_extensions: vec!["JPG".into(), "JPEG".into()],
            raw_extensions: vec!["RAF".into()],
            motion_extensions: vec!["MOV".into(), "MP4".into()],
        }
    }
}
