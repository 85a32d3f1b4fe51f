//! External collaborators.
//!
//! The engine never shells out directly. Each subprocess tool sits behind a
//! small capability trait so that workflows can be driven by fakes in tests:
//!
//! - [`MetadataCopier`]: copy non-pixel metadata between two images (`exiftool`)
//! - [`MetadataExtractor`]: read rating and camera fields (`exiftool -json`)
//! - [`TreeSync`]: mirror a directory to a remote (`rsync`)
//! - [`ArtifactBuilder`]: build the gallery (configured command)
//! - [`Confirmer`]: approve a destructive step

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};

fn run_tool(program: &str, args: &[OsString], subject: &Path, cwd: Option<&Path>) -> Result<Output> {
    debug!(program, ?args, "running external tool");
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    let output = command.output().map_err(|e| EngineError::ToolUnavailable {
        tool: program.to_string(),
        reason: e.to_string(),
    })?;

    if !output.status.success() {
        return Err(EngineError::ExternalTool {
            tool: program.to_string(),
            path: subject.to_path_buf(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output)
}

fn probe_tool(program: &str, version_flag: &str) -> Result<()> {
    let status = Command::new(program)
        .arg(version_flag)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|e| EngineError::ToolUnavailable {
            tool: program.to_string(),
            reason: e.to_string(),
        })?;
    if status.success() {
        Ok(())
    } else {
        Err(EngineError::ToolUnavailable {
            tool: program.to_string(),
            reason: format!("'{} {}' exited with {}", program, version_flag, status),
        })
    }
}

// ---------------------------------------------------------------------------
// Metadata copy
// ---------------------------------------------------------------------------

/// Copies all non-pixel metadata from one image onto another, in place.
pub trait MetadataCopier {
    /// Fail with a precondition error when the capability is missing.
    fn ensure_available(&self) -> Result<()>;

    fn copy_metadata(&self, source: &Path, target: &Path) -> Result<()>;
}

/// `exiftool -TagsFromFile`
#[derive(Debug, Clone)]
pub struct ExiftoolMetadataCopier {
    program: String,
}

impl Default for ExiftoolMetadataCopier {
    fn default() -> Self {
        ExiftoolMetadataCopier {
            program: "exiftool".to_string(),
        }
    }
}

impl ExiftoolMetadataCopier {
    pub fn with_program(program: impl Into<String>) -> Self {
        ExiftoolMetadataCopier {
            program: program.into(),
        }
    }

    pub fn copy_args(source: &Path, target: &Path) -> Vec<OsString> {
        vec![
            "-overwrite_original".into(),
            "-TagsFromFile".into(),
            source.as_os_str().to_os_string(),
            "-all:all".into(),
            "-unsafe".into(),
            "-icc_profile".into(),
            target.as_os_str().to_os_string(),
        ]
    }
}

impl MetadataCopier for ExiftoolMetadataCopier {
    fn ensure_available(&self) -> Result<()> {
        probe_tool(&self.program, "-ver")
    }

    fn copy_metadata(&self, source: &Path, target: &Path) -> Result<()> {
        run_tool(&self.program, &Self::copy_args(source, target), target, None)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Metadata extraction
// ---------------------------------------------------------------------------

/// Publish-relevant metadata of one image.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImageMetadata {
    /// 0 when unset
    pub rating: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera_make: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iso: Option<u32>,
    /// e.g. `f/2.8`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aperture: Option<String>,
    /// e.g. `1/250` or `2.0`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shutter_speed: Option<String>,
    /// e.g. `23mm`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focal_length: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip)]
    pub width: Option<u32>,
    #[serde(skip)]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// ISO 8601, UTC marker appended
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_taken: Option<String>,
}

/// Reads [`ImageMetadata`] from an image file.
pub trait MetadataExtractor {
    fn extract(&self, path: &Path) -> Result<ImageMetadata>;
}

/// Tags requested from exiftool.
pub const EXTRACT_TAGS: &[&str] = &[
    "-Rating",
    "-Make",
    "-Model",
    "-ISO",
    "-FNumber",
    "-ExposureTime",
    "-FocalLength",
    "-GPSLatitude",
    "-GPSLongitude",
    "-ImageWidth",
    "-ImageHeight",
    "-Title",
    "-Description",
    "-DateTimeOriginal",
];

/// `exiftool -json -n`
#[derive(Debug, Clone)]
pub struct ExiftoolExtractor {
    program: String,
}

impl Default for ExiftoolExtractor {
    fn default() -> Self {
        ExiftoolExtractor {
            program: "exiftool".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ExiftoolRecord {
    rating: Option<Value>,
    make: Option<Value>,
    model: Option<Value>,
    #[serde(rename = "ISO")]
    iso: Option<Value>,
    f_number: Option<Value>,
    exposure_time: Option<Value>,
    focal_length: Option<Value>,
    #[serde(rename = "GPSLatitude")]
    gps_latitude: Option<Value>,
    #[serde(rename = "GPSLongitude")]
    gps_longitude: Option<Value>,
    image_width: Option<Value>,
    image_height: Option<Value>,
    title: Option<Value>,
    description: Option<Value>,
    date_time_original: Option<Value>,
}

fn as_f64(value: &Option<Value>) -> Option<f64> {
    match value.as_ref()? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_text(value: &Option<Value>) -> Option<String> {
    let text = match value.as_ref()? {
        Value::String(s) => s.trim().trim_end_matches('\0').to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn format_shutter(exposure: f64) -> Option<String> {
    if exposure <= 0.0 {
        None
    } else if exposure >= 1.0 {
        Some(format!("{:.1}", exposure))
    } else {
        Some(format!("1/{:.0}", 1.0 / exposure))
    }
}

fn format_date(raw: &str) -> String {
    chrono::NaiveDateTime::parse_from_str(raw, "%Y:%m:%d %H:%M:%S")
        .map(|dt| format!("{}Z", dt.format("%Y-%m-%dT%H:%M:%S")))
        .unwrap_or_else(|_| raw.to_string())
}

fn round6(v: f64) -> f64 {
    (v * 1e6).round() / 1e6
}

/// Parse the output of `exiftool -json -n` for a single file.
pub fn parse_exiftool_json(json: &str, path: &Path) -> Result<ImageMetadata> {
    let malformed = |reason: String| EngineError::MalformedContent {
        path: path.to_path_buf(),
        kind: "exiftool JSON",
        reason,
    };
    let mut records: Vec<ExiftoolRecord> =
        serde_json::from_str(json).map_err(|e| malformed(e.to_string()))?;
    if records.is_empty() {
        return Err(malformed("no records".to_string()));
    }
    let record = records.swap_remove(0);

    let rating = as_f64(&record.rating)
        .map(|r| r.clamp(0.0, 5.0) as u8)
        .unwrap_or(0);
    let (latitude, longitude) = match (as_f64(&record.gps_latitude), as_f64(&record.gps_longitude)) {
        (Some(lat), Some(lon)) => (Some(round6(lat)), Some(round6(lon))),
        _ => (None, None),
    };

    Ok(ImageMetadata {
        rating,
        camera_make: as_text(&record.make),
        camera_model: as_text(&record.model),
        iso: as_f64(&record.iso).map(|v| v as u32),
        aperture: as_f64(&record.f_number)
            .filter(|f| *f > 0.0)
            .map(|f| format!("f/{:.1}", f)),
        shutter_speed: as_f64(&record.exposure_time).and_then(format_shutter),
        focal_length: as_f64(&record.focal_length)
            .filter(|f| *f > 0.0)
            .map(|f| format!("{:.0}mm", f)),
        latitude,
        longitude,
        width: as_f64(&record.image_width).map(|v| v as u32),
        height: as_f64(&record.image_height).map(|v| v as u32),
        title: as_text(&record.title),
        description: as_text(&record.description),
        date_taken: as_text(&record.date_time_original).map(|d| format_date(&d)),
    })
}

impl MetadataExtractor for ExiftoolExtractor {
    fn extract(&self, path: &Path) -> Result<ImageMetadata> {
        let mut args: Vec<OsString> = vec!["-json".into(), "-n".into()];
        args.extend(EXTRACT_TAGS.iter().map(OsString::from));
        args.push(path.as_os_str().to_os_string());

        let output = run_tool(&self.program, &args, path, None)?;
        let mut metadata = parse_exiftool_json(&String::from_utf8_lossy(&output.stdout), path)?;

        if metadata.width.is_none() || metadata.height.is_none() {
            if let Ok((w, h)) = image::image_dimensions(path) {
                metadata.width = Some(w);
                metadata.height = Some(h);
            }
        }
        Ok(metadata)
    }
}

// ---------------------------------------------------------------------------
// Remote sync
// ---------------------------------------------------------------------------

/// How a sync reaches its destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncRoute {
    Direct,
    /// Through an SSH jump host
    Jump(String),
}

impl std::fmt::Display for SyncRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncRoute::Direct => write!(f, "direct"),
            SyncRoute::Jump(host) => write!(f, "via {}", host),
        }
    }
}

/// Mirrors a local tree onto a destination (deleting extras, resumable).
pub trait TreeSync {
    fn sync(&self, local: &Path, remote: &str, route: &SyncRoute) -> Result<()>;
}

/// `rsync -a --delete --partial`
#[derive(Debug, Clone)]
pub struct RsyncSync {
    program: String,
}

impl RsyncSync {
    pub fn new(program: impl Into<String>) -> Self {
        RsyncSync {
            program: program.into(),
        }
    }

    pub fn sync_args(local: &Path, remote: &str, route: &SyncRoute) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-a".into(),
            "--delete".into(),
            "--partial".into(),
            "--human-readable".into(),
        ];
        if let SyncRoute::Jump(host) = route {
            args.push("-e".into());
            args.push(format!("ssh -J {}", host).into());
        }
        // Trailing slash: copy the directory's contents, not the directory.
        let mut source = local.as_os_str().to_os_string();
        if !local.as_os_str().to_string_lossy().ends_with('/') {
            source.push("/");
        }
        args.push(source);
        args.push(remote.into());
        args
    }
}

impl TreeSync for RsyncSync {
    fn sync(&self, local: &Path, remote: &str, route: &SyncRoute) -> Result<()> {
        run_tool(&self.program, &Self::sync_args(local, remote, route), local, None)?;
        Ok(())
    }
}

/// Try the direct route, then each jump host once, in order.
///
/// Returns the route that worked, or the last failure.
pub fn sync_with_fallback(
    sync: &dyn TreeSync,
    local: &Path,
    remote: &str,
    jump_hosts: &[String],
) -> Result<SyncRoute> {
    let routes = std::iter::once(SyncRoute::Direct)
        .chain(jump_hosts.iter().cloned().map(SyncRoute::Jump));

    let mut last_error = None;
    for route in routes {
        match sync.sync(local, remote, &route) {
            Ok(()) => {
                info!(local = %local.display(), remote, %route, "sync complete");
                return Ok(route);
            }
            Err(e) => {
                warn!(remote, %route, error = %e, "sync route failed");
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| EngineError::ToolUnavailable {
        tool: "sync".to_string(),
        reason: "no route configured".to_string(),
    }))
}

// ---------------------------------------------------------------------------
// Artifact build
// ---------------------------------------------------------------------------

/// Builds the publishable artifact inside a source tree.
pub trait ArtifactBuilder {
    fn build(&self, source_tree: &Path) -> Result<()>;
}

/// Runs a configured command (e.g. `npm run build`) in the source tree.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    command: Vec<String>,
}

impl CommandBuilder {
    /// `None` when the command is empty.
    pub fn new(command: &[String]) -> Option<Self> {
        if command.is_empty() {
            None
        } else {
            Some(CommandBuilder {
                command: command.to_vec(),
            })
        }
    }
}

impl ArtifactBuilder for CommandBuilder {
    fn build(&self, source_tree: &Path) -> Result<()> {
        let Some((program, rest)) = self.command.split_first() else {
            return Ok(());
        };
        let args: Vec<OsString> = rest.iter().map(OsString::from).collect();
        let output = run_tool(program, &args, source_tree, Some(source_tree))?;
        debug!(
            stdout = %String::from_utf8_lossy(&output.stdout).trim(),
            "build output"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Confirmation
// ---------------------------------------------------------------------------

/// Approves or declines a destructive step.
pub trait Confirmer {
    fn confirm(&self, prompt: &str, items: &[PathBuf]) -> bool;
}

/// Approves everything (`--yes`).
#[derive(Debug, Default, Clone, Copy)]
pub struct AssumeYes;

impl Confirmer for AssumeYes {
    fn confirm(&self, _prompt: &str, _items: &[PathBuf]) -> bool {
        true
    }
}
