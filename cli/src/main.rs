//! photoflow - Command-line interface for the photo workflow engine.
//!
//! One subcommand per lifecycle operation. Progress goes to stderr, the final
//! report to stdout.

use std::cell::Cell;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Parser, Subcommand};
use photoflow_engine::external::{
    ArtifactBuilder, AssumeYes, CommandBuilder, Confirmer, ExiftoolExtractor,
    ExiftoolMetadataCopier, RsyncSync,
};
use photoflow_engine::{
    Collaborators, Config, EngineError, ErrorKind, Operation, ProgressCallback, StepStatus,
    Tally, TransferOutcome, Workflow,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// photoflow - camera card to gallery, verified at every step
#[derive(Parser, Debug)]
#[command(name = "photoflow")]
#[command(version)]
#[command(about = "Import, finalize and publish photos from a camera card")]
struct Args {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Per-item progress and debug logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug, Clone, Copy, Default)]
struct RunArgs {
    /// Report what would happen without changing anything
    #[arg(long)]
    dry_run: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show what is pending on each storage role
    Status,
    /// Copy new media off the camera card
    Import(RunArgs),
    /// Compress staged photos into the final archive
    Finalize(RunArgs),
    /// Delete RAW files whose photo was never finalized
    Cleanup {
        #[command(flatten)]
        run: RunArgs,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Sync the gallery with the final archive, build and deploy it
    Publish(RunArgs),
    /// Mirror the archives to the backup target
    Backup(RunArgs),
    /// Re-compress every photo in the final archive
    Recompress {
        #[command(flatten)]
        run: RunArgs,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

/// Why a run did not fully succeed.
#[derive(Debug)]
enum CliError {
    /// Some items failed, or a confirmation was declined
    Partial(String),
    /// Configuration or precondition failure; nothing was changed
    Fatal(String),
}

impl CliError {
    fn exit_code(&self) -> i32 {
        match self {
            CliError::Partial(_) => 1,
            CliError::Fatal(_) => 2,
        }
    }

    fn message(&self) -> &str {
        match self {
            CliError::Partial(msg) | CliError::Fatal(msg) => msg,
        }
    }
}

impl From<EngineError> for CliError {
    fn from(e: EngineError) -> Self {
        match e.kind() {
            ErrorKind::ConfirmationDeclined => CliError::Partial(e.to_string()),
            kind => CliError::Fatal(format!("[{}] {}", kind, e)),
        }
    }
}

/// CLI implementation of ProgressCallback
struct CliProgress {
    verbose: bool,
    start_time: Instant,
    total: Cell<usize>,
}

impl CliProgress {
    fn new(verbose: bool) -> Self {
        CliProgress {
            verbose,
            start_time: Instant::now(),
            total: Cell::new(0),
        }
    }

    fn format_duration(elapsed: std::time::Duration) -> String {
        let secs = elapsed.as_secs();
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        let secs = secs % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, mins, secs)
        } else if mins > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}s", secs)
        }
    }

    fn print_progress_bar(percent: u32) -> String {
        let filled = (percent.min(100) / 5) as usize;
        let empty = 20 - filled;
        format!("[{}{}] {}%", "=".repeat(filled), " ".repeat(empty), percent)
    }
}

fn file_name(path: &Path) -> &str {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("(unknown)")
}

impl ProgressCallback for CliProgress {
    fn on_operation_started(&self, operation: Operation, total: usize) {
        self.total.set(total);
        eprintln!("Starting {}: {} item(s)", operation, total);
    }

    fn on_item_started(&self, index: usize, path: &Path) {
        if self.verbose {
            eprintln!("[{:3}] Starting: {}", index, file_name(path));
        }
    }

    fn on_item_completed(&self, index: usize, path: &Path, outcome: &TransferOutcome) {
        if self.verbose {
            eprintln!("[{:3}] {}: {}", index, outcome, file_name(path));
            return;
        }
        let total = self.total.get().max(1);
        let percent = ((index + 1) as f64 / total as f64 * 100.0) as u32;
        eprint!(
            "\rProgress: {} {}/{}",
            Self::print_progress_bar(percent),
            index + 1,
            total
        );
        let _ = std::io::stderr().flush();
    }

    fn on_message(&self, message: &str) {
        eprintln!("{}", message);
    }

    fn on_operation_completed(&self, operation: Operation, tally: &Tally) {
        if !self.verbose && tally.total() > 0 {
            eprintln!();
        }
        eprintln!("{} complete: {}", operation, tally);
        eprintln!("Elapsed: {}", Self::format_duration(self.start_time.elapsed()));

        if tally.has_failures() {
            eprintln!();
            eprintln!("Failed files:");
            for failure in &tally.failures {
                eprintln!("  {}", failure);
            }
        }
    }
}

/// Prompts on stderr and reads the answer from stdin.
struct StdinConfirmer;

impl Confirmer for StdinConfirmer {
    fn confirm(&self, prompt: &str, items: &[PathBuf]) -> bool {
        eprint!("{} ({} item(s)) [y/N] ", prompt, items.len());
        let _ = std::io::stderr().flush();

        let mut answer = String::new();
        if std::io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    let exit_code = match run_cli(&args) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {}", e.message());
            e.exit_code()
        }
    };

    std::process::exit(exit_code);
}

fn load_config(args: &Args) -> Result<Config, CliError> {
    let path = match &args.config {
        Some(path) => path.clone(),
        None => Config::default_path()
            .filter(|p| p.exists())
            .ok_or_else(|| {
                CliError::Fatal(
                    "No configuration file found; pass --config or create one in the user config directory"
                        .to_string(),
                )
            })?,
    };
    debug!(path = %path.display(), "loading configuration");
    Config::from_file(&path).map_err(CliError::from)
}

fn partial_if(has_failures: bool, what: &str) -> Result<(), CliError> {
    if has_failures {
        Err(CliError::Partial(format!("One or more items failed during {}", what)))
    } else {
        Ok(())
    }
}

fn describe_step(status: &StepStatus) -> String {
    match status {
        StepStatus::NotConfigured => "not configured".to_string(),
        StepStatus::DryRun => "dry run".to_string(),
        StepStatus::Skipped => "skipped".to_string(),
        StepStatus::Done => "done".to_string(),
        StepStatus::Synced(route) => format!("synced ({})", route),
        StepStatus::Failed(failure) => format!("failed: {}", failure),
    }
}

/// Main CLI logic - separated for testability
fn run_cli(args: &Args) -> Result<(), CliError> {
    let config = load_config(args)?;

    let copier = ExiftoolMetadataCopier::default();
    let extractor = ExiftoolExtractor::default();
    let sync = RsyncSync::new(config.remote.rsync_program());
    let builder = CommandBuilder::new(&config.publish.build_command);
    let confirm_all = matches!(
        args.command,
        Command::Cleanup { yes: true, .. } | Command::Recompress { yes: true, .. }
    );
    let confirmer: &dyn Confirmer = if confirm_all { &AssumeYes } else { &StdinConfirmer };
    let tools = Collaborators {
        metadata_copier: &copier,
        extractor: &extractor,
        sync: &sync,
        builder: builder.as_ref().map(|b| b as &dyn ArtifactBuilder),
        confirmer,
    };

    let run = match &args.command {
        Command::Status => RunArgs::default(),
        Command::Import(run)
        | Command::Finalize(run)
        | Command::Publish(run)
        | Command::Backup(run)
        | Command::Cleanup { run, .. }
        | Command::Recompress { run, .. } => *run,
    };
    if run.dry_run {
        println!("Dry run: nothing will be changed");
    }

    let progress = CliProgress::new(args.verbose);
    let mut workflow = Workflow::new(&config, tools, run.dry_run).with_progress(&progress);

    match &args.command {
        Command::Status => {
            let status = workflow.status()?;
            let yes_no = |b: bool| if b { "connected" } else { "not connected" };
            println!("Camera:        {}", yes_no(status.camera_connected));
            println!("Bulk storage:  {}", yes_no(status.bulk_storage_connected));
            println!(
                "On camera:     {} video(s), {} new photo(s), {} RAW file(s)",
                status.pending_clips, status.pending_stills, status.pending_raws
            );
            println!("In staging:    {} photo(s)", status.staging_files);
            println!("Orphaned RAWs: {}", status.orphaned_raws);
            println!("In bulk:       {} video(s)", status.archived_clips);
            println!("Published:     {} photo(s)", status.published_photos);
            Ok(())
        }
        Command::Import(_) => {
            let report = workflow.import()?;
            println!("Videos: {}", report.clips);
            println!("Photos: {}", report.stills);
            println!("RAWs:   {}", report.raws);
            if report.skipped_finalized > 0 {
                println!("Already finalized: {}", report.skipped_finalized);
            }
            partial_if(report.has_failures(), "import")
        }
        Command::Finalize(_) => {
            let report = workflow.finalize()?;
            println!("Finalized:          {}", report.finalized);
            println!("Copied to camera:   {}", report.copied_to_device);
            println!("RAWs off camera:    {}", report.device_raws_removed);
            println!("Orphaned RAWs:      {}", report.orphaned_raws.len());
            partial_if(report.has_failures(), "finalize")
        }
        Command::Cleanup { .. } => {
            let report = workflow.cleanup()?;
            println!("Orphans: {}", report.orphans.len());
            println!("Removed: {}", report.removed);
            partial_if(report.has_failures(), "cleanup")
        }
        Command::Publish(_) => {
            let report = workflow.publish()?;
            println!("Added:       {}", report.added);
            println!("Removed:     {}", report.removed);
            println!("Unchanged:   {}", report.plan.unchanged.len());
            if report.unreadable.has_failures() {
                println!("Unreadable:  {}", report.unreadable.failed);
            }
            println!("Manifest:    {}", report.manifest);
            println!("Build:       {}", describe_step(&report.build));
            println!("Deploy:      {}", describe_step(&report.sync));
            partial_if(report.has_failures(), "publish")
        }
        Command::Backup(_) => {
            let report = workflow.backup()?;
            println!("Final archive: {}", describe_step(&report.final_archive));
            println!("RAW archive:   {}", describe_step(&report.raw_archive));
            partial_if(report.has_failures(), "backup")
        }
        Command::Recompress { .. } => {
            let report = workflow.recompress()?;
            println!("Recompressed: {}", report.compressed);
            partial_if(report.has_failures(), "recompress")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    struct Setup {
        _temp: TempDir,
        root: PathBuf,
        config_path: PathBuf,
    }

    /// A config whose storage roles all live in one temp dir.
    fn setup() -> Setup {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let root = temp.path().to_path_buf();
        for dir in ["card/DCIM/100_FUJI", "staging", "raws", "final", "ssd"] {
            fs::create_dir_all(root.join(dir)).expect("Failed to create dir");
        }
        let config = format!(
            r#"
[storage]
capture_source = "{root}/card/DCIM"
staging = "{root}/staging"
raw_archive = "{root}/raws"
final_archive = "{root}/final"
bulk_storage = "{root}/ssd"
"#,
            root = root.display()
        );
        let config_path = root.join("photoflow.toml");
        fs::write(&config_path, config).expect("Failed to write config");
        Setup {
            _temp: temp,
            root,
            config_path,
        }
    }

    fn parse(setup: &Setup, rest: &[&str]) -> Args {
        let config = setup.config_path.to_string_lossy().into_owned();
        let mut argv = vec!["photoflow", "--config", config.as_str()];
        argv.extend_from_slice(rest);
        Args::try_parse_from(argv).expect("Failed to parse arguments")
    }

    #[test]
    fn test_parses_subcommands_and_flags() {
        let args = Args::try_parse_from(["photoflow", "cleanup", "--dry-run", "--yes", "--verbose"])
            .expect("Failed to parse");
        assert!(args.verbose);
        assert!(matches!(
            args.command,
            Command::Cleanup {
                run: RunArgs { dry_run: true },
                yes: true
            }
        ));

        let args = Args::try_parse_from(["photoflow", "import"]).expect("Failed to parse");
        assert!(matches!(args.command, Command::Import(RunArgs { dry_run: false })));
    }

    #[test]
    fn test_rejects_unknown_subcommand_and_flags() {
        assert!(Args::try_parse_from(["photoflow", "transfer"]).is_err());
        assert!(Args::try_parse_from(["photoflow", "import", "--yes"]).is_err());
        assert!(Args::try_parse_from(["photoflow"]).is_err());
    }

    #[test]
    fn test_cli_status() {
        let setup = setup();
        let result = run_cli(&parse(&setup, &["status"]));
        assert!(result.is_ok(), "status should succeed: {:?}", result);
    }

    #[test]
    fn test_cli_import() {
        let setup = setup();
        let card = setup.root.join("card/DCIM/100_FUJI");
        fs::write(card.join("DSCF0001.JPG"), b"jpeg").expect("Failed to write file");
        fs::write(card.join("DSCF0001.RAF"), b"raw").expect("Failed to write file");

        let result = run_cli(&parse(&setup, &["import"]));
        assert!(result.is_ok(), "import should succeed: {:?}", result);
        assert!(setup.root.join("staging/DSCF0001.JPG").exists());
        assert!(setup.root.join("raws/DSCF0001.RAF").exists());
    }

    #[test]
    fn test_cli_import_dry_run_writes_nothing() {
        let setup = setup();
        let card = setup.root.join("card/DCIM/100_FUJI");
        fs::write(card.join("DSCF0002.MOV"), b"clip").expect("Failed to write file");

        let result = run_cli(&parse(&setup, &["import", "--dry-run"]));
        assert!(result.is_ok(), "dry run should succeed: {:?}", result);
        assert!(card.join("DSCF0002.MOV").exists());
        assert!(!setup.root.join("ssd/DSCF0002.MOV").exists());
    }

    #[test]
    fn test_cli_cleanup_with_yes() {
        let setup = setup();
        fs::write(setup.root.join("raws/A.RAF"), b"a").expect("Failed to write file");
        fs::write(setup.root.join("raws/B.RAF"), b"b").expect("Failed to write file");
        fs::write(setup.root.join("final/A.JPG"), b"final").expect("Failed to write file");

        let result = run_cli(&parse(&setup, &["cleanup", "--yes"]));
        assert!(result.is_ok(), "cleanup should succeed: {:?}", result);
        assert!(setup.root.join("raws/A.RAF").exists());
        assert!(!setup.root.join("raws/B.RAF").exists());
    }

    #[test]
    fn test_cli_missing_role_is_fatal() {
        let setup = setup();
        fs::remove_dir_all(setup.root.join("staging")).expect("Failed to remove staging");

        let err = run_cli(&parse(&setup, &["finalize"])).expect_err("staging is missing");
        assert_eq!(err.exit_code(), 2);
        assert!(err.message().contains("staging"));
    }

    #[test]
    fn test_cli_unconfigured_backup_is_fatal() {
        let setup = setup();
        let err = run_cli(&parse(&setup, &["backup"])).expect_err("no backup target");
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_cli_rejects_missing_config() {
        let args = Args::try_parse_from(["photoflow", "--config", "/nonexistent/photoflow.toml", "status"])
            .expect("Failed to parse");
        let err = run_cli(&args).expect_err("config is missing");
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_cli_rejects_invalid_config() {
        let setup = setup();
        fs::write(&setup.config_path, "[compression]\nquality = 0\n").expect("Failed to write config");
        let err = run_cli(&parse(&setup, &["status"])).expect_err("quality 0 is invalid");
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_declined_confirmation_exits_one() {
        let err = CliError::from(EngineError::ConfirmationDeclined { pending: 2 });
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_format_duration() {
        use std::time::Duration;
        assert_eq!(CliProgress::format_duration(Duration::from_secs(5)), "5s");
        assert_eq!(CliProgress::format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(CliProgress::format_duration(Duration::from_secs(3725)), "1h 2m 5s");
    }
}
