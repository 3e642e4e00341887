//! Command line parsing and mode selection.
//!
//! The argument vector resolves to exactly one [`Mode`]. Malformed input is
//! reported on the error stream with usage on standard output and yields
//! [`CliError::InvalidArguments`]; it never produces a crash report.

use atlas_common::Metadata;
use clap::{CommandFactory, Parser};
use std::ffi::OsString;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::log_sink::{FileListener, LogSink, FILE_LISTENER};

/// Errors raised while routing the command line.
#[derive(Debug, Error)]
pub enum CliError {
    /// The arguments could not be parsed.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(#[from] clap::Error),

    /// Help or version text could not be written.
    #[error("Failed to write to console: {0}")]
    Output(#[from] io::Error),
}

#[derive(Parser, Debug)]
#[command(
    name = "atlas",
    about = "Seed map viewer and world analysis tool",
    disable_help_flag = true,
    disable_version_flag = true
)]
struct Args {
    /// Also write the diagnostic log to FILE
    #[arg(short, long, value_name = "FILE")]
    log: Option<PathBuf>,

    /// Root directory of the game installation
    #[arg(long, value_name = "DIR")]
    game_dir: Option<PathBuf>,

    /// File recording previously viewed seeds
    #[arg(long, value_name = "FILE")]
    history: Option<PathBuf>,

    /// Print usage and exit
    #[arg(short, long)]
    help: bool,

    /// Print the version and exit
    #[arg(short = 'v', long)]
    version: bool,
}

/// Parsed command line. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandLineParameters {
    log_file: Option<PathBuf>,
    game_dir: Option<PathBuf>,
    history_file: Option<PathBuf>,
    help: bool,
    version: bool,
}

impl CommandLineParameters {
    /// Log file requested with `--log`.
    #[must_use]
    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }

    /// Game installation directory requested with `--game-dir`.
    #[must_use]
    pub fn game_dir(&self) -> Option<&Path> {
        self.game_dir.as_deref()
    }

    /// Seed history file requested with `--history`.
    #[must_use]
    pub fn history_file(&self) -> Option<&Path> {
        self.history_file.as_deref()
    }

    /// Whether `--help` was given.
    #[must_use]
    pub fn help(&self) -> bool {
        self.help
    }

    /// Whether `--version` was given.
    #[must_use]
    pub fn version(&self) -> bool {
        self.version
    }
}

impl From<Args> for CommandLineParameters {
    fn from(args: Args) -> Self {
        Self {
            log_file: args.log,
            game_dir: args.game_dir,
            history_file: args.history,
            help: args.help,
            version: args.version,
        }
    }
}

/// Execution mode selected from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Usage was printed.
    ShowHelp,
    /// The version was printed.
    ShowVersion,
    /// Start the application.
    Run(CommandLineParameters),
}

/// Parses the command line and resolves the execution mode.
pub struct CommandLineRouter {
    metadata: Arc<Metadata>,
    log: Arc<LogSink>,
}

impl CommandLineRouter {
    /// Creates a router printing version text from `metadata`.
    #[must_use]
    pub fn new(metadata: Arc<Metadata>, log: Arc<LogSink>) -> Self {
        Self { metadata, log }
    }

    /// Full usage text.
    #[must_use]
    pub fn usage(&self) -> String {
        format!("{}\n\n{}", self.metadata.version_text(), Args::command().render_help())
    }

    /// Parses `args` (program name first) and resolves the mode.
    ///
    /// Help and version text go to `out`. On malformed input the parse error
    /// goes to `err`, usage goes to `out`, and the error is returned.
    pub fn route<I, T>(
        &self,
        args: I,
        out: &mut impl Write,
        err: &mut impl Write,
    ) -> Result<Mode, CliError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let args = match Args::try_parse_from(args) {
            Ok(args) => args,
            Err(e) => {
                // Console failures must not hide the argument error.
                let _ = write!(err, "{e}");
                let _ = writeln!(out, "{}", self.usage());
                return Err(CliError::InvalidArguments(e));
            },
        };
        let parameters = CommandLineParameters::from(args);

        if let Some(path) = parameters.log_file() {
            self.attach_log_file(path);
        }

        if parameters.help() {
            writeln!(out, "{}", self.usage())?;
            Ok(Mode::ShowHelp)
        } else if parameters.version() {
            writeln!(out, "{}", self.metadata.version_text())?;
            Ok(Mode::ShowVersion)
        } else {
            Ok(Mode::Run(parameters))
        }
    }

    fn attach_log_file(&self, path: &Path) {
        let listener = match FileListener::create(path) {
            Ok(listener) => listener,
            Err(e) => {
                warn!("Unable to open log file {}: {e}", path.display());
                return;
            },
        };
        match self.log.add_listener(FILE_LISTENER, Arc::new(listener)) {
            Ok(()) => info!("Logging to {}", path.display()),
            Err(e) => warn!("Unable to attach log file {}: {e}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_sink::LogLevel;
    use tempfile::TempDir;

    fn router() -> (CommandLineRouter, Arc<LogSink>) {
        let metadata = Arc::new(Metadata::load().expect("metadata"));
        let log = Arc::new(LogSink::new());
        (CommandLineRouter::new(metadata, log.clone()), log)
    }

    fn route(args: &[&str]) -> (Result<Mode, CliError>, String, String, Arc<LogSink>) {
        let (router, log) = router();
        let mut out = Vec::new();
        let mut err = Vec::new();
        let argv = std::iter::once("atlas").chain(args.iter().copied());
        let result = router.route(argv, &mut out, &mut err);
        (
            result,
            String::from_utf8(out).expect("utf8 stdout"),
            String::from_utf8(err).expect("utf8 stderr"),
            log,
        )
    }

    #[test]
    fn test_no_arguments_runs() {
        let (result, out, err, _) = route(&[]);
        assert_eq!(result.expect("valid"), Mode::Run(CommandLineParameters::default()));
        assert!(out.is_empty());
        assert!(err.is_empty());
    }

    #[test]
    fn test_version_printed_once() {
        let (result, out, err, _) = route(&["--version"]);
        assert_eq!(result.expect("valid"), Mode::ShowVersion);

        let metadata = Metadata::load().expect("metadata");
        assert_eq!(out, format!("{}\n", metadata.version_text()));
        assert_eq!(out.matches(&metadata.version_text()).count(), 1);
        assert!(err.is_empty());
    }

    #[test]
    fn test_help_lists_options() {
        let (result, out, _, _) = route(&["-h"]);
        assert_eq!(result.expect("valid"), Mode::ShowHelp);
        assert!(out.contains("--log"));
        assert!(out.contains("--game-dir"));
        assert!(out.contains("--history"));
    }

    #[test]
    fn test_help_wins_over_version() {
        let (result, _, _, _) = route(&["--version", "--help"]);
        assert_eq!(result.expect("valid"), Mode::ShowHelp);
    }

    #[test]
    fn test_unknown_flag_is_invalid() {
        let (result, out, err, _) = route(&["--bogus"]);
        assert!(matches!(result, Err(CliError::InvalidArguments(_))));
        assert!(err.contains("--bogus"));
        assert!(out.contains("Usage"));
    }

    #[test]
    fn test_missing_option_value_is_invalid() {
        let (result, _, err, _) = route(&["--log"]);
        assert!(matches!(result, Err(CliError::InvalidArguments(_))));
        assert!(!err.is_empty());
    }

    #[test]
    fn test_run_parameters() {
        let (result, _, _, _) = route(&["--game-dir", "/games/mc", "--history", "seeds.txt"]);
        let Mode::Run(parameters) = result.expect("valid") else {
            panic!("expected run mode");
        };
        assert_eq!(parameters.game_dir(), Some(Path::new("/games/mc")));
        assert_eq!(parameters.history_file(), Some(Path::new("seeds.txt")));
        assert_eq!(parameters.log_file(), None);
    }

    #[test]
    fn test_log_file_attached_before_mode_logic() {
        let dir = TempDir::new().expect("create temp dir");
        let path = dir.path().join("atlas.log");
        let path_arg = path.to_string_lossy().into_owned();

        let (result, _, _, log) = route(&["--log", &path_arg, "--version"]);
        assert_eq!(result.expect("valid"), Mode::ShowVersion);
        assert_eq!(
            log.listener_names().expect("names"),
            vec![FILE_LISTENER.to_string()]
        );

        log.log(LogLevel::Info, "after setup").expect("append");
        let contents = std::fs::read_to_string(&path).expect("read log file");
        assert!(contents.contains("after setup"));
    }

    #[test]
    fn test_unwritable_log_file_is_not_fatal() {
        let dir = TempDir::new().expect("create temp dir");
        // A directory cannot be opened as a log file.
        let path_arg = dir.path().to_string_lossy().into_owned();

        let (result, _, _, log) = route(&["--log", &path_arg]);
        assert!(matches!(result.expect("valid"), Mode::Run(_)));
        assert!(log.listener_names().expect("names").is_empty());
    }
}
