//! Crash Reporting System
//!
//! Turns a failure into a diagnostic report, shows it to the user on the UI
//! thread and terminates the process with [`ExitStatus::Crashed`].
//!
//! Reporting runs an ordered chain of [`CrashStage`]s. The first stage logs
//! the failure and schedules the diagnostic surface; if anything in it fails
//! the console stage prints straight to standard error and terminates. The
//! console stage has no dependencies and cannot fail.

use atlas_common::Metadata;
use parking_lot::Mutex;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::io::{self, BufRead, Write};
use std::panic::{self, AssertUnwindSafe, PanicHookInfo};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use thiserror::Error;

use crate::exit_handler::{ExitStatus, Terminator};
use crate::log_sink::{current_thread_label, LogEntry, LogError, LogLevel, LogSink};
use crate::ui_context::{UiError, UiHandle};

/// Message used when the application returns an error.
pub const APPLICATION_CRASHED: &str = "The application crashed";

/// Message used when packaged metadata cannot be loaded.
pub const METADATA_UNAVAILABLE: &str = "Unable to load application metadata";

thread_local! {
    /// Set while the current thread is inside the crash path.
    static IN_CRASH_PATH: Cell<bool> = const { Cell::new(false) };

    /// Message and detail of the report the current thread is displaying.
    /// Taken by whoever prints it first.
    static PENDING_PRIMARY: RefCell<Option<(String, String)>> = const { RefCell::new(None) };
}

/// Marks the current thread as inside the crash path until dropped.
struct CrashPathGuard {
    previous: bool,
}

impl CrashPathGuard {
    fn enter() -> Self {
        Self {
            previous: IN_CRASH_PATH.with(|flag| flag.replace(true)),
        }
    }
}

impl Drop for CrashPathGuard {
    fn drop(&mut self) {
        IN_CRASH_PATH.with(|flag| flag.set(self.previous));
    }
}

/// Errors raised inside the diagnostic stage.
#[derive(Debug, Error)]
pub enum CrashError {
    /// The log sink rejected the crash entry or the snapshot.
    #[error("Log sink unavailable: {0}")]
    Log(#[from] LogError),

    /// The diagnostic surface could not be scheduled.
    #[error("Could not schedule diagnostic surface: {0}")]
    Schedule(#[from] UiError),

    /// The crash path was re-entered on the same thread.
    #[error("Crash raised while already reporting a crash")]
    Reentrant,
}

/// Errors raised by a diagnostic surface.
#[derive(Debug, Error)]
pub enum SurfaceError {
    /// Writing the report or reading the acknowledgment failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The surface is not available in this environment.
    #[error("Diagnostic surface unavailable: {0}")]
    Unavailable(String),
}

/// Where a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// A panic on any thread
    Panic,
    /// An error returned by the application
    Application,
    /// A failure during launcher startup
    Startup,
}

impl FailureKind {
    /// Returns display name.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Panic => "Panic",
            Self::Application => "Application error",
            Self::Startup => "Startup error",
        }
    }
}

/// Description of a failure routed to the crash reporter.
#[derive(Debug, Clone)]
pub struct Failure {
    /// Origin of the failure
    pub kind: FailureKind,
    /// Identity of the failing thread
    pub thread: String,
    /// Failure text; may be empty
    pub detail: String,
    /// Source location (`file:line:column`), if known
    pub location: Option<String>,
    /// Captured backtrace, if any
    pub backtrace: Option<String>,
}

impl Failure {
    /// Creates a failure attributed to the calling thread.
    #[must_use]
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            thread: current_thread_label(),
            detail: detail.into(),
            location: None,
            backtrace: None,
        }
    }

    /// Captures a panic from inside a panic hook.
    #[must_use]
    pub fn from_panic(info: &PanicHookInfo<'_>) -> Self {
        let payload = info.payload();
        let detail = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            String::new()
        };

        Self {
            location: info
                .location()
                .map(|loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column())),
            backtrace: Some(std::backtrace::Backtrace::force_capture().to_string()),
            ..Self::new(FailureKind::Panic, detail)
        }
    }

    /// Wraps an error returned across the application boundary.
    #[must_use]
    pub fn from_error(kind: FailureKind, error: &anyhow::Error) -> Self {
        Self::new(kind, format!("{error:#}"))
    }

    /// Overrides the failing thread.
    #[must_use]
    pub fn on_thread(mut self, thread: impl Into<String>) -> Self {
        self.thread = thread.into();
        self
    }

    /// One-line summary including the thread and location.
    #[must_use]
    pub fn summary(&self) -> String {
        let detail = if self.detail.trim().is_empty() {
            "(no further detail)"
        } else {
            self.detail.as_str()
        };
        match &self.location {
            Some(location) => format!(
                "{} in thread '{}' at {location}: {detail}",
                self.kind.display_name(),
                self.thread
            ),
            None => format!(
                "{} in thread '{}': {detail}",
                self.kind.display_name(),
                self.thread
            ),
        }
    }
}

/// A report shown to the user once and then discarded.
#[derive(Debug, Clone)]
pub struct CrashReport {
    /// Short human readable message
    pub message: String,
    /// Full ordered log at the time of the crash
    pub log_snapshot: String,
    /// Application name and version, if metadata was loaded
    pub app_version: Option<String>,
}

impl CrashReport {
    /// Plain-text rendering of the report.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(version) = &self.app_version {
            out.push_str(version);
            out.push('\n');
        }
        out.push_str(&self.message);
        out.push_str("\n\n");
        out.push_str(&self.log_snapshot);
        out
    }
}

/// A user-facing element that presents a [`CrashReport`].
pub trait DiagnosticSurface: Send + Sync {
    /// Shows `report` and blocks until the user acknowledges it.
    fn show(&self, report: &CrashReport) -> Result<(), SurfaceError>;
}

/// Prints the report to standard error and waits for Enter.
///
/// End of input on standard input counts as acknowledgment.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalSurface;

impl DiagnosticSurface for TerminalSurface {
    fn show(&self, report: &CrashReport) -> Result<(), SurfaceError> {
        {
            let stderr = io::stderr();
            let mut out = stderr.lock();
            writeln!(out, "\n╔══════════════════════════════════════════╗")?;
            writeln!(out, "║              FATAL ERROR                 ║")?;
            writeln!(out, "╚══════════════════════════════════════════╝")?;
            writeln!(out, "{}", report.render())?;
            writeln!(out, "Press Enter to exit.")?;
            out.flush()?;
        }

        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(())
    }
}

/// Keeps every report and acknowledges immediately.
///
/// Used for headless runs and tests.
#[derive(Debug, Default)]
pub struct RecordingSurface {
    reports: Mutex<Vec<CrashReport>>,
}

impl RecordingSurface {
    /// Creates an empty surface.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports shown so far, in display order.
    #[must_use]
    pub fn reports(&self) -> Vec<CrashReport> {
        self.reports.lock().clone()
    }
}

impl DiagnosticSurface for RecordingSurface {
    fn show(&self, report: &CrashReport) -> Result<(), SurfaceError> {
        self.reports.lock().push(report.clone());
        Ok(())
    }
}

/// Collaborators the crash reporter needs, passed explicitly.
pub struct CrashContext {
    /// Shared diagnostic log
    pub log: Arc<LogSink>,
    /// Where the diagnostic surface is shown
    pub ui: UiHandle,
    /// The diagnostic surface
    pub surface: Arc<dyn DiagnosticSurface>,
    /// How the process is ended
    pub terminator: Arc<dyn Terminator>,
}

/// Handler stages, tried in order until one succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashStage {
    /// Log, snapshot and schedule the diagnostic surface.
    Diagnostic,
    /// Print to standard error and terminate. Cannot fail.
    Console,
}

impl CrashStage {
    /// The full chain.
    pub const CHAIN: [Self; 2] = [Self::Diagnostic, Self::Console];
}

/// Converts failures into terminal diagnostics.
///
/// Safe to call concurrently from any number of threads; each call produces
/// its own report.
pub struct CrashReporter {
    context: CrashContext,
    metadata: OnceLock<Arc<Metadata>>,
    crashes_handled: AtomicU64,
    reports_built: AtomicU64,
}

impl CrashReporter {
    /// Creates a reporter over `context`.
    #[must_use]
    pub fn new(context: CrashContext) -> Self {
        Self {
            context,
            metadata: OnceLock::new(),
            crashes_handled: AtomicU64::new(0),
            reports_built: AtomicU64::new(0),
        }
    }

    /// Makes loaded metadata available to later reports.
    pub fn publish_metadata(&self, metadata: Arc<Metadata>) {
        let _ = self.metadata.set(metadata);
    }

    /// Number of calls to [`CrashReporter::report`] so far.
    #[must_use]
    pub fn crashes_handled(&self) -> u64 {
        self.crashes_handled.load(Ordering::SeqCst)
    }

    /// Number of reports built so far.
    #[must_use]
    pub fn reports_built(&self) -> u64 {
        self.reports_built.load(Ordering::SeqCst)
    }

    /// Reports `failure` with `message`. Never panics and never returns an error.
    ///
    /// With the production terminator the process ends once the user
    /// acknowledges the report, or immediately if the report cannot be shown.
    pub fn report(&self, failure: &Failure, message: &str) {
        self.crashes_handled.fetch_add(1, Ordering::SeqCst);
        let reentered = IN_CRASH_PATH.with(Cell::get);
        let _guard = CrashPathGuard::enter();

        if reentered {
            // The interrupted report must still reach the user.
            if let Some((message, detail)) = PENDING_PRIMARY.with(|p| p.borrow_mut().take()) {
                console_fallback(&message, &detail, None);
            }
        }

        let mut last_error = reentered.then_some(CrashError::Reentrant);
        for stage in CrashStage::CHAIN {
            if stage == CrashStage::Diagnostic && reentered {
                continue;
            }
            match self.run_stage(stage, failure, message, last_error.as_ref()) {
                Ok(()) => return,
                Err(e) => last_error = Some(e),
            }
        }
    }

    fn run_stage(
        &self,
        stage: CrashStage,
        failure: &Failure,
        message: &str,
        previous: Option<&CrashError>,
    ) -> Result<(), CrashError> {
        match stage {
            CrashStage::Diagnostic => self.schedule_diagnostic(failure, message),
            CrashStage::Console => {
                let cause = previous.map(ToString::to_string);
                console_fallback(message, &failure.console_text(), cause.as_deref());
                self.context.terminator.terminate(ExitStatus::Crashed);
                // Only reached when the terminator does not exit.
                self.context.ui.shutdown();
                Ok(())
            },
        }
    }

    fn schedule_diagnostic(&self, failure: &Failure, message: &str) -> Result<(), CrashError> {
        let mut entry = LogEntry::new(LogLevel::Crash, format!("{message}: {}", failure.summary()))
            .with_thread(failure.thread.clone());
        if let Some(trace) = &failure.backtrace {
            entry = entry.with_stack_trace(trace.clone());
        }
        self.context.log.append(entry)?;

        let report = CrashReport {
            message: message.to_string(),
            log_snapshot: self.context.log.all_messages()?,
            app_version: self.metadata.get().map(|m| m.version_text()),
        };
        self.reports_built.fetch_add(1, Ordering::SeqCst);

        let surface = self.context.surface.clone();
        let terminator = self.context.terminator.clone();
        let ui = self.context.ui.clone();
        let detail = failure.console_text();
        self.context.ui.post(move || {
            let _guard = CrashPathGuard::enter();
            PENDING_PRIMARY.with(|p| *p.borrow_mut() = Some((report.message.clone(), detail)));

            let shown = panic::catch_unwind(AssertUnwindSafe(|| surface.show(&report)));
            let pending = PENDING_PRIMARY.with(|p| p.borrow_mut().take());
            match (shown, pending) {
                (Ok(Ok(())), _) => {},
                (Ok(Err(e)), Some((message, detail))) => {
                    console_fallback(&message, &detail, Some(&e.to_string()));
                },
                (Err(_), Some((message, detail))) => {
                    console_fallback(&message, &detail, Some("the crash dialog panicked"));
                },
                // The panic hook already printed this report and terminated.
                (Ok(Err(_)) | Err(_), None) => return,
            }
            terminator.terminate(ExitStatus::Crashed);
            ui.shutdown();
        })?;
        Ok(())
    }
}

impl fmt::Debug for CrashReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrashReporter")
            .field("reports_built", &self.reports_built())
            .finish_non_exhaustive()
    }
}

impl Failure {
    fn console_text(&self) -> String {
        match &self.backtrace {
            Some(trace) => format!("{}\n{trace}", self.summary()),
            None => self.summary(),
        }
    }
}

/// Prints `failure` straight to standard error without touching the log or
/// the UI context. Used when no reporter is available yet.
pub fn print_to_console(message: &str, failure: &Failure) {
    console_fallback(message, &failure.console_text(), None);
}

/// Last-resort output. Uses nothing but standard error and ignores errors.
fn console_fallback(message: &str, detail: &str, cause: Option<&str>) {
    let stderr = io::stderr();
    let mut out = stderr.lock();
    let _ = writeln!(out, "{message}");
    let _ = writeln!(out, "{detail}");
    if let Some(cause) = cause {
        let _ = writeln!(out, "(crash report could not be displayed: {cause})");
    }
    let _ = out.flush();
}
