//! Launcher entry sequence.
//!
//! Runs once per process, in this order:
//! 1. register the panic hook, create the log sink and the UI context, bind
//!    the crash reporter
//! 2. load configuration and start `tracing`
//! 3. load packaged metadata
//! 4. route the command line (help, version, invalid arguments or run)
//! 5. for run mode, post environment setup and the application to the UI thread
//! 6. wait for the UI context to end

use atlas_common::{Metadata, MetadataResult};
use std::any::Any;
use std::ffi::OsString;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::application::{AppContext, ApplicationFactory};
use crate::cli::{CliError, CommandLineRouter, Mode};
use crate::config::LauncherConfig;
use crate::crash_report::{
    print_to_console, CrashContext, CrashReporter, DiagnosticSurface, Failure, FailureKind,
    TerminalSurface, APPLICATION_CRASHED, METADATA_UNAVAILABLE,
};
use crate::environment::{EnvironmentInitializer, NativeTheme, UiSettings};
use crate::exit_handler::{ExitStatus, ProcessTerminator, Terminator};
use crate::log_sink::{current_thread_label, LogSink, LogSinkLayer, CONSOLE_LISTENER};
use crate::panic_guard::{panic_message, PanicGuard};
use crate::ui_context::{UiContext, UiHandle};

/// Loads packaged metadata.
pub type MetadataLoader = Box<dyn FnOnce() -> MetadataResult<Metadata> + Send>;

/// Result of a launcher run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchOutcome {
    /// Exit status for the process
    pub status: ExitStatus,
    /// Number of tasks posted to the UI context
    pub ui_tasks_scheduled: u64,
    /// Number of crash reports built
    pub crash_reports: u64,
}

/// How far startup got on the calling thread.
enum Startup {
    /// Nothing was scheduled; the process can end with this status.
    Finished(ExitStatus),
    /// The application was posted to the UI context.
    Running,
    /// A crash was reported during startup.
    Crashed,
}

/// Collaborators shared by the startup steps.
struct Session {
    log: Arc<LogSink>,
    ui: UiHandle,
    reporter: Arc<CrashReporter>,
    config: LauncherConfig,
    theme_source: Option<Arc<dyn NativeTheme>>,
}

/// Orchestrates process startup and hands control to the application.
pub struct Launcher {
    config: Option<LauncherConfig>,
    log: Option<Arc<LogSink>>,
    surface: Arc<dyn DiagnosticSurface>,
    terminator: Arc<dyn Terminator>,
    theme_source: Option<Arc<dyn NativeTheme>>,
    metadata_loader: MetadataLoader,
    install_panic_hook: bool,
    install_tracing: bool,
}

impl Default for Launcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Launcher {
    /// Creates a launcher wired to the real process: terminal crash dialog,
    /// `std::process::exit`, packaged metadata, global panic hook and
    /// `tracing` subscriber.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: None,
            log: None,
            surface: Arc::new(TerminalSurface),
            terminator: Arc::new(ProcessTerminator),
            theme_source: None,
            metadata_loader: Box::new(Metadata::load),
            install_panic_hook: true,
            install_tracing: true,
        }
    }

    /// Uses `config` instead of loading the configuration file.
    #[must_use]
    pub fn with_config(mut self, config: LauncherConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Uses an existing log sink instead of a fresh console-backed one.
    #[must_use]
    pub fn with_log_sink(mut self, log: Arc<LogSink>) -> Self {
        self.log = Some(log);
        self
    }

    /// Overrides the crash dialog.
    #[must_use]
    pub fn with_surface(mut self, surface: Arc<dyn DiagnosticSurface>) -> Self {
        self.surface = surface;
        self
    }

    /// Overrides process termination.
    #[must_use]
    pub fn with_terminator(mut self, terminator: Arc<dyn Terminator>) -> Self {
        self.terminator = terminator;
        self
    }

    /// Overrides native theme detection.
    #[must_use]
    pub fn with_theme_source(mut self, source: Arc<dyn NativeTheme>) -> Self {
        self.theme_source = Some(source);
        self
    }

    /// Overrides metadata loading.
    #[must_use]
    pub fn with_metadata_loader(mut self, loader: MetadataLoader) -> Self {
        self.metadata_loader = loader;
        self
    }

    /// Skips installing the process-wide panic hook.
    #[must_use]
    pub fn without_panic_hook(mut self) -> Self {
        self.install_panic_hook = false;
        self
    }

    /// Skips installing the global `tracing` subscriber.
    #[must_use]
    pub fn without_tracing(mut self) -> Self {
        self.install_tracing = false;
        self
    }

    /// Runs the launcher to completion.
    ///
    /// `args` includes the program name. Usage and version text go to `out`,
    /// argument errors to `err`. Returns once the UI context has ended.
    pub fn run<I, T>(
        self,
        args: I,
        factory: ApplicationFactory,
        out: &mut impl Write,
        err: &mut impl Write,
    ) -> LaunchOutcome
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        if self.install_panic_hook {
            PanicGuard::install_hook();
        }

        let log = self.log.unwrap_or_else(|| Arc::new(LogSink::with_console()));
        let ui = match UiContext::start() {
            Ok(ui) => ui,
            Err(e) => {
                // No UI context means no crash dialog; the console is all there is.
                print_to_console(
                    APPLICATION_CRASHED,
                    &Failure::new(FailureKind::Startup, e.to_string()),
                );
                self.terminator.terminate(ExitStatus::Crashed);
                return LaunchOutcome {
                    status: ExitStatus::Crashed,
                    ui_tasks_scheduled: 0,
                    crash_reports: 0,
                };
            },
        };
        let handle = ui.handle();

        let reporter = Arc::new(CrashReporter::new(CrashContext {
            log: log.clone(),
            ui: handle.clone(),
            surface: self.surface,
            terminator: self.terminator,
        }));
        let reporter = if self.install_panic_hook {
            PanicGuard::bind(reporter)
        } else {
            reporter
        };
        // An earlier launch in this process may own the installed reporter.
        let crashes_before = reporter.crashes_handled();

        let config = self.config.unwrap_or_else(LauncherConfig::load);
        if self.install_tracing {
            install_tracing(&log, &config.log_filter);
        }
        if !config.console_log {
            let _ = log.remove_listener(CONSOLE_LISTENER);
        }

        let session = Session {
            log,
            ui: handle.clone(),
            reporter: reporter.clone(),
            config,
            theme_source: self.theme_source,
        };
        let loader = self.metadata_loader;

        let startup = panic::catch_unwind(AssertUnwindSafe(|| {
            session.start(args, loader, factory, out, err)
        }));
        let startup = startup.unwrap_or_else(|payload| {
            // With the panic hook installed the panic is already reported.
            if reporter.crashes_handled() == crashes_before {
                let failure = Failure::new(FailureKind::Startup, payload_text(payload.as_ref()));
                reporter.report(&failure, &panic_message(&current_thread_label()));
            }
            Startup::Crashed
        });

        let status = match startup {
            Startup::Finished(status) => {
                handle.shutdown();
                status
            },
            Startup::Running | Startup::Crashed => ExitStatus::Success,
        };
        ui.join();

        let status = if reporter.crashes_handled() > crashes_before {
            ExitStatus::Crashed
        } else {
            status
        };
        info!("Launcher finished with exit code {}", status.code());

        LaunchOutcome {
            status,
            ui_tasks_scheduled: handle.tasks_scheduled(),
            crash_reports: reporter.reports_built(),
        }
    }
}

impl Session {
    fn start<I, T>(
        self,
        args: I,
        loader: MetadataLoader,
        factory: ApplicationFactory,
        out: &mut impl Write,
        err: &mut impl Write,
    ) -> Startup
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let metadata = match loader() {
            Ok(metadata) => Arc::new(metadata),
            Err(e) => {
                error!("Failed to load metadata: {e}");
                self.reporter.report(
                    &Failure::new(FailureKind::Startup, e.to_string()),
                    METADATA_UNAVAILABLE,
                );
                return Startup::Crashed;
            },
        };
        self.reporter.publish_metadata(metadata.clone());
        info!("Starting {}", metadata.version_text());

        let router = CommandLineRouter::new(metadata.clone(), self.log.clone());
        let parameters = match router.route(args, out, err) {
            Ok(Mode::Run(parameters)) => parameters,
            Ok(Mode::ShowHelp | Mode::ShowVersion) => {
                return Startup::Finished(ExitStatus::Success);
            },
            Err(CliError::InvalidArguments(e)) => {
                info!("Rejected command line: {}", e.kind());
                return Startup::Finished(ExitStatus::InvalidArguments);
            },
            Err(e @ CliError::Output(_)) => {
                warn!("{e}");
                return Startup::Finished(ExitStatus::Success);
            },
        };

        let mut environment = EnvironmentInitializer::new(&self.config);
        if let Some(source) = self.theme_source {
            environment = environment.with_theme_source(source);
        }
        let settings = Arc::new(UiSettings::new());
        let task_ui = self.ui.clone();
        let task_reporter = self.reporter.clone();

        let posted = self.ui.post(move || {
            if let Err(e) = environment.run(&task_ui, &settings) {
                warn!("Environment setup skipped: {e}");
            }

            let context = AppContext {
                parameters,
                metadata,
                ui: task_ui,
                settings,
            };
            let result = factory(context).and_then(|mut app| app.run());
            if let Err(e) = result {
                error!("Application failed: {e:#}");
                task_reporter.report(
                    &Failure::from_error(FailureKind::Application, &e),
                    APPLICATION_CRASHED,
                );
            }
        });

        match posted {
            Ok(()) => Startup::Running,
            Err(e) => {
                let failure = Failure::new(FailureKind::Startup, e.to_string());
                self.reporter.report(&failure, APPLICATION_CRASHED);
                Startup::Crashed
            },
        }
    }
}

/// Routes all `tracing` events into `log`. Later calls are no-ops.
fn install_tracing(log: &Arc<LogSink>, directive: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(LogSinkLayer::new(log.clone()))
        .try_init();
}

fn payload_text(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        String::new()
    }
}
