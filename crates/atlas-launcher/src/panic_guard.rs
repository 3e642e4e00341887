//! Process-wide panic hook.
//!
//! Registered once, before any other startup work. Every panic on any thread
//! (the startup thread, the UI thread, or worker threads this crate never
//! spawned) is forwarded to the bound [`CrashReporter`]. Panics raised before
//! a reporter is bound go straight to standard error.

use std::panic::{self, PanicHookInfo};
use std::sync::{Arc, OnceLock};

use crate::crash_report::{print_to_console, CrashReporter, Failure};

/// Set once the hook is registered.
static HOOK: OnceLock<()> = OnceLock::new();

/// The reporter the hook forwards to.
static REPORTER: OnceLock<Arc<CrashReporter>> = OnceLock::new();

/// Standard message for a panic on `thread`.
#[must_use]
pub fn panic_message(thread: &str) -> String {
    format!("Uncaught panic in thread '{thread}'")
}

/// Registration of the process-wide panic hook.
#[derive(Debug)]
pub struct PanicGuard;

impl PanicGuard {
    /// Registers the panic hook. Idempotent.
    pub fn install_hook() {
        HOOK.get_or_init(|| panic::set_hook(Box::new(handle_panic)));
    }

    /// Binds `reporter` as the target of the hook.
    ///
    /// Only the first call binds; later calls return the reporter that is
    /// already bound.
    pub fn bind(reporter: Arc<CrashReporter>) -> Arc<CrashReporter> {
        REPORTER.get_or_init(|| reporter).clone()
    }

    /// Registers the hook and binds `reporter` in one step.
    pub fn install(reporter: Arc<CrashReporter>) -> Arc<CrashReporter> {
        Self::install_hook();
        Self::bind(reporter)
    }

    /// Returns true once the hook has been registered.
    #[must_use]
    pub fn is_installed() -> bool {
        HOOK.get().is_some()
    }

    /// Returns true once a reporter has been bound.
    #[must_use]
    pub fn is_bound() -> bool {
        REPORTER.get().is_some()
    }
}

fn handle_panic(info: &PanicHookInfo<'_>) {
    let failure = Failure::from_panic(info);
    let message = panic_message(&failure.thread);
    match REPORTER.get() {
        Some(reporter) => reporter.report(&failure, &message),
        None => print_to_console(&message, &failure),
    }
}
