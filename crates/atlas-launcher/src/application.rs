//! Boundary between the launcher and the application it starts.
//!
//! The launcher constructs the application on the UI thread through an
//! [`ApplicationFactory`] and then calls [`Application::run`]. Any error from
//! either step is reported as a crash.
//!
//! The application owns the lifetime of the UI context: it keeps posting work
//! through [`AppContext::ui`] for as long as it is alive and calls
//! [`UiHandle::shutdown`] when its last window closes.

use atlas_common::Metadata;
use std::sync::Arc;

use crate::cli::CommandLineParameters;
use crate::environment::UiSettings;
use crate::ui_context::UiHandle;

/// Everything the application receives from the launcher.
#[derive(Debug, Clone)]
pub struct AppContext {
    /// Parsed command line
    pub parameters: CommandLineParameters,
    /// Packaged metadata
    pub metadata: Arc<Metadata>,
    /// Handle for scheduling further UI work
    pub ui: UiHandle,
    /// Settings published by environment setup
    pub settings: Arc<UiSettings>,
}

/// The application started by the launcher.
pub trait Application {
    /// Starts the application. Runs on the UI thread.
    fn run(&mut self) -> anyhow::Result<()>;
}

/// Builds the application on the UI thread.
pub type ApplicationFactory =
    Box<dyn FnOnce(AppContext) -> anyhow::Result<Box<dyn Application>> + Send + 'static>;
