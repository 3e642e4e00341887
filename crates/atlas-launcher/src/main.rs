//! # Atlas
//!
//! Desktop entry point. All startup and crash handling lives in
//! [`atlas_launcher::Launcher`]; this binary only supplies the application.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

mod app;

use atlas_launcher::{AppContext, Application, Launcher};
use std::io;
use std::process::ExitCode;

/// Main entry point.
fn main() -> ExitCode {
    let outcome = Launcher::new().run(
        std::env::args_os(),
        Box::new(|context: AppContext| -> anyhow::Result<Box<dyn Application>> {
            let viewer = app::Viewer::new(context)?;
            Ok(Box::new(viewer))
        }),
        // Unlocked handles: the UI thread writes to stderr while this call blocks.
        &mut io::stdout(),
        &mut io::stderr(),
    );

    outcome.status.into()
}
