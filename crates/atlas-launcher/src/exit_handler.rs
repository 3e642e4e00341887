//! Process exit codes and termination.
//!
//! The launcher ends the process in exactly three ways:
//! - normal completion of the UI context (exit code 0)
//! - malformed command line arguments (exit code 2)
//! - acknowledgment of a crash report (exit code 4)

use parking_lot::Mutex;
use tracing::debug;

/// Exit status of the launcher process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitStatus {
    /// No crash and no argument error.
    Success,
    /// The command line could not be parsed.
    InvalidArguments,
    /// A crash report was shown and acknowledged.
    Crashed,
}

impl ExitStatus {
    /// Returns the numeric process exit code.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::InvalidArguments => 2,
            Self::Crashed => 4,
        }
    }

    /// Returns display name.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::InvalidArguments => "Invalid Arguments",
            Self::Crashed => "Crashed",
        }
    }
}

impl From<ExitStatus> for std::process::ExitCode {
    fn from(status: ExitStatus) -> Self {
        // All codes fit in a u8.
        Self::from(status.code() as u8)
    }
}

/// Ends the process.
///
/// The production implementation never returns. Test implementations may
/// record the request and return.
pub trait Terminator: Send + Sync {
    /// Terminates the process with `status`.
    fn terminate(&self, status: ExitStatus);
}

/// Terminates via [`std::process::exit`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessTerminator;

impl Terminator for ProcessTerminator {
    fn terminate(&self, status: ExitStatus) {
        debug!("Exiting with code {}", status.code());
        std::process::exit(status.code());
    }
}

/// Records termination requests instead of exiting.
#[derive(Debug, Default)]
pub struct RecordingTerminator {
    requests: Mutex<Vec<ExitStatus>>,
}

impl RecordingTerminator {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every status passed to [`Terminator::terminate`], in call order.
    #[must_use]
    pub fn requests(&self) -> Vec<ExitStatus> {
        self.requests.lock().clone()
    }
}

impl Terminator for RecordingTerminator {
    fn terminate(&self, status: ExitStatus) {
        self.requests.lock().push(status);
    }
}
