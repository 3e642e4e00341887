//! # Atlas Launcher
//!
//! Process startup and crash handling for the Atlas desktop application.
//!
//! This crate ties together:
//! - Log sink: ordered, thread-safe diagnostic log with console and file output
//! - UI context: the single thread all interface work runs on
//! - Command line routing: help, version, invalid arguments or run
//! - Environment setup: native theme and rendering hints
//! - Crash reporting: panic hook, diagnostic report, terminal exit

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

/// Boundary between the launcher and the application
pub mod application;
/// Command line parsing and mode selection
pub mod cli;
/// Launcher configuration
pub mod config;
/// Crash reporting and diagnostic surfaces
pub mod crash_report;
/// UI environment preparation
pub mod environment;
/// Exit codes and process termination
pub mod exit_handler;
/// Launcher entry sequence
pub mod launcher;
/// Diagnostic log sink
pub mod log_sink;
/// Process-wide panic hook
pub mod panic_guard;
/// Single-threaded UI executor
pub mod ui_context;

pub use application::{AppContext, Application, ApplicationFactory};
pub use exit_handler::ExitStatus;
pub use launcher::{LaunchOutcome, Launcher};
