//! UI environment preparation.
//!
//! Runs once on the UI thread before the application is constructed:
//! - applies the native desktop theme (skipped on macOS; failure is only a warning)
//! - exports the rendering acceleration hints as environment variables

use parking_lot::RwLock;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::LauncherConfig;
use crate::ui_context::UiHandle;

/// Errors raised while preparing the UI environment.
#[derive(Debug, Error)]
pub enum EnvironmentError {
    /// The native theme could not be determined.
    #[error("Native theme unavailable: {0}")]
    ThemeUnavailable(String),

    /// Setup was attempted outside the UI thread.
    #[error("Environment setup must run on the UI thread")]
    WrongThread,
}

/// Host platform family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// Apple macOS
    MacOs,
    /// Microsoft Windows
    Windows,
    /// Linux and other freedesktop systems
    Linux,
    /// Anything else
    Other,
}

impl Platform {
    /// Detects the platform this binary was built for.
    #[must_use]
    pub fn current() -> Self {
        match std::env::consts::OS {
            "macos" => Self::MacOs,
            "windows" => Self::Windows,
            "linux" | "freebsd" | "openbsd" | "netbsd" | "dragonfly" => Self::Linux,
            _ => Self::Other,
        }
    }

    /// Returns true for Apple platforms, where the native look is the default.
    #[must_use]
    pub fn is_apple(self) -> bool {
        matches!(self, Self::MacOs)
    }
}

/// Color scheme of the desktop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThemeMode {
    /// Light scheme
    #[default]
    Light,
    /// Dark scheme
    Dark,
}

/// Source of the native desktop theme.
pub trait NativeTheme: Send + Sync {
    /// Determines the desktop color scheme.
    fn detect(&self) -> Result<ThemeMode, EnvironmentError>;
}

/// Reads the desktop theme from the session environment.
#[derive(Debug, Clone, Copy)]
pub struct SystemTheme {
    platform: Platform,
}

impl Default for SystemTheme {
    fn default() -> Self {
        Self {
            platform: Platform::current(),
        }
    }
}

impl NativeTheme for SystemTheme {
    fn detect(&self) -> Result<ThemeMode, EnvironmentError> {
        match self.platform {
            Platform::Linux => {
                if let Ok(theme) = std::env::var("GTK_THEME") {
                    return Ok(if theme.to_lowercase().ends_with(":dark") {
                        ThemeMode::Dark
                    } else {
                        ThemeMode::Light
                    });
                }
                let has_session = ["XDG_CURRENT_DESKTOP", "WAYLAND_DISPLAY", "DISPLAY"]
                    .iter()
                    .any(|var| std::env::var_os(var).is_some_and(|v| !v.is_empty()));
                if has_session {
                    Ok(ThemeMode::Light)
                } else {
                    Err(EnvironmentError::ThemeUnavailable(
                        "no desktop session detected".to_string(),
                    ))
                }
            },
            Platform::Windows => Ok(ThemeMode::Light),
            Platform::MacOs | Platform::Other => Err(EnvironmentError::ThemeUnavailable(format!(
                "unsupported platform '{}'",
                std::env::consts::OS
            ))),
        }
    }
}

/// UI settings published by environment setup and read by the application.
#[derive(Debug, Default)]
pub struct UiSettings {
    theme: RwLock<Option<ThemeMode>>,
}

impl UiSettings {
    /// Creates empty settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The applied native theme, if any.
    #[must_use]
    pub fn theme(&self) -> Option<ThemeMode> {
        *self.theme.read()
    }

    fn set_theme(&self, theme: ThemeMode) {
        *self.theme.write() = Some(theme);
    }
}

/// What environment setup did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentOutcome {
    /// Applied theme, `None` when skipped or unavailable
    pub theme: Option<ThemeMode>,
    /// Warning raised by the theme step
    pub theme_warning: Option<String>,
    /// Number of rendering hints exported
    pub hints_applied: usize,
}

/// One-time, platform-conditional UI environment setup.
pub struct EnvironmentInitializer {
    platform: Platform,
    native_theme: bool,
    render_hints: Vec<(String, String)>,
    theme_source: Arc<dyn NativeTheme>,
}

impl EnvironmentInitializer {
    /// Creates an initializer for the current platform from configuration.
    #[must_use]
    pub fn new(config: &LauncherConfig) -> Self {
        Self {
            platform: Platform::current(),
            native_theme: config.native_theme,
            render_hints: config.effective_render_hints().into_iter().collect(),
            theme_source: Arc::new(SystemTheme::default()),
        }
    }

    /// Overrides the detected platform.
    #[must_use]
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Overrides the native theme source.
    #[must_use]
    pub fn with_theme_source(mut self, source: Arc<dyn NativeTheme>) -> Self {
        self.theme_source = source;
        self
    }

    /// Runs setup. Must be called on the UI thread.
    pub fn run(
        &self,
        ui: &UiHandle,
        settings: &UiSettings,
    ) -> Result<EnvironmentOutcome, EnvironmentError> {
        if !ui.is_ui_thread() {
            return Err(EnvironmentError::WrongThread);
        }

        let mut outcome = EnvironmentOutcome {
            theme: None,
            theme_warning: None,
            hints_applied: 0,
        };

        if self.platform.is_apple() || !self.native_theme {
            debug!("Native theme step skipped on {:?}", self.platform);
        } else {
            match self.theme_source.detect() {
                Ok(theme) => {
                    settings.set_theme(theme);
                    outcome.theme = Some(theme);
                    info!("Applied native {:?} theme", theme);
                },
                Err(e) => {
                    warn!("Unable to apply native look and feel: {e}");
                    outcome.theme_warning = Some(e.to_string());
                },
            }
        }

        // Process environment writes are only sound while no other thread
        // reads it; this runs before the application spawns any workers.
        // Edition 2024 marks `set_var` unsafe for this reason.
        for (key, value) in &self.render_hints {
            std::env::set_var(key, value);
            debug!("Rendering hint {key}={value}");
            outcome.hints_applied += 1;
        }

        Ok(outcome)
    }
}
