//! Launcher configuration.
//!
//! Controls log filtering, the native theme step and the rendering hints.
//! Configuration can be loaded from and saved to a file.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Configuration file name.
const CONFIG_FILE: &str = "launcher.toml";

/// Configuration directory name under the platform config dir.
const CONFIG_DIR: &str = "atlas";

/// Rendering hints exported on every run. Configuration may change their
/// values but cannot remove them.
pub const REQUIRED_RENDER_HINTS: [(&str, &str); 2] =
    [("WGPU_POWER_PREF", "high"), ("WGPU_BACKEND", "primary")];

/// Launcher configuration parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    /// `tracing` filter directive (`RUST_LOG` takes precedence)
    pub log_filter: String,
    /// Keep the default console log listener
    pub console_log: bool,
    /// Try to apply the native desktop theme
    pub native_theme: bool,
    /// Environment variables exported before any UI surface exists, on top
    /// of [`REQUIRED_RENDER_HINTS`]
    pub render_hints: BTreeMap<String, String>,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        let render_hints = REQUIRED_RENDER_HINTS
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();

        Self {
            log_filter: "info".to_string(),
            console_log: true,
            native_theme: true,
            render_hints,
        }
    }
}

impl LauncherConfig {
    /// Load configuration from the default file location.
    /// Returns default config if file doesn't exist.
    pub fn load() -> Self {
        Self::load_from(Self::config_path())
    }

    /// Load configuration from a specific path.
    /// Returns default config if file doesn't exist or is invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();

        if !path.exists() {
            info!("Config file not found, using defaults");
            return Self::default();
        }

        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                warn!("Failed to read config file: {e}");
                return Self::default();
            },
        };

        match toml::from_str::<Self>(&contents) {
            Ok(mut config) => {
                config.validate();
                info!("Loaded config from {}", path.display());
                config
            },
            Err(e) => {
                warn!("Failed to parse config file: {e}");
                Self::default()
            },
        }
    }

    /// Save configuration to a specific path.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let mut file = fs::File::create(path)?;
        file.write_all(contents.as_bytes())?;

        info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn config_path() -> PathBuf {
        match dirs::config_dir() {
            Some(dir) => dir.join(CONFIG_DIR).join(CONFIG_FILE),
            None => PathBuf::from(CONFIG_FILE),
        }
    }

    /// Drop unusable values.
    pub fn validate(&mut self) {
        if self.log_filter.trim().is_empty() {
            self.log_filter = Self::default().log_filter;
        }
        // Environment variable names cannot be empty or contain '=' / NUL.
        self.render_hints.retain(|key, value| {
            !key.is_empty() && !key.contains(['=', '\0']) && !value.contains('\0')
        });
        for (key, value) in REQUIRED_RENDER_HINTS {
            self.render_hints
                .entry(key.to_string())
                .or_insert_with(|| value.to_string());
        }
    }

    /// Hints to export: the required ones, overridden or extended by
    /// `render_hints`.
    #[must_use]
    pub fn effective_render_hints(&self) -> BTreeMap<String, String> {
        let mut hints: BTreeMap<String, String> = REQUIRED_RENDER_HINTS
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        hints.extend(self.render_hints.clone());
        hints
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = LauncherConfig::default();
        assert_eq!(config.log_filter, "info");
        assert!(config.console_log);
        assert!(config.native_theme);
        assert_eq!(config.render_hints.len(), 2);
        assert_eq!(config.render_hints.get("WGPU_POWER_PREF").map(String::as_str), Some("high"));
    }

    #[test]
    fn test_config_validation() {
        let mut config = LauncherConfig {
            log_filter: "  ".to_string(),
            ..LauncherConfig::default()
        };
        config.render_hints.insert(String::new(), "x".to_string());
        config.render_hints.insert("A=B".to_string(), "x".to_string());

        config.validate();

        assert_eq!(config.log_filter, "info");
        assert_eq!(config.render_hints.len(), 2);
    }

    #[test]
    fn test_config_save_load() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("nested").join("launcher.toml");

        let mut config = LauncherConfig {
            log_filter: "debug".to_string(),
            native_theme: false,
            ..LauncherConfig::default()
        };
        config.render_hints.insert("WGPU_BACKEND".to_string(), "vulkan".to_string());

        config.save_to(&config_path).expect("Failed to save config");

        let loaded = LauncherConfig::load_from(&config_path);
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_load_missing_file() {
        let config = LauncherConfig::load_from("/nonexistent/path/launcher.toml");
        assert_eq!(config, LauncherConfig::default());
    }

    #[test]
    fn test_config_load_invalid_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("launcher.toml");
        fs::write(&config_path, "log_filter = [").expect("write config");

        assert_eq!(LauncherConfig::load_from(&config_path), LauncherConfig::default());
    }

    #[test]
    fn test_render_hints_table_keeps_required_hints() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("launcher.toml");
        fs::write(
            &config_path,
            "[render_hints]\nWGPU_BACKEND = \"vulkan\"\nWGPU_TRACE = \"1\"\n",
        )
        .expect("write config");

        let config = LauncherConfig::load_from(&config_path);
        assert_eq!(config.render_hints.len(), 3);
        assert_eq!(config.render_hints.get("WGPU_POWER_PREF").map(String::as_str), Some("high"));
        assert_eq!(config.render_hints.get("WGPU_BACKEND").map(String::as_str), Some("vulkan"));
        assert_eq!(config.render_hints.get("WGPU_TRACE").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_empty_render_hints_table_keeps_required_hints() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("launcher.toml");
        fs::write(&config_path, "[render_hints]\n").expect("write config");

        let config = LauncherConfig::load_from(&config_path);
        assert_eq!(config.render_hints, LauncherConfig::default().render_hints);
    }

    #[test]
    fn test_effective_hints_without_validation() {
        let config = LauncherConfig {
            render_hints: BTreeMap::from([("WGPU_BACKEND".to_string(), "dx12".to_string())]),
            ..LauncherConfig::default()
        };
        let hints = config.effective_render_hints();
        assert_eq!(hints.len(), 2);
        assert_eq!(hints.get("WGPU_POWER_PREF").map(String::as_str), Some("high"));
        assert_eq!(hints.get("WGPU_BACKEND").map(String::as_str), Some("dx12"));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("launcher.toml");
        fs::write(&config_path, "console_log = false\n").expect("write config");

        let config = LauncherConfig::load_from(&config_path);
        assert!(!config.console_log);
        assert_eq!(config.render_hints, LauncherConfig::default().render_hints);
    }
}
