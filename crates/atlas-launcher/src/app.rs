//! Seed viewer application started by the launcher.
//!
//! Validates the game installation, loads the seed history and then closes
//! the UI context. The map views themselves live outside this binary.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use atlas_launcher::{AppContext, Application};

/// Seeds read from a history file, in file order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SeedHistory {
    seeds: Vec<i64>,
}

impl SeedHistory {
    /// Parses one seed per line. Blank lines and `#` comments are ignored,
    /// unparsable lines are skipped with a warning.
    #[must_use]
    pub fn parse(contents: &str) -> Self {
        let mut seeds = Vec::new();
        for (number, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match line.parse::<i64>() {
                Ok(seed) => seeds.push(seed),
                Err(e) => warn!("Skipping history line {}: {e}", number + 1),
            }
        }
        Self { seeds }
    }

    /// Reads and parses `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading seed history {}", path.display()))?;
        Ok(Self::parse(&contents))
    }

    /// Seeds in file order.
    #[must_use]
    pub fn seeds(&self) -> &[i64] {
        &self.seeds
    }
}

/// The seed viewer.
pub struct Viewer {
    context: AppContext,
    history: SeedHistory,
}

impl Viewer {
    /// Creates the viewer. Runs on the UI thread.
    pub fn new(context: AppContext) -> Result<Self> {
        if let Some(dir) = context.parameters.game_dir() {
            if !dir.is_dir() {
                bail!("game directory {} does not exist", dir.display());
            }
        }
        Ok(Self {
            context,
            history: SeedHistory::default(),
        })
    }
}

impl Application for Viewer {
    fn run(&mut self) -> Result<()> {
        info!(
            "{} running with {:?} theme",
            self.context.metadata.name(),
            self.context.settings.theme()
        );

        if let Some(path) = self.context.parameters.history_file() {
            self.history = SeedHistory::load(path)?;
            info!("Loaded {} seeds from history", self.history.seeds().len());
        }

        self.context.ui.shutdown();
        Ok(())
    }
}
