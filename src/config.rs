//! User configuration: debug mode, leak strictness and stress defaults.
//!
//! Settings are stored as a simple key-value text file at
//! `$XDG_CONFIG_HOME/ownership-tree/config.toml` (default
//! `~/.config/ownership-tree/config.toml`).  Unknown keys and malformed values
//! are ignored and fall back to the defaults.

use std::path::{Path, PathBuf};

/// Environment variable that forces debug mode on (`1`/`true`) or off.
pub const DEBUG_ENV: &str = "OWNERSHIP_TREE_DEBUG";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeConfig {
    /// Capture an allocation trace for every node created.
    pub debug_mode: bool,
    /// Leak assertions fail instead of only logging.
    pub throw_on_leak: bool,
    /// Worker threads used by the `stress` command.
    pub stress_threads: usize,
    /// Chains registered by each stress worker.
    pub stress_chains: usize,
    /// Resources per stress chain.
    pub chain_depth: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            debug_mode: false,
            throw_on_leak: true,
            stress_threads: 4,
            stress_chains: 100,
            chain_depth: 3,
        }
    }
}

impl TreeConfig {
    /// Load config from the default location, falling back to defaults, then
    /// apply the environment override.
    pub fn load() -> Self {
        Self::load_with_env(&config_path())
    }

    /// Load config from `path`, then apply the environment override.
    pub fn load_with_env(path: &Path) -> Self {
        Self::load_overridden(path, std::env::var(DEBUG_ENV).ok().as_deref())
    }

    fn load_overridden(path: &Path, debug_env: Option<&str>) -> Self {
        let mut config = Self::load_from(path);
        config.apply_env(debug_env);
        config
    }

    /// Load config from `path`, falling back to defaults when it is missing
    /// or unreadable.
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::parse_config(&contents),
            Err(err) => {
                if path.exists() {
                    tracing::warn!(path = %path.display(), %err, "unreadable config, using defaults");
                }
                Self::default()
            }
        }
    }

    /// Persist to the default location.
    pub fn save(&self) -> anyhow::Result<PathBuf> {
        let path = config_path();
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.serialise())?;
        Ok(())
    }

    fn apply_env(&mut self, value: Option<&str>) {
        match value.map(str::trim) {
            Some("1") | Some("true") => self.debug_mode = true,
            Some("0") | Some("false") => self.debug_mode = false,
            _ => {}
        }
    }

    fn parse_config(s: &str) -> Self {
        let mut config = Self::default();

        for line in s.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('[') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim().trim_matches('"');

            match key {
                "debug_mode" => config.debug_mode = value == "true",
                "throw_on_leak" => config.throw_on_leak = value == "true",
                "stress_threads" => {
                    if let Ok(v) = value.parse::<usize>() {
                        config.stress_threads = v.clamp(1, 256);
                    }
                }
                "stress_chains" => {
                    if let Ok(v) = value.parse::<usize>() {
                        config.stress_chains = v.clamp(1, 100_000);
                    }
                }
                "chain_depth" => {
                    if let Ok(v) = value.parse::<usize>() {
                        config.chain_depth = v.clamp(1, 64);
                    }
                }
                other => tracing::debug!(key = other, "ignoring unknown config key"),
            }
        }

        config
    }

    fn serialise(&self) -> String {
        let lines = [
            "# ownership-tree configuration".to_string(),
            String::new(),
            "# Diagnostics".to_string(),
            format!("debug_mode = {}", self.debug_mode),
            format!("throw_on_leak = {}", self.throw_on_leak),
            String::new(),
            "# Stress command defaults".to_string(),
            format!("stress_threads = {}", self.stress_threads),
            format!("stress_chains = {}", self.stress_chains),
            format!("chain_depth = {}", self.chain_depth),
            String::new(),
        ];
        lines.join("\n")
    }
}

/// Return the config file path (`$XDG_CONFIG_HOME/ownership-tree/config.toml`).
pub fn config_path() -> PathBuf {
    let config_dir = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
            PathBuf::from(home).join(".config")
        });
    config_dir.join("ownership-tree").join("config.toml")
}
