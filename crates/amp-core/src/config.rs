//! Configuration system for the ampere emulator

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Config {
    pub cpu: CpuConfig,
    pub loader: LoaderConfig,
    pub debug: DebugConfig,
}

/// CPU emulation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuConfig {
    /// Upper bound on interpreter steps per run before the session is
    /// paused, the safety valve against runaway decode loops.
    pub step_budget: u64,
}

/// Executable loading settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Abort loading when an integrity check fails. When false the
    /// mismatch is logged and loading continues in best-effort mode.
    pub strict_integrity: bool,
    /// When set, the decrypted image is written here before mapping.
    pub dump_decrypted: Option<PathBuf>,
}

/// Debug settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub log_level: LogLevel,
    pub log_to_file: bool,
    pub log_path: PathBuf,
    /// Emit a trace event for every interpreted instruction
    pub trace_ppu: bool,
    /// Breakpoint addresses installed at session creation
    pub breakpoints: Vec<u32>,
}

/// Logging level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

// Default implementations

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            step_budget: 10_000_000,
        }
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            strict_integrity: true,
            dump_decrypted: None,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            log_to_file: false,
            log_path: PathBuf::from("ampere.log"),
            trace_ppu: false,
            breakpoints: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from file, or create default if it doesn't exist
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let path = Self::config_path();

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            Ok(toml::from_str(&content)?)
        } else {
            let config = Self::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        let path = Self::config_path();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the path to the configuration file
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ampere")
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.cpu.step_budget, 10_000_000);
        assert!(config.loader.strict_integrity);
        assert!(config.loader.dump_decrypted.is_none());
        assert!(!config.debug.trace_ppu);
        assert!(config.debug.breakpoints.is_empty());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.cpu.step_budget, config.cpu.step_budget);
        assert_eq!(parsed.loader.strict_integrity, config.loader.strict_integrity);
    }

    #[test]
    fn test_partial_config() {
        let parsed: Config = toml::from_str("[cpu]\nstep_budget = 500\n").unwrap();
        assert_eq!(parsed.cpu.step_budget, 500);
        assert!(parsed.loader.strict_integrity);
    }
}
