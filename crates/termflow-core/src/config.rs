use crate::error::{Result, TermflowError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Tunables for the screen buffer engine and the token pipeline.
///
/// All limits have conservative defaults; a zero-sized grid or an empty
/// scrollback is never constructed (values are clamped at use sites).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    /// Initial grid width in columns.
    pub cols: usize,
    /// Initial grid height in rows.
    pub rows: usize,
    /// Maximum number of rows kept in scrollback before oldest-first eviction.
    pub scrollback_lines: usize,
    /// Byte budget for unconsumed tokens. The producer blocks on enqueue
    /// once this many bytes are queued but not yet executed.
    pub backpressure_bytes: usize,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            cols: 80,
            rows: 24,
            scrollback_lines: 10_000,
            backpressure_bytes: 1024 * 1024,
        }
    }
}

impl TerminalConfig {
    /// Parse a config from TOML text. Missing fields fall back to defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| TermflowError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load a config from a TOML file, or return defaults if it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config = Self::from_toml_str(&content).map_err(|e| {
                TermflowError::Config(format!("{} ({})", e, path.display()))
            })?;
            info!("Loaded config from {}", path.display());
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = TerminalConfig::default();
        assert!(config.cols > 0 && config.rows > 0);
        assert!(config.scrollback_lines > 0);
        assert!(config.backpressure_bytes > 0);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config = TerminalConfig::from_toml_str("scrollback_lines = 500\n").unwrap();
        assert_eq!(config.scrollback_lines, 500);
        assert_eq!(config.cols, 80);
    }

    #[test]
    fn bad_toml_is_an_error() {
        assert!(TerminalConfig::from_toml_str("scrollback_lines = \"many\"").is_err());
    }
}
