//! # Configuration Module
//!
//! Tunables for every analysis stage, loaded from a JSON file.
//!
//! ## Location
//!
//! The default file lives in the platform config directory:
//! - Linux: `~/.config/trackgraph/config.json`
//! - macOS: `~/Library/Application Support/trackgraph/config.json`
//! - Windows: `%APPDATA%\trackgraph\config.json`
//!
//! Every section is optional; missing fields take their defaults, so an empty
//! `{}` file is a valid configuration.
//!
//! ```
//! use trackgraph::config::AnalysisConfig;
//!
//! let config: AnalysisConfig = serde_json::from_str(r#"{"seed": 7, "walk": {"walk_length": 5}}"#)?;
//! assert_eq!(config.walk.walk_length, 5);
//! assert_eq!(config.metrics.pagerank_alpha, 0.85);
//! # Ok::<(), serde_json::Error>(())
//! ```

use crate::community::CommunityConfig;
use crate::enrich::EnrichmentConfig;
use crate::metrics::MetricsConfig;
use crate::walk::WalkConfig;
use anyhow::{Context, Result};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Returns the default config file path, creating its directory.
///
/// # Errors
///
/// This function will return an error if:
/// - The system config directory cannot be determined
/// - The `trackgraph` subdirectory cannot be created
pub fn default_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir().ok_or_else(|| {
        anyhow::anyhow!(
            "Could not determine system config directory. Please ensure your platform supports standard config directories."
        )
    })?;

    let app_dir = config_dir.join("trackgraph");
    fs::create_dir_all(&app_dir).with_context(|| {
        format!(
            "Failed to create config directory at {}. Please check file permissions.",
            app_dir.display()
        )
    })?;

    Ok(app_dir.join("config.json"))
}

/// All analysis settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Seed for every stochastic stage; `None` draws from OS entropy.
    pub seed: Option<u64>,
    pub metrics: MetricsConfig,
    pub community: CommunityConfig,
    pub walk: WalkConfig,
    pub enrichment: EnrichmentConfig,
}

impl AnalysisConfig {
    /// Read and validate a JSON config file.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read, is not valid JSON, or carries
    /// invalid walk parameters.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config
            .walk
            .validate()
            .with_context(|| format!("Invalid walk settings in {}", path.display()))?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load the file at [`default_config_path`], or defaults if there is none.
    ///
    /// # Errors
    ///
    /// Fails when the directory cannot be resolved or an existing file is
    /// invalid. A missing file is not an error.
    pub fn load_or_default() -> Result<Self> {
        let path = default_config_path()?;
        if path.exists() {
            Self::load(&path)
        } else {
            info!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Write the config as pretty JSON.
    ///
    /// # Errors
    ///
    /// Fails when serialization or the write fails.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write config file {}", path.display()))
    }

    /// Random source for the stochastic stages.
    #[must_use]
    pub fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::walk::FallbackPolicy;
    use rand::Rng;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_path_structure() {
        let path = default_config_path().expect("Should resolve config path");
        assert!(path.ends_with("trackgraph/config.json"));
        assert!(path.parent().is_some_and(Path::is_dir));
    }

    #[test]
    fn test_empty_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{}").unwrap();

        let config = AnalysisConfig::load(&path).unwrap();
        assert_eq!(config, AnalysisConfig::default());
        assert_eq!(config.community.max_levels, 32);
        assert_eq!(config.walk.fallback, FallbackPolicy::AnyNode);
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let mut config = AnalysisConfig {
            seed: Some(11),
            ..AnalysisConfig::default()
        };
        config.walk.fallback = FallbackPolicy::OutsideAvoidWindow;
        config.community.resolution = 2.5;
        config.save(&path).unwrap();

        assert_eq!(AnalysisConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_invalid_files_report_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        let err = AnalysisConfig::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("broken.json"));

        fs::write(&path, r#"{"walk": {"teleport_probability": 2.0}}"#).unwrap();
        let err = AnalysisConfig::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("teleport_probability"));

        assert!(AnalysisConfig::load(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_seeded_rng_is_reproducible() {
        let config = AnalysisConfig {
            seed: Some(99),
            ..AnalysisConfig::default()
        };
        let a: u64 = config.rng().gen();
        let b: u64 = config.rng().gen();
        assert_eq!(a, b);
    }
}
