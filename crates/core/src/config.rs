//! Engine configuration.
//!
//! Values come from `~/.config/cashrace/config.toml`, then `CASHRACE__*`
//! environment variables (`CASHRACE__GUARD_COOLDOWN_MS=500`). Missing keys
//! fall back to [`EngineConfig::default`].

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{cards::PartnershipMode, ledger::LoanTerms, models::Cash, store::FileRepository};

/// Directory under `~/.config` holding the configuration file.
pub const CONFIG_DIR: &str = "cashrace";
/// Configuration file name.
pub const CONFIG_FILE: &str = "config.toml";
/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "CASHRACE";

const DEFAULT_CONFIG: &str = r#"# cashrace engine configuration

# Where the file repository keeps races, players and transaction logs.
# data_root = "/var/lib/cashrace"

# Window during which a second call of the same operation on a race is rejected.
guard_cooldown_ms = 2000

# "all_or_nothing" or "best_effort"
partnership_mode = "all_or_nothing"

big_race_multiplier = 100
big_race_bonus = 50000

loan_increment = 1000
loan_rate_percent = 10

max_babies = 3

transaction_retry_attempts = 3
"#;

/// Tunables read at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root directory of the file repository.
    pub data_root: PathBuf,
    /// Guard cooldown in milliseconds.
    pub guard_cooldown_ms: u64,
    /// Failure handling for partnership purchases.
    pub partnership_mode: PartnershipMode,
    /// Cash on entering the big race is passive income times this.
    pub big_race_multiplier: Cash,
    /// Added to passive income to form big-race income.
    pub big_race_bonus: Cash,
    /// Loans are taken in multiples of this amount.
    pub loan_increment: Cash,
    /// Monthly loan payment as a percentage of the amount borrowed.
    pub loan_rate_percent: Cash,
    /// Most children a player can have.
    pub max_babies: u8,
    /// Attempts made to append each transaction record.
    pub transaction_retry_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_root: FileRepository::default_root(),
            guard_cooldown_ms: 2_000,
            partnership_mode: PartnershipMode::AllOrNothing,
            big_race_multiplier: 100,
            big_race_bonus: 50_000,
            loan_increment: 1_000,
            loan_rate_percent: 10,
            max_babies: 3,
            transaction_retry_attempts: 3,
        }
    }
}

impl EngineConfig {
    /// Load from the default location plus environment overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(&default_path())
    }

    /// Load from `path` (which may be absent) plus environment overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("failed to read configuration from {}", path.display()))?;
        settings
            .try_deserialize()
            .context("invalid engine configuration")
    }

    /// Guard cooldown as a [`Duration`].
    pub fn guard_cooldown(&self) -> Duration {
        Duration::from_millis(self.guard_cooldown_ms)
    }

    /// Loan increment and rate as [`LoanTerms`].
    pub fn loan_terms(&self) -> LoanTerms {
        LoanTerms {
            increment: self.loan_increment,
            rate_percent: self.loan_rate_percent,
        }
    }
}

/// Location of the configuration file under the user's config directory.
pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR)
        .join(CONFIG_FILE)
}

/// Write the default configuration file if none exists yet.
pub fn ensure_default_config() -> Result<PathBuf> {
    let path = default_path();
    write_default_config(&path)?;
    Ok(path)
}

fn write_default_config(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, DEFAULT_CONFIG)
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!(path = %path.display(), "wrote default configuration");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_file_matches_defaults() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("cashrace").join(CONFIG_FILE);
        write_default_config(&path)?;
        assert!(path.exists());

        let loaded = EngineConfig::load_from(&path)?;
        let defaults = EngineConfig::default();
        assert_eq!(loaded.guard_cooldown_ms, defaults.guard_cooldown_ms);
        assert_eq!(loaded.partnership_mode, PartnershipMode::AllOrNothing);
        assert_eq!(loaded.big_race_multiplier, 100);
        assert_eq!(loaded.loan_terms(), defaults.loan_terms());
        Ok(())
    }

    #[test]
    fn existing_file_is_not_overwritten() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "max_babies = 5\n")?;
        write_default_config(&path)?;
        assert_eq!(fs::read_to_string(&path)?, "max_babies = 5\n");
        Ok(())
    }

    #[test]
    fn partial_file_keeps_other_defaults() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join(CONFIG_FILE);
        fs::write(
            &path,
            "partnership_mode = \"best_effort\"\nguard_cooldown_ms = 250\n",
        )?;
        let loaded = EngineConfig::load_from(&path)?;
        assert_eq!(loaded.partnership_mode, PartnershipMode::BestEffort);
        assert_eq!(loaded.guard_cooldown(), Duration::from_millis(250));
        assert_eq!(loaded.max_babies, 3);
        Ok(())
    }

    #[test]
    fn missing_file_yields_defaults() -> Result<()> {
        let dir = tempdir()?;
        let loaded = EngineConfig::load_from(&dir.path().join("absent.toml"))?;
        assert_eq!(loaded.transaction_retry_attempts, 3);
        Ok(())
    }
}
