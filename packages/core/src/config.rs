use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::ledger::LEDGER_FILE_NAME;
use crate::services::koios::DEFAULT_TIMEOUT;

const APP_DIR_NAME: &str = "koios-cli";

#[derive(Debug, Clone)]
pub struct Config {
    pub config_dir: PathBuf,
    pub default_profile: Option<String>,
    pub timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let config_dir = match env::var("KOIOS_CONFIG_DIR") {
            Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
            _ => dirs::config_dir()
                .map(|dir| dir.join(APP_DIR_NAME))
                .ok_or("Cannot determine config directory, set KOIOS_CONFIG_DIR")?,
        };

        let default_profile = env::var("KOIOS_PROFILE")
            .ok()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());

        let timeout = match env::var("KOIOS_TIMEOUT_SECONDS") {
            Ok(raw) => raw
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| format!("KOIOS_TIMEOUT_SECONDS must be a valid number, got {}", raw))?,
            Err(_) => DEFAULT_TIMEOUT,
        };

        Ok(Self {
            config_dir,
            default_profile,
            timeout,
        })
    }

    /// Config rooted at `dir` with every other setting at its default.
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: dir.into(),
            default_profile: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn profiles_dir(&self) -> PathBuf {
        self.config_dir.join("profiles")
    }

    pub fn profile_dir(&self, profile: &str) -> PathBuf {
        self.profiles_dir().join(profile)
    }

    pub fn ledger_path(&self, profile: &str) -> PathBuf {
        self.profile_dir(profile).join(LEDGER_FILE_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_paths_live_under_config_dir() {
        let config = Config::with_dir("/tmp/koios");
        assert_eq!(
            config.ledger_path("my-project"),
            PathBuf::from("/tmp/koios/profiles/my-project/koios.subscription")
        );
    }
}
