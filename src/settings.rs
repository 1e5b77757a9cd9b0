//! Tool settings from `~/.config/canaryctl/config.toml`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Get the config directory path
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".config").join("canaryctl"))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolSettings {
    /// Seconds between status queries
    pub poll_interval: Option<u64>,
    /// Seconds before a wait gives up
    pub max_wait: Option<u64>,
    /// Seconds to wait after creating a role
    pub role_settle: Option<u64>,
    /// Seconds to wait before reading the run of a started monitor
    pub run_settle: Option<u64>,
    pub artifact_bucket: Option<String>,
    pub source_bucket: Option<String>,
    /// Sandbox platform state file
    pub state_file: Option<String>,
}

impl ToolSettings {
    /// Load config.toml, or defaults when it does not exist
    pub fn load() -> Result<Self> {
        let path = config_dir()?.join("config.toml");
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid {}", path.display()))
    }

    /// Engine settings with these overrides applied
    pub fn engine_settings(&self) -> fleet::Settings {
        let mut settings = fleet::Settings::default();
        if let Some(secs) = self.poll_interval {
            settings.poll.interval = Duration::from_secs(secs);
        }
        if let Some(secs) = self.max_wait {
            settings.poll.max_wait = Some(Duration::from_secs(secs));
        }
        if let Some(secs) = self.role_settle {
            settings.role_settle = Duration::from_secs(secs);
        }
        if let Some(secs) = self.run_settle {
            settings.run_settle = Duration::from_secs(secs);
        }
        settings
    }

    /// Sandbox state file: the flag, then config.toml, then one per profile
    pub fn state_path(&self, flag: Option<&Path>, profile: Option<&str>) -> Result<PathBuf> {
        if let Some(path) = flag {
            return Ok(path.to_path_buf());
        }
        if let Some(path) = &self.state_file {
            return Ok(PathBuf::from(shellexpand::tilde(path).as_ref()));
        }
        let file = match profile {
            Some(profile) if !profile.is_empty() => format!("sandbox-{profile}.json"),
            _ => "sandbox.json".to_string(),
        };
        Ok(config_dir()?.join(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_overrides_apply() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "poll_interval = 5\nmax_wait = 600\nartifact_bucket = \"my-artifacts\"\n",
        )
        .unwrap();

        let tool = ToolSettings::load_from(&path).unwrap();
        assert_eq!(tool.artifact_bucket.as_deref(), Some("my-artifacts"));

        let settings = tool.engine_settings();
        assert_eq!(settings.poll.interval, Duration::from_secs(5));
        assert_eq!(settings.poll.max_wait, Some(Duration::from_secs(600)));
        assert_eq!(settings.role_settle, Duration::from_secs(10));
    }

    #[test]
    fn test_state_path_precedence() {
        let tool = ToolSettings {
            state_file: Some("/tmp/shared.json".into()),
            ..ToolSettings::default()
        };
        assert_eq!(
            tool.state_path(Some(Path::new("/x/flag.json")), None).unwrap(),
            PathBuf::from("/x/flag.json")
        );
        assert_eq!(
            tool.state_path(None, Some("dev")).unwrap(),
            PathBuf::from("/tmp/shared.json")
        );

        let by_profile = ToolSettings::default().state_path(None, Some("dev")).unwrap();
        assert!(by_profile.ends_with("canaryctl/sandbox-dev.json"));
    }
}
