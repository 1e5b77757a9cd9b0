//! Engine settings

use std::path::PathBuf;
use std::time::Duration;

use crate::poller::PollConfig;

/// Delays and locations used by every pipeline of a batch
#[derive(Debug, Clone)]
pub struct Settings {
    pub poll: PollConfig,
    /// Wait after creating a role before it is usable by the platform
    pub role_settle: Duration,
    /// Wait after a started monitor stops before its run is listed
    pub run_settle: Duration,
    /// Directory temporary code archives are written to
    pub archive_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            poll: PollConfig::default(),
            role_settle: Duration::from_secs(10),
            run_settle: Duration::from_secs(2),
            archive_dir: std::env::temp_dir(),
        }
    }
}

impl Settings {
    /// Settings with every delay set to zero
    pub fn immediate(archive_dir: impl Into<PathBuf>) -> Self {
        Self {
            poll: PollConfig {
                interval: Duration::ZERO,
                max_wait: None,
            },
            role_settle: Duration::ZERO,
            run_settle: Duration::ZERO,
            archive_dir: archive_dir.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.poll.interval, Duration::from_secs(1));
        assert_eq!(settings.poll.max_wait, None);
        assert_eq!(settings.role_settle, Duration::from_secs(10));
        assert_eq!(settings.run_settle, Duration::from_secs(2));
    }
}
